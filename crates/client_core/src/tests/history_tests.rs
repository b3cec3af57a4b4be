use super::*;
use crate::{
    events::{event_channel, NoticeLevel},
    signal::RefreshToken,
    test_support::{drain_notices, request, FakeGateway, ScriptedPrompt},
};

const LIST: &str = "list restock history";

struct Harness {
    gateway: Arc<FakeGateway>,
    prompt: Arc<ScriptedPrompt>,
    bus: RefreshBus,
    history: Arc<HistorySynchronizer>,
    events: broadcast::Receiver<ClientEvent>,
}

fn harness(gateway: FakeGateway, answer: bool) -> Harness {
    let gateway = Arc::new(gateway);
    let prompt = Arc::new(ScriptedPrompt::answering(answer));
    let bus = RefreshBus::new();
    let events = event_channel();
    let rx = events.subscribe();
    let history = HistorySynchronizer::mount(
        gateway.clone(),
        bus.clone(),
        prompt.clone(),
        events,
        DEFAULT_POLL_INTERVAL,
    );
    Harness {
        gateway,
        prompt,
        bus,
        history,
        events: rx,
    }
}

fn ids(view: &HistoryView) -> Vec<&str> {
    view.rows.iter().map(|row| row.request.request_id.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn starts_collapsed_without_network_activity() {
    let h = harness(FakeGateway::new().with_history(vec![request("r1", "Tape", "Vivian")]), true);
    tokio::time::sleep(Duration::from_secs(300)).await;

    let view = h.history.view();
    assert_eq!(view.phase, HistoryPhase::Collapsed);
    assert_eq!(h.gateway.calls(LIST), 0);
    assert_eq!(h.history.refresh().await.expect("refresh"), FetchOutcome::Discarded);
    assert_eq!(h.gateway.calls(LIST), 0);
}

#[tokio::test(start_paused = true)]
async fn expand_fetches_immediately_and_replaces_the_cache() {
    let h = harness(
        FakeGateway::new().with_history(vec![
            request("r2", "Tape", "Vivian"),
            request("r1", "Thermal Printer", "Alice"),
        ]),
        true,
    );

    let outcome = h.history.expand().await.expect("expand");

    assert_eq!(outcome, FetchOutcome::Applied);
    let view = h.history.view();
    assert_eq!(view.phase, HistoryPhase::Idle);
    assert_eq!(ids(&view), vec!["r2", "r1"]);
    assert_eq!(view.placeholder, None);
    assert!(view.last_updated.is_some());

    h.gateway.set_history(vec![request("r3", "Tape", "Jason")]);
    h.history.refresh().await.expect("refresh");
    assert_eq!(ids(&h.history.view()), vec!["r3"]);
}

#[tokio::test(start_paused = true)]
async fn polls_while_expanded_and_stops_on_collapse() {
    let h = harness(FakeGateway::new(), true);

    h.history.expand().await.expect("expand");
    assert!(h.history.is_polling());
    assert_eq!(h.gateway.calls(LIST), 1);

    tokio::time::sleep(Duration::from_secs(125)).await;
    assert_eq!(h.gateway.calls(LIST), 3);

    assert!(h.history.collapse());
    assert!(!h.history.collapse(), "second collapse is a no-op");
    assert!(!h.history.is_polling());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.gateway.calls(LIST), 3);

    h.history.expand().await.expect("re-expand");
    assert_eq!(h.gateway.calls(LIST), 4);
}

#[tokio::test(start_paused = true)]
async fn empty_list_shows_empty_state_and_loading_takes_precedence() {
    let h = harness(FakeGateway::new(), true);
    h.gateway.delay(LIST, Duration::from_secs(1));

    let history = Arc::clone(&h.history);
    let expanding = tokio::spawn(async move { history.expand().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let view = h.history.view();
    assert_eq!(view.phase, HistoryPhase::Loading);
    assert_eq!(view.placeholder, Some(Placeholder::Loading));

    expanding.await.expect("join").expect("expand");
    let view = h.history.view();
    assert_eq!(view.phase, HistoryPhase::Idle);
    assert_eq!(view.placeholder, Some(Placeholder::Empty));
}

#[tokio::test(start_paused = true)]
async fn refresh_signal_refetches_only_while_expanded() {
    let h = harness(FakeGateway::new(), true);

    h.bus.publish(RefreshOrigin::Submission);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.gateway.calls(LIST), 0);

    h.history.expand().await.expect("expand");
    h.bus.publish(RefreshOrigin::Submission);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.gateway.calls(LIST), 2);

    h.bus.publish(RefreshOrigin::Reset);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.gateway.calls(LIST), 3);
}

#[tokio::test(start_paused = true)]
async fn older_response_arriving_last_is_discarded() {
    let h = harness(FakeGateway::new(), true);
    h.history.expand().await.expect("expand");

    h.gateway
        .script_history(Duration::from_millis(200), vec![request("a1", "Tape", "Vivian")]);
    h.gateway
        .script_history(Duration::from_millis(50), vec![request("b1", "Tape", "Alice")]);

    let (first, second) = tokio::join!(h.history.refresh(), h.history.refresh());

    assert_eq!(first.expect("fetch a"), FetchOutcome::Stale);
    assert_eq!(second.expect("fetch b"), FetchOutcome::Applied);
    assert_eq!(ids(&h.history.view()), vec!["b1"]);
}

#[tokio::test(start_paused = true)]
async fn collapse_discards_in_flight_fetch() {
    let h = harness(FakeGateway::new().with_history(vec![request("r1", "Tape", "Vivian")]), true);
    h.gateway.delay(LIST, Duration::from_secs(1));

    let history = Arc::clone(&h.history);
    let expanding = tokio::spawn(async move { history.expand().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.history.collapse();

    let outcome = expanding.await.expect("join").expect("expand");
    assert_eq!(outcome, FetchOutcome::Discarded);
    let view = h.history.view();
    assert_eq!(view.phase, HistoryPhase::Collapsed);
    assert!(view.rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn confirmed_delete_removes_row_locally_and_signals_once() {
    let mut h = harness(
        FakeGateway::new().with_history(vec![
            request("r9", "Tape", "Vivian"),
            request("r8", "Thermal Printer", "Alice"),
        ]),
        true,
    );
    h.history.expand().await.expect("expand");
    let fetches = h.gateway.calls(LIST);

    let outcome = h.history.delete(&RequestId::from("r9")).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(outcome, DeleteOutcome::Committed);
    assert_eq!(ids(&h.history.view()), vec!["r8"]);
    assert_eq!(h.gateway.calls(LIST), fetches, "no full re-fetch");
    assert_eq!(h.bus.current(), RefreshToken(1));
    assert!(!h.history.is_deleting(&RequestId::from("r9")));
    assert_eq!(h.prompt.asked(), vec!["Delete restock request for Tape by Vivian?"]);

    let notices = drain_notices(&mut h.events);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Success);
    assert_eq!(notices[0].message, "Request for Tape by Vivian has been deleted.");
}

#[tokio::test(start_paused = true)]
async fn refetch_overlapping_a_delete_applies_new_rows_without_the_deleted_one() {
    let h = harness(FakeGateway::new().with_history(vec![request("r9", "Tape", "Vivian")]), true);
    h.history.expand().await.expect("expand");
    h.gateway.delay("delete restock request", Duration::from_secs(1));

    let submit_elsewhere = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The list snapshot is taken before the server processed the delete.
        h.gateway.script_history(
            Duration::from_secs(2),
            vec![request("n1", "Thermal Printer", "Alice"), request("r9", "Tape", "Vivian")],
        );
        h.bus.publish(RefreshOrigin::Submission);
        tokio::time::sleep(Duration::from_secs(3)).await;
    };
    let r9 = RequestId::from("r9");
    let (outcome, ()) = tokio::join!(h.history.delete(&r9), submit_elsewhere);

    assert_eq!(outcome, DeleteOutcome::Committed);
    assert_eq!(h.gateway.calls(LIST), 2);
    assert_eq!(ids(&h.history.view()), vec!["n1"]);
}

#[tokio::test(start_paused = true)]
async fn fetch_started_before_delete_cannot_resurrect_the_row() {
    let h = harness(
        FakeGateway::new().with_history(vec![
            request("r9", "Tape", "Vivian"),
            request("r8", "Thermal Printer", "Alice"),
        ]),
        true,
    );
    h.history.expand().await.expect("expand");
    h.gateway.script_history(
        Duration::from_secs(1),
        vec![
            request("n1", "Tape", "Jason"),
            request("r9", "Tape", "Vivian"),
            request("r8", "Thermal Printer", "Alice"),
        ],
    );

    let delete_meanwhile = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.history.delete(&RequestId::from("r9")).await
    };
    let (fetched, deleted) = tokio::join!(h.history.refresh(), delete_meanwhile);

    assert_eq!(deleted, DeleteOutcome::Committed);
    assert_eq!(fetched.expect("refresh"), FetchOutcome::Applied);
    assert_eq!(ids(&h.history.view()), vec!["n1", "r8"]);

    // A fetch issued after the delete sees the server's own list again.
    h.gateway.set_history(vec![request("r9", "Tape", "Vivian")]);
    h.history.refresh().await.expect("refresh");
    assert_eq!(ids(&h.history.view()), vec!["r9"]);
}

#[tokio::test(start_paused = true)]
async fn declined_delete_changes_nothing() {
    let h = harness(FakeGateway::new().with_history(vec![request("r9", "Tape", "Vivian")]), false);
    h.history.expand().await.expect("expand");

    let outcome = h.history.delete(&RequestId::from("r9")).await;

    assert_eq!(outcome, DeleteOutcome::Declined);
    assert_eq!(h.gateway.calls("delete restock request"), 0);
    assert_eq!(ids(&h.history.view()), vec!["r9"]);
    assert_eq!(h.bus.current(), RefreshToken(0));
}

#[tokio::test(start_paused = true)]
async fn failed_delete_keeps_row_and_clears_in_flight_marker() {
    let mut h = harness(FakeGateway::new().with_history(vec![request("r9", "Tape", "Vivian")]), true);
    h.history.expand().await.expect("expand");
    h.gateway.fail("delete restock request", 500);

    let outcome = h.history.delete(&RequestId::from("r9")).await;

    assert!(matches!(outcome, DeleteOutcome::RolledBack { .. }));
    let view = h.history.view();
    assert_eq!(ids(&view), vec!["r9"]);
    assert_eq!(view.rows[0].state, RowState::Settled);
    assert_eq!(view.phase, HistoryPhase::Idle);
    assert!(!h.history.is_deleting(&RequestId::from("r9")));
    assert_eq!(h.bus.current(), RefreshToken(0));

    let notices = drain_notices(&mut h.events);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].message, DELETE_FAILED_NOTICE);
}

#[tokio::test(start_paused = true)]
async fn second_delete_for_in_flight_id_is_a_no_op() {
    let h = harness(FakeGateway::new().with_history(vec![request("r9", "Tape", "Vivian")]), true);
    h.history.expand().await.expect("expand");
    h.gateway.delay("delete restock request", Duration::from_secs(1));

    let history = Arc::clone(&h.history);
    let first = tokio::spawn(async move { history.delete(&RequestId::from("r9")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let view = h.history.view();
    assert_eq!(view.phase, HistoryPhase::Deleting);
    assert_eq!(view.rows[0].state, RowState::PendingDelete);
    assert!(h.history.is_deleting(&RequestId::from("r9")));

    let second = h.history.delete(&RequestId::from("r9")).await;
    assert_eq!(second, DeleteOutcome::AlreadyInFlight);

    assert_eq!(first.await.expect("join"), DeleteOutcome::Committed);
    assert_eq!(h.gateway.calls("delete restock request"), 1);
    assert_eq!(h.prompt.asked().len(), 1);
    assert!(!h.history.is_deleting(&RequestId::from("r9")));
}

#[tokio::test(start_paused = true)]
async fn deleting_an_unknown_row_is_reported_missing() {
    let h = harness(FakeGateway::new(), true);
    h.history.expand().await.expect("expand");

    let outcome = h.history.delete(&RequestId::from("ghost")).await;

    assert_eq!(outcome, DeleteOutcome::Missing);
    assert!(h.prompt.asked().is_empty());
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_polling_and_signal_handling() {
    let h = harness(FakeGateway::new(), true);
    h.history.expand().await.expect("expand");

    h.history.teardown();
    h.bus.publish(RefreshOrigin::Submission);
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(h.gateway.calls(LIST), 1);
    assert!(!h.history.is_expanded());
    assert!(!h.history.is_polling());
}
