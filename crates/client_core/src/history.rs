use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::{domain::RequestId, protocol::RestockRequest};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::NetworkError,
    events::{emit, ClientEvent, ConfirmationPrompt, Notice},
    gateway::RestockGateway,
    lease::TaskLease,
    signal::{RefreshBus, RefreshOrigin, RefreshSubscription},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DELETE_FAILED_NOTICE: &str = "Failed to delete request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPhase {
    Collapsed,
    Loading,
    Idle,
    Deleting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Settled,
    PendingDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    pub request: RestockRequest,
    pub state: RowState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Loading,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryView {
    pub phase: HistoryPhase,
    pub rows: Vec<HistoryRow>,
    pub placeholder: Option<Placeholder>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl HistoryView {
    pub fn count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Stale,
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Committed,
    RolledBack { reason: String },
    Declined,
    AlreadyInFlight,
    Missing,
}

#[derive(Default)]
struct HistoryState {
    expanded: bool,
    epoch: u64,
    items: Vec<RestockRequest>,
    deleting: HashSet<RequestId>,
    /// Deleted id -> last fetch seq issued before the delete committed.
    /// Responses up to that seq may still list the row.
    tombstones: HashMap<RequestId, u64>,
    next_seq: u64,
    displayed_seq: u64,
    in_flight: usize,
    last_updated: Option<DateTime<Utc>>,
}

pub struct HistorySynchronizer {
    gateway: Arc<dyn RestockGateway>,
    bus: RefreshBus,
    prompt: Arc<dyn ConfirmationPrompt>,
    events: broadcast::Sender<ClientEvent>,
    poll_interval: Duration,
    state: Mutex<HistoryState>,
    polling: Mutex<Option<TaskLease>>,
    listener: Mutex<Option<TaskLease>>,
}

impl HistorySynchronizer {
    pub fn mount(
        gateway: Arc<dyn RestockGateway>,
        bus: RefreshBus,
        prompt: Arc<dyn ConfirmationPrompt>,
        events: broadcast::Sender<ClientEvent>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let subscription = bus.subscribe();
        let history = Arc::new(Self {
            gateway,
            bus,
            prompt,
            events,
            poll_interval,
            state: Mutex::new(HistoryState::default()),
            polling: Mutex::new(None),
            listener: Mutex::new(None),
        });

        let listener = TaskLease::spawn(
            "history refresh listener",
            listen_for_refresh(Arc::downgrade(&history), subscription),
        );
        *lock(&history.listener) = Some(listener);
        history
    }

    pub fn is_expanded(&self) -> bool {
        self.lock_state().expanded
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.polling)
            .as_ref()
            .is_some_and(TaskLease::is_active)
    }

    pub fn is_deleting(&self, request_id: &RequestId) -> bool {
        self.lock_state().deleting.contains(request_id)
    }

    pub fn view(&self) -> HistoryView {
        let state = self.lock_state();
        let loading = state.expanded && state.in_flight > 0;
        let phase = if !state.expanded {
            HistoryPhase::Collapsed
        } else if loading {
            HistoryPhase::Loading
        } else if !state.deleting.is_empty() {
            HistoryPhase::Deleting
        } else {
            HistoryPhase::Idle
        };
        let placeholder = if loading {
            Some(Placeholder::Loading)
        } else if state.items.is_empty() {
            Some(Placeholder::Empty)
        } else {
            None
        };
        let rows = state
            .items
            .iter()
            .map(|request| HistoryRow {
                state: if state.deleting.contains(&request.request_id) {
                    RowState::PendingDelete
                } else {
                    RowState::Settled
                },
                request: request.clone(),
            })
            .collect();

        HistoryView {
            phase,
            rows,
            placeholder,
            last_updated: state.last_updated,
        }
    }

    pub async fn expand(self: &Arc<Self>) -> Result<FetchOutcome, NetworkError> {
        let newly_expanded = {
            let mut state = self.lock_state();
            if state.expanded {
                false
            } else {
                state.expanded = true;
                state.epoch += 1;
                true
            }
        };

        if newly_expanded {
            let lease = TaskLease::spawn(
                "history poller",
                poll_history(Arc::downgrade(self), self.poll_interval),
            );
            *lock(&self.polling) = Some(lease);
            info!(interval_secs = self.poll_interval.as_secs(), "history expanded");
        }

        self.fetch().await
    }

    pub fn collapse(&self) -> bool {
        {
            let mut state = self.lock_state();
            if !state.expanded {
                return false;
            }
            state.expanded = false;
            state.epoch += 1;
            state.in_flight = 0;
            state.tombstones.clear();
        }
        if let Some(mut lease) = lock(&self.polling).take() {
            lease.cancel();
        }
        info!("history collapsed");
        true
    }

    pub async fn refresh(&self) -> Result<FetchOutcome, NetworkError> {
        if !self.is_expanded() {
            return Ok(FetchOutcome::Discarded);
        }
        self.fetch().await
    }

    async fn fetch(&self) -> Result<FetchOutcome, NetworkError> {
        let (seq, epoch) = {
            let mut state = self.lock_state();
            state.next_seq += 1;
            state.in_flight += 1;
            (state.next_seq, state.epoch)
        };
        let in_flight = InFlightFetch {
            history: self,
            epoch,
        };

        let result = self.gateway.list_history().await;
        drop(in_flight);

        let items = match result {
            Ok(items) => items,
            Err(err) => {
                warn!(seq, error = %err, "failed to fetch restock history");
                return Err(err);
            }
        };

        let (count, at) = {
            let mut state = self.lock_state();
            if state.epoch != epoch || !state.expanded {
                debug!(seq, "discarding history fetch from a previous expansion");
                return Ok(FetchOutcome::Discarded);
            }
            if seq < state.displayed_seq {
                debug!(seq, displayed = state.displayed_seq, "discarding stale history fetch");
                return Ok(FetchOutcome::Stale);
            }
            let items: Vec<_> = items
                .into_iter()
                .filter(|r| {
                    !state
                        .tombstones
                        .get(&r.request_id)
                        .is_some_and(|&issued| seq <= issued)
                })
                .collect();
            let at = Utc::now();
            state.items = items;
            state.displayed_seq = seq;
            state.tombstones.retain(|_, issued| *issued > seq);
            state.last_updated = Some(at);
            (state.items.len(), at)
        };

        debug!(seq, count, "history fetch applied");
        emit(&self.events, ClientEvent::HistoryUpdated { count, at });
        Ok(FetchOutcome::Applied)
    }

    /// Confirms with the user, then deletes on the server. The row leaves
    /// the local list only after the server accepted the delete.
    pub async fn delete(&self, request_id: &RequestId) -> DeleteOutcome {
        let request = {
            let state = self.lock_state();
            if state.deleting.contains(request_id) {
                return DeleteOutcome::AlreadyInFlight;
            }
            match state.items.iter().find(|r| &r.request_id == request_id) {
                Some(request) => request.clone(),
                None => return DeleteOutcome::Missing,
            }
        };

        let question = format!(
            "Delete restock request for {} by {}?",
            request.product_name, request.requested_by_name
        );
        if !self.prompt.confirm(&question).await {
            return DeleteOutcome::Declined;
        }

        if !self.lock_state().deleting.insert(request_id.clone()) {
            return DeleteOutcome::AlreadyInFlight;
        }
        let pending = PendingDelete {
            history: self,
            request_id,
        };

        let result = self.gateway.delete_request(request_id).await;
        drop(pending);

        match result {
            Ok(()) => {
                let (count, at) = {
                    let mut state = self.lock_state();
                    state.items.retain(|r| &r.request_id != request_id);
                    if state.in_flight > 0 {
                        let issued = state.next_seq;
                        state.tombstones.insert(request_id.clone(), issued);
                    }
                    (state.items.len(), Utc::now())
                };
                info!(request_id = %request_id, "restock request deleted");
                self.bus.publish(RefreshOrigin::Deletion);
                emit(&self.events, ClientEvent::HistoryUpdated { count, at });
                emit(
                    &self.events,
                    ClientEvent::Notice(Notice::success(format!(
                        "Request for {} by {} has been deleted.",
                        request.product_name, request.requested_by_name
                    ))),
                );
                DeleteOutcome::Committed
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "failed to delete restock request");
                emit(&self.events, ClientEvent::Notice(Notice::error(DELETE_FAILED_NOTICE)));
                DeleteOutcome::RolledBack {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn teardown(&self) {
        self.collapse();
        if let Some(mut listener) = lock(&self.listener).take() {
            listener.cancel();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, HistoryState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn poll_history(history: Weak<HistorySynchronizer>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(history) = history.upgrade() else {
            break;
        };
        // Failures are logged by fetch; polling carries on.
        let _ = history.fetch().await;
    }
}

async fn listen_for_refresh(history: Weak<HistorySynchronizer>, mut subscription: RefreshSubscription) {
    while let Some(signal) = subscription.changed().await {
        let Some(history) = history.upgrade() else {
            break;
        };
        if signal.origin == RefreshOrigin::Deletion {
            // Deletes originate here and were already applied to the cache.
            continue;
        }
        if history.is_expanded() {
            debug!(token = signal.token.0, origin = ?signal.origin, "history observed refresh signal");
            let _ = history.fetch().await;
        }
    }
}

struct InFlightFetch<'a> {
    history: &'a HistorySynchronizer,
    epoch: u64,
}

impl Drop for InFlightFetch<'_> {
    fn drop(&mut self) {
        let mut state = self.history.lock_state();
        // Collapsing already zeroed the counter for older epochs.
        if state.epoch == self.epoch {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }
}

struct PendingDelete<'a> {
    history: &'a HistorySynchronizer,
    request_id: &'a RequestId,
}

impl Drop for PendingDelete<'_> {
    fn drop(&mut self) {
        self.history.lock_state().deleting.remove(self.request_id);
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
