use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use client_core::{
    dashboard::DashboardController,
    events::event_channel,
    headless_widget::HeadlessWidgetHost,
    history::{DeleteOutcome, HistoryView},
    load_settings, AutoConfirm, ClientEvent, ClientSettings, ConfirmationPrompt, FormField,
    HistorySynchronizer, HttpGateway, NoticeLevel, RefreshBus, ResetController, ResetOutcome,
    RestockGateway, RestockSession, SubmissionController, SubmitError,
};
use shared::domain::RequestId;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "restock", about = "Inventory restock requests from the terminal")]
struct Cli {
    /// TOML settings file. Defaults to ./restock.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Products,
    Employees,
    Submit {
        #[arg(long)]
        product: String,
        #[arg(long)]
        quantity: String,
        #[arg(long)]
        requested_by: String,
    },
    History,
    Delete {
        request_id: String,
        #[arg(long)]
        yes: bool,
    },
    Reset {
        #[arg(long)]
        yes: bool,
    },
    Dashboard,
    /// Mounts every view, prints client events and reads commands from stdin
    /// until Ctrl+C.
    Watch {
        #[arg(long)]
        yes: bool,
    },
}

const WATCH_HELP: &str = "commands: submit <product> <quantity> <employee> | delete <request-id> | reset | refresh | history | help";

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn ask(message: &str) {
    print!("{message} [y/N] ");
    let _ = io::stdout().flush();
}

struct StdinPrompt;

#[async_trait]
impl ConfirmationPrompt for StdinPrompt {
    async fn confirm(&self, message: &str) -> bool {
        ask(message);
        let answer = tokio::task::spawn_blocking(|| {
            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer).map(|_| answer)
        })
        .await;
        match answer {
            Ok(Ok(answer)) => is_yes(&answer),
            _ => false,
        }
    }
}

type PendingAnswer = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Shares stdin with the watch command loop: while a question is open the
/// next line answers it instead of being read as a command.
struct RoutedPrompt {
    pending: PendingAnswer,
}

#[async_trait]
impl ConfirmationPrompt for RoutedPrompt {
    async fn confirm(&self, message: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if pending.is_some() {
                return false;
            }
            *pending = Some(tx);
        }
        ask(message);
        rx.await.map(|answer| is_yes(&answer)).unwrap_or(false)
    }
}

fn prompt(yes: bool) -> Arc<dyn ConfirmationPrompt> {
    if yes {
        Arc::new(AutoConfirm)
    } else {
        Arc::new(StdinPrompt)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    let gateway: Arc<dyn RestockGateway> = Arc::new(
        HttpGateway::new(&settings.server_url, settings.request_timeout)
            .context("failed to build restock gateway")?,
    );

    match cli.command {
        Command::Products => {
            for product in gateway.list_products().await? {
                println!("{}\t{}", product.product_id, product.name);
            }
        }
        Command::Employees => {
            for employee in gateway.list_employees().await? {
                println!("{}\t{}", employee.employee_id, employee.label());
            }
        }
        Command::Submit {
            product,
            quantity,
            requested_by,
        } => {
            let form = SubmissionController::mount(
                gateway,
                RefreshBus::new(),
                event_channel(),
                settings.success_notice_duration,
            )
            .await;
            let result = submit(&form, &product, &quantity, &requested_by).await;
            form.teardown();
            result?;
        }
        Command::History => {
            let history = mount_history(&settings, gateway, Arc::new(AutoConfirm));
            history.expand().await?;
            print_history(&history.view());
            history.teardown();
        }
        Command::Delete { request_id, yes } => {
            let history = mount_history(&settings, gateway, prompt(yes));
            history.expand().await?;
            let result = delete(&history, &request_id).await;
            history.teardown();
            result?;
        }
        Command::Reset { yes } => {
            let reset = ResetController::new(
                gateway,
                RefreshBus::new(),
                prompt(yes),
                event_channel(),
                settings.reset_settle_delay,
            );
            print_reset(reset.reset().await?);
        }
        Command::Dashboard => {
            let host = HeadlessWidgetHost::new(settings.request_timeout)
                .context("failed to build dashboard host")?;
            let dashboard = DashboardController::mount(
                Arc::new(host),
                settings.dashboard.clone(),
                settings.dashboard_timings,
                &RefreshBus::new(),
                event_channel(),
            )
            .await;
            let report = dashboard.refresh().await;
            dashboard.teardown().await;
            match report.succeeded {
                Some(strategy) => println!("dashboard refreshed via {strategy:?}"),
                None => bail!("dashboard refresh failed after {:?}", report.tried()),
            }
        }
        Command::Watch { yes } => watch(settings, yes).await?,
    }

    Ok(())
}

fn mount_history(
    settings: &ClientSettings,
    gateway: Arc<dyn RestockGateway>,
    prompt: Arc<dyn ConfirmationPrompt>,
) -> Arc<HistorySynchronizer> {
    HistorySynchronizer::mount(
        gateway,
        RefreshBus::new(),
        prompt,
        event_channel(),
        settings.history_poll_interval,
    )
}

async fn submit(
    form: &Arc<SubmissionController>,
    product: &str,
    quantity: &str,
    requested_by: &str,
) -> Result<()> {
    form.set_field(FormField::ProductId, product);
    form.set_field(FormField::Quantity, quantity);
    form.set_field(FormField::RequestedBy, requested_by);

    match form.submit().await {
        Ok(payload) => {
            println!(
                "submitted {} x{} for {}",
                payload.name, payload.quantity, payload.requested_by
            );
            Ok(())
        }
        Err(SubmitError::Validation(errors)) => {
            for field in errors.fields() {
                eprintln!("{field}: {}", errors.get(field).unwrap_or_default());
            }
            bail!("restock request not submitted")
        }
        Err(err) => Err(err.into()),
    }
}

async fn delete(history: &HistorySynchronizer, request_id: &str) -> Result<()> {
    match history.delete(&RequestId::from(request_id)).await {
        DeleteOutcome::Committed => println!("deleted {request_id}"),
        DeleteOutcome::Declined => println!("cancelled"),
        DeleteOutcome::Missing => bail!("no restock request with id {request_id}"),
        DeleteOutcome::AlreadyInFlight => bail!("{request_id} is already being deleted"),
        DeleteOutcome::RolledBack { reason } => bail!("delete failed: {reason}"),
    }
    Ok(())
}

fn print_reset(outcome: ResetOutcome) {
    match outcome {
        ResetOutcome::Completed => println!("demo data regenerated"),
        ResetOutcome::Declined => println!("cancelled"),
        ResetOutcome::AlreadyRunning => println!("a reset is already running"),
    }
}

fn print_history(view: &HistoryView) {
    if view.rows.is_empty() {
        println!("No restock requests yet.");
        return;
    }
    println!("{} request(s)", view.count());
    for row in &view.rows {
        let request = &row.request;
        println!(
            "{}\t{}\t{} x{}\tby {}",
            request.request_id,
            request.timestamp,
            request.product_name,
            request.quantity,
            request.requested_by_name
        );
    }
}

/// Reads stdin on a plain thread so a pending read never holds up runtime
/// shutdown. Lines go to an open question first, then to the command loop.
fn spawn_stdin_router(pending: PendingAnswer) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let waiting = pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
            let line = match waiting {
                Some(answer) => match answer.send(line) {
                    Ok(()) => continue,
                    Err(line) => line,
                },
                None => line,
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn watch(settings: ClientSettings, yes: bool) -> Result<()> {
    let pending = PendingAnswer::default();
    let prompt: Arc<dyn ConfirmationPrompt> = if yes {
        Arc::new(AutoConfirm)
    } else {
        Arc::new(RoutedPrompt {
            pending: pending.clone(),
        })
    };
    let session = Arc::new(RestockSession::start(settings, prompt).await?);
    let mut events = BroadcastStream::new(session.subscribe());
    let mut commands = spawn_stdin_router(pending);

    session.history.expand().await?;
    print_history(&session.history.view());
    println!("{WATCH_HELP}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => match event {
                Some(Ok(event)) => print_event(&event),
                Some(Err(lagged)) => warn!(error = %lagged, "event stream lagged"),
                None => break,
            },
            line = commands.recv() => match line {
                // Commands run as tasks so events keep printing while one waits
                // on the server or on a confirmation.
                Some(line) => {
                    let session = session.clone();
                    tokio::spawn(async move {
                        if let Err(err) = run_command(&session, &line).await {
                            eprintln!("error: {err:#}");
                        }
                    });
                }
                None => break,
            },
        }
    }

    session.teardown().await;
    Ok(())
}

async fn run_command(session: &RestockSession, line: &str) -> Result<()> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["submit", product, quantity, requested_by] => {
            submit(&session.submission, product, quantity, requested_by).await?;
        }
        ["delete", request_id] => delete(&session.history, request_id).await?,
        ["reset"] => print_reset(session.reset.reset().await?),
        ["refresh"] => {
            session.history.refresh().await?;
        }
        ["history"] => print_history(&session.history.view()),
        ["help"] => println!("{WATCH_HELP}"),
        _ => bail!("unrecognized command {line:?}; {WATCH_HELP}"),
    }
    Ok(())
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Notice(notice) => {
            let tag = match notice.level {
                NoticeLevel::Success => "ok",
                NoticeLevel::Warning => "warn",
                NoticeLevel::Error => "error",
            };
            println!("[{tag}] {}", notice.message);
        }
        ClientEvent::HistoryUpdated { count, at } => {
            println!("history: {count} request(s), updated {}", at.format("%H:%M:%S"));
        }
        ClientEvent::DashboardBusy(true) => println!("dashboard: refreshing..."),
        ClientEvent::DashboardBusy(false) => {}
        ClientEvent::DashboardRefreshed { strategy, at } => {
            println!("dashboard: refreshed via {strategy:?} at {}", at.format("%H:%M:%S"));
        }
        ClientEvent::SubmitStatusChanged(status) => {
            tracing::debug!(?status, "submit status changed");
        }
        ClientEvent::ResetOverlay { visible } => {
            if *visible {
                println!("resetting demo data...");
            }
        }
    }
}
