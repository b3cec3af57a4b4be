use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    error::WidgetRefreshError,
    events::{emit, ClientEvent, Notice},
    lease::TaskLease,
    signal::RefreshBus,
};

pub const MANUAL_RELOAD_NOTICE: &str =
    "Dashboard refresh attempted. If data doesn't update, please manually reload the page (F5 or Ctrl+R).";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolbarPosition {
    Top,
    #[default]
    Bottom,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetConfig {
    pub src: String,
    pub width: String,
    pub height: u32,
    pub toolbar: ToolbarPosition,
}

impl WidgetConfig {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            width: "100%".into(),
            height: 800,
            toolbar: ToolbarPosition::Bottom,
        }
    }
}

#[async_trait]
pub trait EmbeddedWidget: Send + Sync {
    fn src(&self) -> String;

    fn supports_refresh_data(&self) -> bool {
        false
    }

    async fn refresh_data(&self) -> Result<(), WidgetRefreshError> {
        Err(WidgetRefreshError::Unsupported)
    }

    async fn set_src(&self, src: &str) -> Result<(), WidgetRefreshError>;
}

#[async_trait]
pub trait WidgetHost: Send + Sync {
    async fn create(
        &self,
        config: &WidgetConfig,
    ) -> Result<Arc<dyn EmbeddedWidget>, WidgetRefreshError>;
}

pub type WidgetHandle = Option<Arc<dyn EmbeddedWidget>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryStrategy {
    NativeRefresh,
    ReassignSource,
    Recreate,
}

pub const ESCALATION_ORDER: [RecoveryStrategy; 3] = [
    RecoveryStrategy::NativeRefresh,
    RecoveryStrategy::ReassignSource,
    RecoveryStrategy::Recreate,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Refreshed,
    Skipped,
    Failed(WidgetRefreshError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardTimings {
    pub reassign_delay: Duration,
    pub min_busy: Duration,
}

impl Default for DashboardTimings {
    fn default() -> Self {
        Self {
            reassign_delay: Duration::from_millis(100),
            min_busy: Duration::from_secs(2),
        }
    }
}

impl RecoveryStrategy {
    pub async fn attempt(
        self,
        handle: WidgetHandle,
        config: &WidgetConfig,
        host: &dyn WidgetHost,
        timings: &DashboardTimings,
    ) -> (WidgetHandle, StrategyOutcome) {
        match self {
            Self::NativeRefresh => {
                let outcome = match &handle {
                    Some(widget) if widget.supports_refresh_data() => {
                        match widget.refresh_data().await {
                            Ok(()) => StrategyOutcome::Refreshed,
                            Err(err) => StrategyOutcome::Failed(err),
                        }
                    }
                    _ => StrategyOutcome::Skipped,
                };
                (handle, outcome)
            }
            Self::ReassignSource => {
                let Some(widget) = &handle else {
                    return (handle, StrategyOutcome::Skipped);
                };
                let mut src = widget.src();
                if src.is_empty() {
                    src = config.src.clone();
                }
                let outcome = match reassign_source(widget.as_ref(), &src, timings).await {
                    Ok(()) => StrategyOutcome::Refreshed,
                    Err(err) => StrategyOutcome::Failed(err),
                };
                (handle, outcome)
            }
            Self::Recreate => {
                drop(handle);
                match host.create(config).await {
                    Ok(widget) => (Some(widget), StrategyOutcome::Refreshed),
                    Err(err) => (None, StrategyOutcome::Failed(err)),
                }
            }
        }
    }
}

async fn reassign_source(
    widget: &dyn EmbeddedWidget,
    src: &str,
    timings: &DashboardTimings,
) -> Result<(), WidgetRefreshError> {
    widget.set_src("").await?;
    // Setting the same value back immediately is a no-op for most embeds.
    tokio::time::sleep(timings.reassign_delay).await;
    widget.set_src(src).await
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshReport {
    pub attempts: Vec<(RecoveryStrategy, StrategyOutcome)>,
    pub succeeded: Option<RecoveryStrategy>,
}

impl RefreshReport {
    pub fn exhausted(&self) -> bool {
        self.succeeded.is_none()
    }

    pub fn tried(&self) -> Vec<RecoveryStrategy> {
        self.attempts
            .iter()
            .filter(|(_, outcome)| *outcome != StrategyOutcome::Skipped)
            .map(|(strategy, _)| *strategy)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DashboardStatus {
    pub busy: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub refresh_count: u64,
}

#[derive(Default)]
struct DashboardState {
    busy_holds: usize,
    last_refreshed_at: Option<DateTime<Utc>>,
    refresh_count: u64,
}

pub struct DashboardController {
    host: Arc<dyn WidgetHost>,
    config: WidgetConfig,
    timings: DashboardTimings,
    events: broadcast::Sender<ClientEvent>,
    widget: tokio::sync::Mutex<WidgetHandle>,
    state: Mutex<DashboardState>,
    listener: Mutex<Option<TaskLease>>,
}

impl DashboardController {
    pub async fn mount(
        host: Arc<dyn WidgetHost>,
        config: WidgetConfig,
        timings: DashboardTimings,
        bus: &RefreshBus,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            host,
            config,
            timings,
            events,
            widget: tokio::sync::Mutex::new(None),
            state: Mutex::new(DashboardState::default()),
            listener: Mutex::new(None),
        });

        // Subscribe before the first await so no signal slips past.
        let subscription = bus.subscribe();

        match controller.host.create(&controller.config).await {
            Ok(widget) => {
                *controller.widget.lock().await = Some(widget);
                controller.lock_state().last_refreshed_at = Some(Utc::now());
                info!(src = %controller.config.src, "dashboard widget mounted");
            }
            Err(err) => {
                // Placeholder until a refresh manages to recreate it.
                warn!(src = %controller.config.src, error = %err, "dashboard widget failed to mount");
            }
        }

        let weak = Arc::downgrade(&controller);
        *controller.lock_listener() = Some(TaskLease::spawn(
            "dashboard refresh listener",
            listen_for_refresh(weak, subscription),
        ));

        controller
    }

    pub fn status(&self) -> DashboardStatus {
        let state = self.lock_state();
        DashboardStatus {
            busy: state.busy_holds > 0,
            last_refreshed_at: state.last_refreshed_at,
            refresh_count: state.refresh_count,
        }
    }

    pub async fn is_mounted(&self) -> bool {
        self.widget.lock().await.is_some()
    }

    pub async fn refresh(&self) -> RefreshReport {
        let started = Instant::now();
        let busy = BusyHold::acquire(self);
        let mut report = RefreshReport::default();

        {
            let mut slot = self.widget.lock().await;
            for strategy in ESCALATION_ORDER {
                let (handle, outcome) = strategy
                    .attempt(slot.take(), &self.config, self.host.as_ref(), &self.timings)
                    .await;
                *slot = handle;

                match &outcome {
                    StrategyOutcome::Refreshed => report.succeeded = Some(strategy),
                    StrategyOutcome::Skipped => debug!(?strategy, "dashboard strategy unavailable"),
                    StrategyOutcome::Failed(err) => {
                        warn!(?strategy, error = %err, "dashboard strategy failed")
                    }
                }
                report.attempts.push((strategy, outcome));
                if report.succeeded.is_some() {
                    break;
                }
            }
        }

        match report.succeeded {
            Some(strategy) => {
                let at = Utc::now();
                {
                    let mut state = self.lock_state();
                    state.last_refreshed_at = Some(at);
                    state.refresh_count += 1;
                }
                info!(?strategy, "dashboard refreshed");
                emit(&self.events, ClientEvent::DashboardRefreshed { strategy, at });

                if strategy != RecoveryStrategy::NativeRefresh {
                    // Fallback reloads finish too fast to notice; keep the
                    // indicator up long enough to be seen.
                    let remaining = self.timings.min_busy.saturating_sub(started.elapsed());
                    tokio::time::sleep(remaining).await;
                }
                drop(busy);
            }
            None => {
                drop(busy);
                warn!("dashboard refresh exhausted every recovery strategy");
                emit(&self.events, ClientEvent::Notice(Notice::warning(MANUAL_RELOAD_NOTICE)));
            }
        }

        report
    }

    pub async fn teardown(&self) {
        if let Some(mut listener) = self.lock_listener().take() {
            listener.cancel();
        }
        self.widget.lock().await.take();
        info!("dashboard widget torn down");
    }

    fn lock_state(&self) -> MutexGuard<'_, DashboardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<TaskLease>> {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn listen_for_refresh(
    controller: Weak<DashboardController>,
    mut subscription: crate::signal::RefreshSubscription,
) {
    while let Some(signal) = subscription.changed().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        debug!(token = signal.token.0, origin = ?signal.origin, "dashboard observed refresh signal");
        controller.refresh().await;
    }
}

/// Keeps the busy indicator raised while alive; overlapping refreshes
/// share it.
struct BusyHold<'a> {
    controller: &'a DashboardController,
}

impl<'a> BusyHold<'a> {
    fn acquire(controller: &'a DashboardController) -> Self {
        let raised = {
            let mut state = controller.lock_state();
            state.busy_holds += 1;
            state.busy_holds == 1
        };
        if raised {
            emit(&controller.events, ClientEvent::DashboardBusy(true));
        }
        Self { controller }
    }
}

impl Drop for BusyHold<'_> {
    fn drop(&mut self) {
        let lowered = {
            let mut state = self.controller.lock_state();
            state.busy_holds = state.busy_holds.saturating_sub(1);
            state.busy_holds == 0
        };
        if lowered {
            emit(&self.controller.events, ClientEvent::DashboardBusy(false));
        }
    }
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;
