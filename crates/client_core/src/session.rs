use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    config::ClientSettings,
    dashboard::{DashboardController, WidgetHost},
    events::{event_channel, ClientEvent, ConfirmationPrompt},
    gateway::{HttpGateway, RestockGateway},
    headless_widget::HeadlessWidgetHost,
    history::HistorySynchronizer,
    reset::ResetController,
    signal::RefreshBus,
    submission::SubmissionController,
};

pub struct RestockSession {
    bus: RefreshBus,
    events: broadcast::Sender<ClientEvent>,
    pub dashboard: Arc<DashboardController>,
    pub history: Arc<HistorySynchronizer>,
    pub submission: Arc<SubmissionController>,
    pub reset: ResetController,
}

impl RestockSession {
    pub async fn start(
        settings: ClientSettings,
        prompt: Arc<dyn ConfirmationPrompt>,
    ) -> anyhow::Result<Self> {
        let gateway = HttpGateway::new(&settings.server_url, settings.request_timeout)
            .context("failed to build restock gateway")?;
        let host = HeadlessWidgetHost::new(settings.request_timeout)
            .context("failed to build dashboard host")?;
        Ok(Self::start_with(settings, Arc::new(gateway), Arc::new(host), prompt).await)
    }

    pub async fn start_with(
        settings: ClientSettings,
        gateway: Arc<dyn RestockGateway>,
        host: Arc<dyn WidgetHost>,
        prompt: Arc<dyn ConfirmationPrompt>,
    ) -> Self {
        let bus = RefreshBus::new();
        let events = event_channel();

        let dashboard = DashboardController::mount(
            host,
            settings.dashboard.clone(),
            settings.dashboard_timings,
            &bus,
            events.clone(),
        )
        .await;
        let history = HistorySynchronizer::mount(
            gateway.clone(),
            bus.clone(),
            prompt.clone(),
            events.clone(),
            settings.history_poll_interval,
        );
        let submission = SubmissionController::mount(
            gateway.clone(),
            bus.clone(),
            events.clone(),
            settings.success_notice_duration,
        )
        .await;
        let reset = ResetController::new(
            gateway.clone(),
            bus.clone(),
            prompt,
            events.clone(),
            settings.reset_settle_delay,
        );

        info!(server_url = %settings.server_url, "restock session started");
        Self {
            bus,
            events,
            dashboard,
            history,
            submission,
            reset,
        }
    }

    pub fn bus(&self) -> &RefreshBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Stops every timer and listener. Safe to call more than once.
    pub async fn teardown(&self) {
        self.history.teardown();
        self.submission.teardown();
        self.dashboard.teardown().await;
        info!("restock session torn down");
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
