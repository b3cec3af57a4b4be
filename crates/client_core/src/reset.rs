use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    error::NetworkError,
    events::{emit, ClientEvent, ConfirmationPrompt, Notice},
    gateway::RestockGateway,
    signal::{RefreshBus, RefreshOrigin},
};

pub const RESET_CONFIRMATION: &str = "This will clear all existing data and generate fresh demo data. This action cannot be undone. Continue?";
pub const RESET_SUCCESS_NOTICE: &str =
    "Demo data reset successfully! The dashboard will refresh automatically.";
pub const RESET_FAILED_NOTICE: &str = "Failed to reset demo data. Please try again.";
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Completed,
    Declined,
    AlreadyRunning,
}

pub struct ResetController {
    gateway: Arc<dyn RestockGateway>,
    bus: RefreshBus,
    prompt: Arc<dyn ConfirmationPrompt>,
    events: broadcast::Sender<ClientEvent>,
    settle_delay: Duration,
    running: AtomicBool,
}

impl ResetController {
    pub fn new(
        gateway: Arc<dyn RestockGateway>,
        bus: RefreshBus,
        prompt: Arc<dyn ConfirmationPrompt>,
        events: broadcast::Sender<ClientEvent>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            bus,
            prompt,
            events,
            settle_delay,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The refresh signal goes out only after the server confirmed the reset
    /// and the settle delay elapsed. On failure nothing is signalled.
    pub async fn reset(&self) -> Result<ResetOutcome, NetworkError> {
        if self.is_running() {
            return Ok(ResetOutcome::AlreadyRunning);
        }
        if !self.prompt.confirm(RESET_CONFIRMATION).await {
            return Ok(ResetOutcome::Declined);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(ResetOutcome::AlreadyRunning);
        }
        let _overlay = Overlay::show(self);

        if let Err(err) = self.gateway.reset_demo_data().await {
            warn!(error = %err, "demo data reset failed");
            emit(&self.events, ClientEvent::Notice(Notice::error(RESET_FAILED_NOTICE)));
            return Err(err);
        }

        info!(settle_ms = self.settle_delay.as_millis() as u64, "demo data reset accepted");
        // The server regenerates asynchronously; views read too early see partial data.
        tokio::time::sleep(self.settle_delay).await;

        self.bus.publish(RefreshOrigin::Reset);
        emit(&self.events, ClientEvent::Notice(Notice::success(RESET_SUCCESS_NOTICE)));
        Ok(ResetOutcome::Completed)
    }
}

struct Overlay<'a> {
    controller: &'a ResetController,
}

impl<'a> Overlay<'a> {
    fn show(controller: &'a ResetController) -> Self {
        emit(&controller.events, ClientEvent::ResetOverlay { visible: true });
        Self { controller }
    }
}

impl Drop for Overlay<'_> {
    fn drop(&mut self) {
        self.controller.running.store(false, Ordering::SeqCst);
        emit(&self.controller.events, ClientEvent::ResetOverlay { visible: false });
    }
}

#[cfg(test)]
#[path = "tests/reset_tests.rs"]
mod tests;
