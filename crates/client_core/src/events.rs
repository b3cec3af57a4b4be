use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::dashboard::RecoveryStrategy;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Notice(Notice),
    HistoryUpdated {
        count: usize,
        at: DateTime<Utc>,
    },
    DashboardBusy(bool),
    DashboardRefreshed {
        strategy: RecoveryStrategy,
        at: DateTime<Utc>,
    },
    SubmitStatusChanged(Option<SubmitStatus>),
    ResetOverlay {
        visible: bool,
    },
}

pub fn event_channel() -> broadcast::Sender<ClientEvent> {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    events
}

pub(crate) fn emit(events: &broadcast::Sender<ClientEvent>, event: ClientEvent) {
    // No subscribers is fine; headless callers only read return values.
    let _ = events.send(event);
}

#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

pub struct AutoConfirm;

#[async_trait]
impl ConfirmationPrompt for AutoConfirm {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }
}
