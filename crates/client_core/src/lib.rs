pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod gateway;
pub mod headless_widget;
pub mod history;
pub mod lease;
pub mod reset;
pub mod session;
pub mod signal;
pub mod submission;

pub use config::{load_settings, ClientSettings};
pub use dashboard::{DashboardController, RecoveryStrategy, WidgetConfig};
pub use error::{FormErrors, FormField, NetworkError, SubmitError, WidgetRefreshError};
pub use events::{AutoConfirm, ClientEvent, ConfirmationPrompt, Notice, NoticeLevel};
pub use gateway::{HttpGateway, RestockGateway};
pub use history::{DeleteOutcome, HistorySynchronizer, HistoryView};
pub use reset::{ResetController, ResetOutcome};
pub use session::RestockSession;
pub use signal::{RefreshBus, RefreshOrigin, RefreshToken};
pub use submission::SubmissionController;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
