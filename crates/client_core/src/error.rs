use std::{collections::BTreeMap, fmt};

use thiserror::Error;

/// Never retried automatically; the user retries by repeating the action.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("{operation} failed with HTTP status {status}")]
    Status { operation: &'static str, status: u16 },
    #[error("{operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} returned an unreadable body: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid server url {url}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
}

impl NetworkError {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Status { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Decode { operation, .. } => operation,
            Self::InvalidServerUrl { .. } => "configure gateway",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormField {
    ProductId,
    Quantity,
    RequestedBy,
}

impl FormField {
    pub fn key(self) -> &'static str {
        match self {
            Self::ProductId => "product_id",
            Self::Quantity => "quantity",
            Self::RequestedBy => "requested_by",
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    fields: BTreeMap<FormField, &'static str>,
}

impl FormErrors {
    pub fn insert(&mut self, field: FormField, message: &'static str) {
        self.fields.insert(field, message);
    }

    pub fn remove(&mut self, field: FormField) -> Option<&'static str> {
        self.fields.remove(&field)
    }

    pub fn get(&self, field: FormField) -> Option<&'static str> {
        self.fields.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn fields(&self) -> impl Iterator<Item = FormField> + '_ {
        self.fields.keys().copied()
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.fields.keys().map(|field| field.key()).collect()
    }
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid form fields: {}", self.keys().join(", "))
    }
}

impl std::error::Error for FormErrors {}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] FormErrors),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("a submission is already in progress")]
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WidgetRefreshError {
    #[error("widget does not expose a native refresh capability")]
    Unsupported,
    #[error("widget refresh failed: {0}")]
    Failed(String),
    #[error("widget could not be created: {0}")]
    Create(String),
}
