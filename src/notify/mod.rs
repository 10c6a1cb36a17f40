//! Outbound webhook notifications for finished imports.

pub mod dispatcher;
pub mod probe;

use thiserror::Error;

pub use dispatcher::{DeliveryPolicy, Dispatcher};
pub use probe::{probe, WebhookTestResult};

/// One failed POST to one subscriber. Logged and recorded, never escalated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("request timed out")]
    Timeout,
    #[error("endpoint responded with HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Transport(err.to_string())
        }
    }
}
