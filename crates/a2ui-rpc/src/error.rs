use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection failures and non-2xx statuses, unchanged from the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("tool server returned an error: {0}")]
    RemoteTool(Value),
    #[error("agent returned an error: {0}")]
    RemoteCapability(Value),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub(crate) fn invalid_url(url: &str, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.to_owned(),
            reason: reason.to_string(),
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
