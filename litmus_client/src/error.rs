//! Error types for the transport, the live channel and write actions

use litmus_common::ExperimentStatus;
use reqwest::Method;
use thiserror::Error;

/// A failed REST call
#[derive(Debug, Error)]
pub enum RequestError {
    /// Non-success HTTP status; `detail` is the server's explanation
    #[error("{detail}")]
    Status {
        method: Method,
        path: String,
        status: u16,
        detail: String,
    },

    #[error("{method} {path} failed: {source}")]
    Network {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {path} returned an unexpected body: {source}")]
    Decode {
        method: Method,
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl RequestError {
    /// Human-readable detail for display
    pub fn detail(&self) -> String {
        match self {
            RequestError::Status { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }

    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Worth retrying for idempotent requests
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Network { .. } => true,
            RequestError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Live channel errors
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Live channel error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Live channel unavailable: {0}")]
    Unavailable(String),
}

/// A write action (terminate, guardrail submission) that did not complete
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Experiment is not loaded yet")]
    NotLoaded,

    #[error("Experiment is {0}; only running experiments can be terminated")]
    NotRunning(ExperimentStatus),

    #[error("Another {0} is already in flight")]
    Busy(&'static str),

    #[error("{0}")]
    Write(#[source] RequestError),

    /// The write went through but the follow-up read failed, so the new
    /// state is unconfirmed
    #[error("Request was sent but the result could not be confirmed: {0}")]
    Unconfirmed(#[source] RequestError),

    #[error("Report view is closed")]
    Closed,
}
