//! Federation client error types

use thiserror::Error;

use crate::protocol::{ErrorType, ProtocolError};

/// Errors surfaced by outbound federation calls
#[derive(Debug, Error)]
pub enum ClientError {
    /// The peer bot emitted an error event
    #[error("peer bot reported an error: {}", text.as_deref().unwrap_or("<no detail>"))]
    Bot {
        text: Option<String>,
        allow_retry: bool,
        error_type: Option<ErrorType>,
    },

    /// The peer's stream violated the event protocol
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport-level failure before or during the stream
    #[error("network failure: {0}")]
    Network(String),

    /// The peer answered with a non-success status before streaming
    #[error("peer returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The peer requested a tool this caller did not supply
    #[error("peer requested unknown tool {0:?}")]
    UnknownTool(String),

    /// A supplied tool executable failed
    #[error("tool {name:?} failed")]
    ToolExecutionFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The stream completed without producing any response content
    #[error("peer bot {0:?} produced an empty response")]
    EmptyResponse(String),
}

impl ClientError {
    /// Whether retrying the whole call could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Bot { allow_retry, .. } => *allow_retry,
            ClientError::Network(_) => true,
            ClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::Network(error.to_string())
    }
}
