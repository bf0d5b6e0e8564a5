//! Protocol-level error types

use thiserror::Error;

/// Violations of the wire protocol itself, as opposed to application
/// errors a bot reports through an `error` event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// A frame carried an event name this protocol version does not know
    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    /// A frame body failed JSON parsing or had the wrong shape
    #[error("invalid payload in '{event}' event: {reason}")]
    InvalidPayload { event: String, reason: String },

    /// A frame arrived after the stream's `done` sentinel
    #[error("received '{0}' event after the stream was finalized")]
    EventAfterDone(String),

    /// A content frame arrived after an `error` event, which terminates
    /// accumulation; only the trailing `done` sentinel is accepted there
    #[error("received '{0}' event after an error terminated the stream")]
    EventAfterError(String),

    /// The stream ended without a `done` sentinel
    #[error("stream ended without a 'done' event")]
    MissingDone,
}

impl ProtocolError {
    pub(crate) fn invalid_payload(event: &str, reason: impl ToString) -> Self {
        Self::InvalidPayload {
            event: event.to_string(),
            reason: reason.to_string(),
        }
    }
}
