//! Dispatcher-side error types

use thiserror::Error;

use crate::protocol::Identifier;

/// Errors surfaced while serving a single inbound request
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The presented access key did not match any configured key
    #[error("access key rejected")]
    Unauthorized,

    /// An operation was attempted with a message id that does not belong
    /// to the in-flight request
    #[error("operation references message {0}, which is not the in-flight request")]
    StaleRequest(Identifier),

    /// The response stream for this request has already ended
    #[error("request has already completed")]
    RequestClosed,

    /// An upload spec named neither or both of its source forms
    #[error("invalid attachment spec: {0}")]
    InvalidAttachmentSpec(String),

    /// The attachment storage collaborator rejected or never received
    /// the upload
    #[error("attachment upload failed: {0}")]
    AttachmentUploadFailed(String),
}
