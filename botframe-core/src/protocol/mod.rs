//! Wire-level bot protocol
//!
//! This module defines the canonical data models for the bot query
//! protocol and the machinery that moves them across a connection:
//! request/response types, server-sent event framing, streamed response
//! accumulation, and multi-turn message normalization.

pub mod accumulator;
pub mod error;
pub mod events;
pub mod normalize;
pub mod types;

pub use accumulator::{Accumulator, BotMessage, Materialized};
pub use error::ProtocolError;
pub use events::{BotEvent, Frame};
pub use normalize::{
    combine_bot_messages, enforce_role_alternation, insert_attachment_messages, NormalizePolicy,
};
pub use types::{
    Attachment, AttachmentUploadResponse, ContentType, CostItem, ErrorResponse, ErrorType,
    FeedbackType, FunctionCall, FunctionDefinition, Identifier, InboundRequest, MessageFeedback,
    MessageRole, MetaResponse, ParametersDefinition, PartialResponse, ProtocolMessage,
    QueryRequest, ReportErrorRequest, ReportFeedbackRequest, ReportReactionRequest,
    SettingsRequest, SettingsResponse, ToolCallDefinition, ToolDefinition, ToolResultDefinition,
    PROTOCOL_VERSION,
};
