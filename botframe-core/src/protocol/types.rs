//! Core protocol value types
//!
//! This module contains the fundamental data structures exchanged between a
//! bot server and the hosting platform. The design prioritizes:
//! - Type safety through enums and strong typing
//! - Forward compatibility through optional fields with serde defaults
//! - Immutability: a constructed message is never mutated, normalization
//!   returns new values

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version of the bot protocol spoken by this crate.
pub const PROTOCOL_VERSION: &str = "1.2";

/// Opaque persistent identifier assigned by the platform (user,
/// conversation, message).
pub type Identifier = String;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions framing the conversation
    System,
    /// End-user input
    User,
    /// A bot's own output
    Bot,
}

/// Rendering format for message and response text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "text/markdown")]
    #[default]
    Markdown,
    #[serde(rename = "text/plain")]
    Plain,
}

/// User feedback attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Like,
    Dislike,
}

/// One feedback entry on a protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFeedback {
    #[serde(rename = "type")]
    pub kind: FeedbackType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A file referenced by (never owned by) a protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Stable URL where the content can be fetched
    pub url: String,

    /// MIME type of the content
    pub content_type: String,

    /// Display name of the file
    pub name: String,

    /// Platform-extracted textual content, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_content: Option<String>,

    /// Reference for inline rendering within response text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_ref: Option<String>,
}

/// One turn in a conversation, oldest first within a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub role: MessageRole,

    pub content: String,

    #[serde(default)]
    pub content_type: ContentType,

    /// Platform timestamp in microseconds, 0 when unknown
    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub message_id: Identifier,

    /// Identifier of the sending bot or user, used in multi-bot chats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Identifier>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<MessageFeedback>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ProtocolMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            content_type: ContentType::default(),
            timestamp: 0,
            message_id: String::new(),
            sender_id: None,
            feedback: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a bot message
    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Bot, content)
    }

    /// Set the message identifier
    pub fn with_message_id(mut self, message_id: impl Into<Identifier>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Set the sender identifier
    pub fn with_sender_id(mut self, sender_id: impl Into<Identifier>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add an attachment reference
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

fn missing_key() -> String {
    "<missing>".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// One inbound turn-processing request
///
/// Read-only to handlers; the normalization operations in
/// [`crate::protocol::normalize`] return new instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default = "protocol_version")]
    pub version: String,

    /// The conversation so far, oldest first; never empty when presented
    /// to a handler
    pub query: Vec<ProtocolMessage>,

    pub user_id: Identifier,

    pub conversation_id: Identifier,

    pub message_id: Identifier,

    /// Access credential; checked against configured keys before any
    /// handler runs
    #[serde(default = "missing_key")]
    pub access_key: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Whether to skip any system prompting
    #[serde(default)]
    pub skip_system_prompt: bool,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub logit_bias: HashMap<String, f32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,

    /// BCP 47 language code of the requesting client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,

    /// Identifier for one bot query within a message, when the platform
    /// issues several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_query_id: Option<Identifier>,
}

impl QueryRequest {
    /// Create a request carrying `query` with a fresh message identifier
    /// and empty platform identifiers. Used for outbound federation calls
    /// where the platform fills in billing identity from the API key.
    pub fn new(query: Vec<ProtocolMessage>) -> Self {
        Self {
            version: protocol_version(),
            query,
            user_id: String::new(),
            conversation_id: String::new(),
            message_id: uuid::Uuid::new_v4().to_string(),
            access_key: missing_key(),
            temperature: default_temperature(),
            skip_system_prompt: false,
            logit_bias: HashMap::new(),
            stop_sequences: Vec::new(),
            language_code: None,
            bot_query_id: None,
        }
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Add a stop sequence
    pub fn with_stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }

    /// The most recent message, i.e. the turn being answered
    pub fn last_message(&self) -> Option<&ProtocolMessage> {
        self.query.last()
    }
}

/// Settings negotiation request; carries no parameters today
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SettingsRequest {
    #[serde(default = "protocol_version")]
    pub version: String,
}

/// Platform notification that a user left feedback on a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFeedbackRequest {
    #[serde(default = "protocol_version")]
    pub version: String,
    pub message_id: Identifier,
    pub user_id: Identifier,
    pub conversation_id: Identifier,
    pub feedback_type: FeedbackType,
}

/// Platform notification that a user reacted to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportReactionRequest {
    #[serde(default = "protocol_version")]
    pub version: String,
    pub message_id: Identifier,
    pub user_id: Identifier,
    pub conversation_id: Identifier,
    pub reaction: String,
}

/// Platform report that it ran into an issue with this bot's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportErrorRequest {
    #[serde(default = "protocol_version")]
    pub version: String,
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Inbound request shapes, discriminated by the `type` field of the
/// JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundRequest {
    Query(QueryRequest),
    Settings(SettingsRequest),
    ReportFeedback(ReportFeedbackRequest),
    ReportError(ReportErrorRequest),
    ReportReaction(ReportReactionRequest),
}

/// Bot capability declaration returned for a settings request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsResponse {
    /// Peer bots this bot calls, mapped to expected call counts per query
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub server_bot_dependencies: HashMap<String, u32>,

    /// Whether users may upload attachments to this bot
    #[serde(default)]
    pub allow_attachments: bool,

    /// Introduction text shown to new users
    #[serde(default)]
    pub introduction_message: String,

    /// Request parsed content for text attachments
    #[serde(default = "default_true")]
    pub expand_text_attachments: bool,

    /// Request parsed descriptions for image attachments
    #[serde(default)]
    pub enable_image_comprehension: bool,

    /// Ask the platform to collapse consecutive same-role messages
    #[serde(default)]
    pub enforce_author_role_alternation: bool,

    /// Ask the platform to combine previous bot messages in multi-bot chats
    #[serde(default)]
    pub enable_multi_bot_chat_prompting: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SettingsResponse {
    fn default() -> Self {
        Self {
            server_bot_dependencies: HashMap::new(),
            allow_attachments: false,
            introduction_message: String::new(),
            expand_text_attachments: true,
            enable_image_comprehension: false,
            enforce_author_role_alternation: false,
            enable_multi_bot_chat_prompting: false,
        }
    }
}

/// Categorized application error kinds understood by the platform UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    UserMessageTooLong,
}

/// One increment of bot output
///
/// Accumulated, never persisted: the platform concatenates `text`
/// fragments unless `is_replace_response` resets the accumulation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialResponse {
    /// The next text fragment
    pub text: String,

    /// Arbitrary structured payload, used for tool calling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// A file emitted by the bot alongside its text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,

    /// Marks this fragment as a suggested reply instead of response text
    #[serde(default)]
    pub is_suggested_reply: bool,

    /// Discards all previously emitted text and starts over
    #[serde(default)]
    pub is_replace_response: bool,
}

impl PartialResponse {
    /// A plain text fragment
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A fragment that replaces everything emitted so far
    pub fn replace(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_replace_response: true,
            ..Self::default()
        }
    }

    /// A suggested reply
    pub fn suggested_reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_suggested_reply: true,
            ..Self::default()
        }
    }

    /// A structured data payload
    pub fn json(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// A file reference
    pub fn file(attachment: Attachment) -> Self {
        Self {
            attachment: Some(attachment),
            ..Self::default()
        }
    }
}

/// A terminal-or-recoverable error signal from a bot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Whether the platform may offer the user a retry
    #[serde(default)]
    pub allow_retry: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
}

impl ErrorResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self) -> Self {
        self.allow_retry = true;
        self
    }
}

/// Out-of-band control event, conventionally first in a response stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaResponse {
    /// Whether the platform should generate suggested replies
    #[serde(default)]
    pub suggested_replies: bool,

    #[serde(default)]
    pub content_type: ContentType,

    /// Ask the platform to re-fetch this bot's settings
    #[serde(default)]
    pub refetch_settings: bool,
}

impl Default for MetaResponse {
    fn default() -> Self {
        Self {
            suggested_replies: false,
            content_type: ContentType::default(),
            refetch_settings: false,
        }
    }
}

/// Result of uploading an attachment through the storage collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentUploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_ref: Option<String>,
}

/// JSON Schema fragment describing a tool's parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

/// Declared callable schema passed to a peer bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function declaration inside a [`ToolDefinition`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParametersDefinition,
}

/// A model-issued call instance within one federation round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionCall,
}

/// Name and serialized arguments of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object; may arrive in fragments that are
    /// concatenated by call id
    #[serde(default)]
    pub arguments: String,
}

/// Caller-supplied result for one tool call, keyed by call id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultDefinition {
    pub role: String,
    pub name: String,
    pub tool_call_id: String,
    pub content: String,
}

/// A named amount to authorize or capture against the current request's
/// billing context; valid only while the originating request is in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostItem {
    pub label: String,
    pub amount_usd_milli_cents: u64,
}

impl CostItem {
    pub fn new(label: impl Into<String>, amount_usd_milli_cents: u64) -> Self {
        Self {
            label: label.into(),
            amount_usd_milli_cents,
        }
    }
}
