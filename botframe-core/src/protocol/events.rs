//! Wire codec for the streamed event framing
//!
//! Each unit of the stream is a named event plus a JSON body. Encoding
//! produces a [`Frame`] ready to be written as a server-sent event;
//! decoding maps a received frame back to a [`BotEvent`], rejecting
//! unknown names and malformed bodies as [`ProtocolError`]s rather than
//! dropping them.

use serde::Deserialize;
use serde_json::json;

use crate::protocol::error::ProtocolError;
use crate::protocol::types::{Attachment, ContentType, ErrorType};

/// One decoded unit of a response stream
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    /// Append a text fragment
    Text { text: String },
    /// Discard accumulated text and data, start over with this fragment
    ReplaceResponse { text: String },
    /// A suggested reply; contributes no response text
    SuggestedReply { text: String },
    /// Replace the structured data payload
    Json(serde_json::Value),
    /// A file emitted alongside the response text
    File(Attachment),
    /// Call-scoped settings; meaningful only as the first event
    Meta {
        suggested_replies: bool,
        content_type: ContentType,
        refetch_settings: bool,
    },
    /// Application error; terminates accumulation
    Error {
        text: Option<String>,
        allow_retry: bool,
        error_type: Option<ErrorType>,
    },
    /// Stream sentinel; no payload
    Done,
    /// Transport keep-alive; carries nothing and is skipped by consumers
    Ping,
}

impl BotEvent {
    /// The wire name of this event
    pub fn name(&self) -> &'static str {
        match self {
            BotEvent::Text { .. } => "text",
            BotEvent::ReplaceResponse { .. } => "replace_response",
            BotEvent::SuggestedReply { .. } => "suggested_reply",
            BotEvent::Json(_) => "json",
            BotEvent::File(_) => "file",
            BotEvent::Meta { .. } => "meta",
            BotEvent::Error { .. } => "error",
            BotEvent::Done => "done",
            BotEvent::Ping => "ping",
        }
    }

    /// Encode this event as a wire frame
    pub fn encode(&self) -> Frame {
        let data = match self {
            BotEvent::Text { text }
            | BotEvent::ReplaceResponse { text }
            | BotEvent::SuggestedReply { text } => json!({ "text": text }).to_string(),
            BotEvent::Json(value) => value.to_string(),
            BotEvent::File(attachment) => {
                serde_json::to_string(attachment).unwrap_or_else(|_| "{}".to_string())
            }
            BotEvent::Meta {
                suggested_replies,
                content_type,
                refetch_settings,
            } => json!({
                "suggested_replies": suggested_replies,
                "content_type": content_type,
                "refetch_settings": refetch_settings,
            })
            .to_string(),
            BotEvent::Error {
                text,
                allow_retry,
                error_type,
            } => {
                let mut body = json!({ "allow_retry": allow_retry });
                if let Some(text) = text {
                    body["text"] = json!(text);
                }
                if let Some(error_type) = error_type {
                    body["error_type"] = json!(error_type);
                }
                body.to_string()
            }
            BotEvent::Done | BotEvent::Ping => "{}".to_string(),
        };
        Frame {
            name: self.name().to_string(),
            data,
        }
    }
}

/// One unit of the streamed wire encoding: named event plus JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub data: String,
}

#[derive(Deserialize)]
struct TextPayload {
    text: String,
}

fn default_allow_retry() -> bool {
    true
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default = "default_allow_retry")]
    allow_retry: bool,
    #[serde(default)]
    error_type: Option<ErrorType>,
}

#[derive(Deserialize)]
struct MetaPayload {
    #[serde(default)]
    suggested_replies: bool,
    #[serde(default)]
    content_type: ContentType,
    #[serde(default)]
    refetch_settings: bool,
}

impl Frame {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Render this frame in server-sent-event wire form
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name, self.data)
    }

    /// Decode this frame into a protocol event.
    ///
    /// Unknown event names and malformed bodies surface as
    /// [`ProtocolError`]s; an application-level `error` event decodes
    /// successfully into [`BotEvent::Error`].
    pub fn decode(&self) -> Result<BotEvent, ProtocolError> {
        match self.name.as_str() {
            "text" => {
                let payload = self.parse::<TextPayload>()?;
                Ok(BotEvent::Text { text: payload.text })
            }
            "replace_response" => {
                let payload = self.parse::<TextPayload>()?;
                Ok(BotEvent::ReplaceResponse { text: payload.text })
            }
            "suggested_reply" => {
                let payload = self.parse::<TextPayload>()?;
                Ok(BotEvent::SuggestedReply { text: payload.text })
            }
            "json" => {
                let value: serde_json::Value = serde_json::from_str(&self.data)
                    .map_err(|e| ProtocolError::invalid_payload("json", e))?;
                Ok(BotEvent::Json(value))
            }
            "file" => {
                let attachment = self.parse::<Attachment>()?;
                Ok(BotEvent::File(attachment))
            }
            "meta" => {
                let payload = self.parse::<MetaPayload>()?;
                Ok(BotEvent::Meta {
                    suggested_replies: payload.suggested_replies,
                    content_type: payload.content_type,
                    refetch_settings: payload.refetch_settings,
                })
            }
            "error" => {
                let payload = self.parse::<ErrorPayload>()?;
                Ok(BotEvent::Error {
                    text: payload.text,
                    allow_retry: payload.allow_retry,
                    error_type: payload.error_type,
                })
            }
            "done" => Ok(BotEvent::Done),
            "ping" => Ok(BotEvent::Ping),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    fn parse<'a, T: Deserialize<'a>>(&'a self) -> Result<T, ProtocolError> {
        serde_json::from_str(&self.data).map_err(|e| ProtocolError::invalid_payload(&self.name, e))
    }
}
