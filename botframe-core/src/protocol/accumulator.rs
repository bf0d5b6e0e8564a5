//! Partial-response accumulation
//!
//! A plain state machine from (accumulator state, next event) to
//! (new state, optionally emitted item). Events must be applied in strict
//! arrival order: `replace_response` semantics are order-dependent.

use serde_json::Value;

use crate::protocol::error::ProtocolError;
use crate::protocol::events::BotEvent;
use crate::protocol::types::{ContentType, ErrorResponse, MetaResponse, PartialResponse};

/// One normalized output item produced while consuming a stream
#[derive(Debug, Clone, PartialEq)]
pub enum BotMessage {
    /// An incremental response fragment (text, data, suggested reply, or
    /// file)
    Partial(PartialResponse),
    /// Call-scoped settings from the stream's first event
    Meta(MetaResponse),
    /// An application error reported by the bot
    Error(ErrorResponse),
}

/// The fully merged result of consuming an entire event stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Materialized {
    /// Concatenation of all text fragments after the last replace
    pub text: String,
    /// The most recent structured payload
    pub data: Option<Value>,
    pub suggested_replies: Vec<String>,
    pub content_type: ContentType,
}

/// Merges one call's decoded events into the materialized view of a
/// response.
#[derive(Debug, Default)]
pub struct Accumulator {
    chunks: Vec<String>,
    data: Option<Value>,
    suggested_replies: Vec<String>,
    content_type: ContentType,
    events_applied: u64,
    errored: bool,
    done: bool,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `done` sentinel has been applied
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Apply the next event in arrival order.
    ///
    /// Returns the item to surface to a streaming consumer, if any. Events
    /// arriving after `done` are protocol violations. An `error` event is
    /// surfaced as [`BotMessage::Error`] and terminates accumulation:
    /// whether it is fatal is carried in its `allow_retry` flag, and only
    /// the mandated trailing `done` is still accepted afterwards.
    pub fn apply(&mut self, event: BotEvent) -> Result<Option<BotMessage>, ProtocolError> {
        if self.done {
            return Err(ProtocolError::EventAfterDone(event.name().to_string()));
        }
        // Keep-alives are invisible: they neither count toward the
        // meta-first rule nor reach consumers.
        if matches!(event, BotEvent::Ping) {
            return Ok(None);
        }
        if self.errored && !matches!(event, BotEvent::Done) {
            return Err(ProtocolError::EventAfterError(event.name().to_string()));
        }
        self.events_applied += 1;

        match event {
            BotEvent::Text { text } => {
                self.chunks.push(text.clone());
                Ok(Some(BotMessage::Partial(PartialResponse::text(text))))
            }
            BotEvent::ReplaceResponse { text } => {
                self.chunks.clear();
                self.data = None;
                self.chunks.push(text.clone());
                Ok(Some(BotMessage::Partial(PartialResponse::replace(text))))
            }
            BotEvent::SuggestedReply { text } => {
                self.suggested_replies.push(text.clone());
                Ok(Some(BotMessage::Partial(PartialResponse::suggested_reply(
                    text,
                ))))
            }
            BotEvent::Json(value) => {
                self.data = Some(value.clone());
                Ok(Some(BotMessage::Partial(PartialResponse::json(value))))
            }
            BotEvent::File(attachment) => {
                Ok(Some(BotMessage::Partial(PartialResponse::file(attachment))))
            }
            BotEvent::Meta {
                suggested_replies,
                content_type,
                refetch_settings,
            } => {
                // Only a meta that opens the stream takes effect.
                if self.events_applied != 1 {
                    return Ok(None);
                }
                self.content_type = content_type;
                Ok(Some(BotMessage::Meta(MetaResponse {
                    suggested_replies,
                    content_type,
                    refetch_settings,
                })))
            }
            BotEvent::Error {
                text,
                allow_retry,
                error_type,
            } => {
                self.errored = true;
                Ok(Some(BotMessage::Error(ErrorResponse {
                    text,
                    allow_retry,
                    error_type,
                })))
            }
            BotEvent::Done => {
                self.done = true;
                Ok(None)
            }
            BotEvent::Ping => unreachable!("handled above"),
        }
    }

    /// The fully merged view of everything applied so far
    pub fn materialize(&self) -> Materialized {
        Materialized {
            text: self.chunks.concat(),
            data: self.data.clone(),
            suggested_replies: self.suggested_replies.clone(),
            content_type: self.content_type,
        }
    }

    /// Consume the accumulator, requiring that the stream was finalized
    pub fn finalize(self) -> Result<Materialized, ProtocolError> {
        if !self.done {
            return Err(ProtocolError::MissingDone);
        }
        Ok(Materialized {
            text: self.chunks.concat(),
            data: self.data,
            suggested_replies: self.suggested_replies,
            content_type: self.content_type,
        })
    }
}
