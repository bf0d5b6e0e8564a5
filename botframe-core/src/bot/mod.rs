//! Serving side of the bot protocol
//!
//! A bot is any type implementing [`BotHandler`]. The [`Dispatcher`]
//! validates inbound requests, runs the configured normalization passes,
//! invokes the handler, and frames the handler's replies as server-sent
//! events.

pub mod attachments;
pub mod billing;
pub mod context;
pub mod dispatcher;
pub mod error;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::protocol::{
    ErrorResponse, MetaResponse, PartialResponse, QueryRequest, ReportErrorRequest,
    ReportFeedbackRequest, ReportReactionRequest, SettingsRequest, SettingsResponse,
};

pub use attachments::UploadSpec;
pub use billing::{BillingSink, CostUsage, HttpBilling, NullBilling};
pub use context::RequestContext;
pub use dispatcher::{Dispatcher, FrameStream};
pub use error::DispatchError;

/// One item of a handler's streamed reply
#[derive(Debug, Clone, PartialEq)]
pub enum BotReply {
    Partial(PartialResponse),
    Error(ErrorResponse),
    Meta(MetaResponse),
}

impl From<PartialResponse> for BotReply {
    fn from(partial: PartialResponse) -> Self {
        BotReply::Partial(partial)
    }
}

impl From<ErrorResponse> for BotReply {
    fn from(error: ErrorResponse) -> Self {
        BotReply::Error(error)
    }
}

impl From<MetaResponse> for BotReply {
    fn from(meta: MetaResponse) -> Self {
        BotReply::Meta(meta)
    }
}

/// Lazily produced handler output; an `Err` item aborts the response
/// with a generic error frame.
pub type ReplyStream = Pin<Box<dyn Stream<Item = anyhow::Result<BotReply>> + Send>>;

/// Behavior of a served bot.
///
/// Implement the `_with_context` variants to reach the request-scoped
/// operations (attachment upload, cost reporting); the plain variants
/// are simpler to write and are what the defaults delegate to.
#[async_trait]
pub trait BotHandler: Send + Sync + 'static {
    /// Produce the streamed reply to a user query
    async fn get_response(&self, request: QueryRequest) -> ReplyStream;

    async fn get_response_with_context(
        &self,
        request: QueryRequest,
        _context: RequestContext,
    ) -> ReplyStream {
        self.get_response(request).await
    }

    /// Settings the platform should apply to this bot
    async fn get_settings(&self, _request: SettingsRequest) -> SettingsResponse {
        SettingsResponse::default()
    }

    async fn get_settings_with_context(
        &self,
        request: SettingsRequest,
        _context: RequestContext,
    ) -> SettingsResponse {
        self.get_settings(request).await
    }

    async fn on_feedback(&self, _request: ReportFeedbackRequest) {}

    async fn on_feedback_with_context(
        &self,
        request: ReportFeedbackRequest,
        _context: RequestContext,
    ) {
        self.on_feedback(request).await;
    }

    async fn on_reaction(&self, _request: ReportReactionRequest) {}

    async fn on_reaction_with_context(
        &self,
        request: ReportReactionRequest,
        _context: RequestContext,
    ) {
        self.on_reaction(request).await;
    }

    /// Called when the platform reports a problem with this bot's output
    async fn on_error(&self, request: ReportErrorRequest) {
        tracing::error!(message = %request.message, "platform reported an error");
    }

    async fn on_error_with_context(&self, request: ReportErrorRequest, _context: RequestContext) {
        self.on_error(request).await;
    }
}
