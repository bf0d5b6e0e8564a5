//! Inbound request dispatch
//!
//! The dispatcher owns one bot handler and turns validated inbound
//! requests into framed event streams. The response stream is lazy: the
//! handler is not invoked until the first frame is pulled, and dropping
//! the stream early closes the request context so in-flight side
//! channels fail instead of leaking.

use std::pin::Pin;
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use tracing::{debug, error, info};

use crate::bot::billing::{BillingSink, NullBilling};
use crate::bot::context::RequestContext;
use crate::bot::error::DispatchError;
use crate::bot::{BotHandler, BotReply, ReplyStream};
use crate::config::BotConfig;
use crate::protocol::{
    combine_bot_messages, enforce_role_alternation, insert_attachment_messages, BotEvent,
    ErrorResponse, Frame, QueryRequest, ReportErrorRequest, ReportFeedbackRequest,
    ReportReactionRequest, SettingsRequest, SettingsResponse,
};

/// Encoded frames for one response, terminated by a `done` frame
pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// Closes the request context when the frame stream is dropped, whether
/// it ran to completion or the consumer walked away early.
struct ScopeGuard {
    context: RequestContext,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.context.close();
    }
}

/// Routes inbound requests to a [`BotHandler`]
pub struct Dispatcher<H: BotHandler> {
    config: Arc<BotConfig>,
    handler: Arc<H>,
    http: reqwest::Client,
    billing: Arc<dyn BillingSink>,
}

impl<H: BotHandler> Dispatcher<H> {
    pub fn new(handler: H, config: BotConfig) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            http: reqwest::Client::new(),
            billing: Arc::new(NullBilling),
        }
    }

    pub fn with_billing(mut self, billing: impl BillingSink) -> Self {
        self.billing = Arc::new(billing);
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Check the request's access credential against the configured
    /// keys. On `Unauthorized` the caller must close the connection
    /// without the handler ever running.
    pub fn validate(&self, request: &QueryRequest) -> Result<(), DispatchError> {
        if self.config.key_accepted(&request.access_key) {
            Ok(())
        } else {
            info!(message_id = %request.message_id, "rejected request with bad access key");
            Err(DispatchError::Unauthorized)
        }
    }

    fn normalize(&self, request: QueryRequest) -> QueryRequest {
        let mut request = request;
        if self.config.insert_attachment_messages {
            request = insert_attachment_messages(&request);
        }
        if self.config.combine_bot_messages {
            request = combine_bot_messages(&request);
        }
        if self.config.enforce_role_alternation {
            request = enforce_role_alternation(&request, &self.config.normalize_policy);
        }
        request
    }

    /// Serve one query as a lazy frame stream.
    ///
    /// The handler's replies are framed one-to-one; a handler failure
    /// becomes a generic error frame with no internal detail, and every
    /// stream ends with a `done` frame.
    pub fn dispatch(&self, request: QueryRequest) -> Result<FrameStream, DispatchError> {
        self.validate(&request)?;
        let request = self.normalize(request);
        let context = RequestContext::for_request(
            &request,
            Arc::clone(&self.config),
            self.http.clone(),
            Arc::clone(&self.billing),
        );
        debug!(message_id = %request.message_id, turns = request.query.len(), "dispatching query");

        enum State<H: BotHandler> {
            Start {
                handler: Arc<H>,
                request: QueryRequest,
                context: RequestContext,
                guard: ScopeGuard,
            },
            Streaming {
                replies: ReplyStream,
                guard: ScopeGuard,
            },
            Finishing {
                guard: ScopeGuard,
            },
            Ended,
        }

        let guard = ScopeGuard {
            context: context.clone(),
        };
        let initial = State::Start {
            handler: Arc::clone(&self.handler),
            request,
            context,
            guard,
        };

        let frames = stream::unfold(initial, |mut state| async move {
            loop {
                match state {
                    State::Start {
                        handler,
                        request,
                        context,
                        guard,
                    } => {
                        let replies = handler.get_response_with_context(request, context).await;
                        state = State::Streaming { replies, guard };
                    }
                    State::Streaming { mut replies, guard } => match replies.next().await {
                        Some(Ok(reply)) => {
                            let frame = reply_frame(reply);
                            return Some((frame, State::Streaming { replies, guard }));
                        }
                        Some(Err(cause)) => {
                            error!(%cause, "handler failed while streaming");
                            let frame = BotEvent::Error {
                                text: Some("The bot ran into an internal problem.".to_string()),
                                allow_retry: true,
                                error_type: None,
                            }
                            .encode();
                            return Some((frame, State::Finishing { guard }));
                        }
                        None => {
                            state = State::Finishing { guard };
                        }
                    },
                    State::Finishing { guard } => {
                        drop(guard);
                        return Some((BotEvent::Done.encode(), State::Ended));
                    }
                    State::Ended => return None,
                }
            }
        });
        Ok(Box::pin(frames))
    }

    /// Answer a settings request. Synchronous from the transport's point
    /// of view, with no request-scoped side channels available.
    pub async fn get_settings(&self, request: SettingsRequest) -> SettingsResponse {
        let context = RequestContext::detached(Arc::clone(&self.config));
        self.handler.get_settings_with_context(request, context).await
    }

    pub async fn report_feedback(&self, request: ReportFeedbackRequest) {
        let context = RequestContext::detached(Arc::clone(&self.config));
        self.handler.on_feedback_with_context(request, context).await;
    }

    pub async fn report_reaction(&self, request: ReportReactionRequest) {
        let context = RequestContext::detached(Arc::clone(&self.config));
        self.handler.on_reaction_with_context(request, context).await;
    }

    pub async fn report_error(&self, request: ReportErrorRequest) {
        let context = RequestContext::detached(Arc::clone(&self.config));
        self.handler.on_error_with_context(request, context).await;
    }
}

fn reply_frame(reply: BotReply) -> Frame {
    let event = match reply {
        BotReply::Meta(meta) => BotEvent::Meta {
            suggested_replies: meta.suggested_replies,
            content_type: meta.content_type,
            refetch_settings: meta.refetch_settings,
        },
        BotReply::Error(ErrorResponse {
            text,
            allow_retry,
            error_type,
        }) => BotEvent::Error {
            text,
            allow_retry,
            error_type,
        },
        BotReply::Partial(partial) => {
            if let Some(attachment) = partial.attachment {
                BotEvent::File(attachment)
            } else if let Some(data) = partial.data {
                BotEvent::Json(data)
            } else if partial.is_suggested_reply {
                BotEvent::SuggestedReply { text: partial.text }
            } else if partial.is_replace_response {
                BotEvent::ReplaceResponse { text: partial.text }
            } else {
                BotEvent::Text { text: partial.text }
            }
        }
    };
    event.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PartialResponse, ProtocolMessage};
    use async_trait::async_trait;

    struct EchoBot;

    #[async_trait]
    impl BotHandler for EchoBot {
        async fn get_response(&self, request: QueryRequest) -> ReplyStream {
            let text = request.last_message().map(|m| m.content.clone()).unwrap_or_default();
            Box::pin(stream::iter(vec![
                Ok(PartialResponse::text(format!("echo: {text}")).into()),
            ]))
        }
    }

    fn query(content: &str, key: &str) -> QueryRequest {
        let mut request = QueryRequest::new(vec![ProtocolMessage::user(content)]);
        request.message_id = "m1".to_string();
        request.access_key = key.to_string();
        request
    }

    #[tokio::test]
    async fn dispatch_frames_reply_and_terminates_with_done() {
        let dispatcher = Dispatcher::new(EchoBot, BotConfig::default());
        let frames: Vec<Frame> = dispatcher
            .dispatch(query("hi", "any"))
            .unwrap()
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "text");
        assert!(frames[0].data.contains("echo: hi"));
        assert_eq!(frames[1].name, "done");
    }

    #[tokio::test]
    async fn bad_key_never_reaches_the_handler() {
        let config = BotConfig::default().with_access_key("right");
        let dispatcher = Dispatcher::new(EchoBot, config);
        assert!(matches!(
            dispatcher.dispatch(query("hi", "wrong")),
            Err(DispatchError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn handler_failure_becomes_generic_error_then_done() {
        struct FailingBot;

        #[async_trait]
        impl BotHandler for FailingBot {
            async fn get_response(&self, _request: QueryRequest) -> ReplyStream {
                Box::pin(stream::iter(vec![
                    Ok(PartialResponse::text("partial").into()),
                    Err(anyhow::anyhow!("database password is hunter2")),
                ]))
            }
        }

        let dispatcher = Dispatcher::new(FailingBot, BotConfig::default());
        let frames: Vec<Frame> = dispatcher
            .dispatch(query("hi", "any"))
            .unwrap()
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].name, "error");
        assert!(!frames[1].data.contains("hunter2"));
        assert_eq!(frames[2].name, "done");
    }
}
