//! Outbound federation client
//!
//! Calls a peer bot over the same streamed event protocol the dispatcher
//! serves, decoding frames through the [`Accumulator`]. Transport
//! failures before the first event are retried with backoff; once any
//! event has arrived the stream is never silently replayed, since a
//! replay would duplicate accumulated text.

pub mod error;
pub mod tools;

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::AccessKey;
use crate::protocol::{
    Accumulator, BotEvent, BotMessage, Frame, Materialized, MetaResponse, PartialResponse,
    QueryRequest, SettingsResponse, ToolCallDefinition, ToolDefinition, ToolResultDefinition,
};

pub use error::ClientError;
pub use tools::ToolExecutable;

/// Retry bounds for connecting a call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Decoded output items from one peer call
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BotMessage, ClientError>> + Send>>;

#[derive(Serialize)]
struct QueryPayload<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(flatten)]
    request: &'a QueryRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCallDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_results: Option<&'a [ToolResultDefinition]>,
}

/// Client for calling peer bots
#[derive(Clone)]
pub struct FederationClient {
    http: reqwest::Client,
    base_url: String,
    api_key: AccessKey,
    retry: RetryPolicy,
}

impl FederationClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<AccessKey>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn bot_url(&self, target_bot: &str) -> String {
        format!("{}/bot/{}", self.base_url, target_bot)
    }

    /// Open a streamed call to `target_bot`.
    ///
    /// Nothing is sent until the first item is pulled. Peer error events
    /// surface as [`ClientError::Bot`]; protocol violations end the
    /// stream with [`ClientError::Protocol`] and are reported back to
    /// the peer's error endpoint.
    pub fn open_call(&self, request: QueryRequest, target_bot: &str) -> MessageStream {
        self.open_call_with_tools(request, target_bot, None, None, None)
    }

    fn open_call_with_tools(
        &self,
        request: QueryRequest,
        target_bot: &str,
        tools: Option<Vec<ToolDefinition>>,
        tool_calls: Option<Vec<ToolCallDefinition>>,
        tool_results: Option<Vec<ToolResultDefinition>>,
    ) -> MessageStream {
        type EventSource =
            Pin<Box<dyn Stream<Item = Result<Frame, ClientError>> + Send>>;

        enum CallState {
            Connect { attempt: u32 },
            Streaming { frames: EventSource, acc: Accumulator },
            Ended,
        }

        let client = self.clone();
        let target = target_bot.to_string();

        let items = stream::unfold(CallState::Connect { attempt: 1 }, move |mut state| {
            let client = client.clone();
            let target = target.clone();
            let request = request.clone();
            let tools = tools.clone();
            let tool_calls = tool_calls.clone();
            let tool_results = tool_results.clone();
            async move {
                loop {
                    match state {
                        CallState::Connect { attempt } => {
                            let connected = client
                                .connect(
                                    &request,
                                    &target,
                                    tools.as_deref(),
                                    tool_calls.as_deref(),
                                    tool_results.as_deref(),
                                )
                                .await;
                            match connected {
                                Ok(frames) => {
                                    state = CallState::Streaming {
                                        frames,
                                        acc: Accumulator::new(),
                                    };
                                }
                                Err(error) if attempt < client.retry.max_tries => {
                                    warn!(bot = %target, attempt, %error, "connect failed, retrying");
                                    tokio::time::sleep(client.retry.backoff).await;
                                    state = CallState::Connect {
                                        attempt: attempt + 1,
                                    };
                                }
                                Err(error) => {
                                    return Some((Err(error), CallState::Ended));
                                }
                            }
                        }
                        CallState::Streaming { mut frames, mut acc } => {
                            match frames.next().await {
                                Some(Ok(frame)) => match frame.decode() {
                                    Ok(event) => match acc.apply(event) {
                                        Ok(Some(BotMessage::Error(error))) => {
                                            return Some((
                                                Err(ClientError::Bot {
                                                    text: error.text,
                                                    allow_retry: error.allow_retry,
                                                    error_type: error.error_type,
                                                }),
                                                CallState::Ended,
                                            ));
                                        }
                                        Ok(Some(item)) => {
                                            return Some((
                                                Ok(item),
                                                CallState::Streaming { frames, acc },
                                            ));
                                        }
                                        Ok(None) => {
                                            if acc.is_done() {
                                                return None;
                                            }
                                            state = CallState::Streaming { frames, acc };
                                        }
                                        Err(violation) => {
                                            client.spawn_error_report(
                                                &target,
                                                violation.to_string(),
                                            );
                                            return Some((
                                                Err(ClientError::Protocol(violation)),
                                                CallState::Ended,
                                            ));
                                        }
                                    },
                                    Err(violation) => {
                                        client
                                            .spawn_error_report(&target, violation.to_string());
                                        return Some((
                                            Err(ClientError::Protocol(violation)),
                                            CallState::Ended,
                                        ));
                                    }
                                },
                                Some(Err(error)) => {
                                    return Some((Err(error), CallState::Ended));
                                }
                                None => {
                                    let result = acc.finalize().map(|_| ());
                                    return match result {
                                        Ok(()) => None,
                                        Err(violation) => Some((
                                            Err(ClientError::Protocol(violation)),
                                            CallState::Ended,
                                        )),
                                    };
                                }
                            }
                        }
                        CallState::Ended => return None,
                    }
                }
            }
        });
        Box::pin(items)
    }

    async fn connect(
        &self,
        request: &QueryRequest,
        target_bot: &str,
        tools: Option<&[ToolDefinition]>,
        tool_calls: Option<&[ToolCallDefinition]>,
        tool_results: Option<&[ToolResultDefinition]>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Frame, ClientError>> + Send>>, ClientError> {
        let payload = QueryPayload {
            kind: "query",
            request,
            tools,
            tool_calls,
            tool_results,
        };
        let response = self
            .http
            .post(self.bot_url(target_bot))
            .bearer_auth(self.api_key.expose_secret())
            .header("Accept", "text/event-stream")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(bot = %target_bot, "peer call connected");

        let frames = response.bytes_stream().eventsource().map(|item| {
            item.map(|sse| Frame::new(sse.event, sse.data))
                .map_err(|e| ClientError::Network(e.to_string()))
        });
        Ok(Box::pin(frames))
    }

    /// Drive a call to completion and return the merged result.
    ///
    /// Produces exactly what a consumer would get by accumulating every
    /// item of [`open_call`](Self::open_call) by hand.
    pub async fn wait_for_final(
        &self,
        request: QueryRequest,
        target_bot: &str,
    ) -> Result<Materialized, ClientError> {
        let stream = self.open_call(request, target_bot);
        let materialized = collect_stream(stream).await?;
        if materialized.text.is_empty() && materialized.data.is_none() {
            return Err(ClientError::EmptyResponse(target_bot.to_string()));
        }
        Ok(materialized)
    }

    pub(crate) async fn wait_for_final_with_tools(
        &self,
        request: QueryRequest,
        target_bot: &str,
        tools: Option<Vec<ToolDefinition>>,
        tool_calls: Option<Vec<ToolCallDefinition>>,
        tool_results: Option<Vec<ToolResultDefinition>>,
    ) -> Result<Materialized, ClientError> {
        let stream =
            self.open_call_with_tools(request, target_bot, tools, tool_calls, tool_results);
        collect_stream(stream).await
    }

    /// Fetch the peer bot's settings
    pub async fn fetch_settings(
        &self,
        target_bot: &str,
    ) -> Result<SettingsResponse, ClientError> {
        let response = self
            .http
            .post(self.bot_url(target_bot))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "version": crate::protocol::PROTOCOL_VERSION, "type": "settings" }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    /// Tell a peer bot its stream violated the protocol
    pub async fn report_error(&self, target_bot: &str, message: &str) -> Result<(), ClientError> {
        let request = crate::protocol::ReportErrorRequest {
            version: crate::protocol::PROTOCOL_VERSION.to_string(),
            message: message.to_string(),
            metadata: Default::default(),
        };
        self.post_report(target_bot, "report_error", &request).await
    }

    /// Forward user feedback to a peer bot
    pub async fn report_feedback(
        &self,
        target_bot: &str,
        request: &crate::protocol::ReportFeedbackRequest,
    ) -> Result<(), ClientError> {
        self.post_report(target_bot, "report_feedback", request).await
    }

    /// Forward a user reaction to a peer bot
    pub async fn report_reaction(
        &self,
        target_bot: &str,
        request: &crate::protocol::ReportReactionRequest,
    ) -> Result<(), ClientError> {
        self.post_report(target_bot, "report_reaction", request).await
    }

    async fn post_report<T: Serialize>(
        &self,
        target_bot: &str,
        kind: &str,
        request: &T,
    ) -> Result<(), ClientError> {
        let mut body = serde_json::to_value(request).map_err(|e| {
            ClientError::Network(format!("could not serialize report: {e}"))
        })?;
        body["type"] = serde_json::Value::String(kind.to_string());
        let response = self
            .http
            .post(self.bot_url(target_bot))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn spawn_error_report(&self, target_bot: &str, message: String) {
        let client = self.clone();
        let target = target_bot.to_string();
        tokio::spawn(async move {
            if let Err(error) = client.report_error(&target, &message).await {
                warn!(bot = %target, %error, "error report failed");
            }
        });
    }
}

/// Accumulate a full item stream into its materialized result.
///
/// Items are replayed through a fresh [`Accumulator`] so streamed and
/// materialized consumers share one set of merge rules.
async fn collect_stream(mut stream: MessageStream) -> Result<Materialized, ClientError> {
    let mut acc = Accumulator::new();
    while let Some(item) = stream.next().await {
        let event = match item? {
            BotMessage::Partial(partial) => partial_event(partial),
            BotMessage::Meta(MetaResponse {
                suggested_replies,
                content_type,
                refetch_settings,
            }) => BotEvent::Meta {
                suggested_replies,
                content_type,
                refetch_settings,
            },
            // open_call surfaces peer errors as Err items
            BotMessage::Error(error) => {
                return Err(ClientError::Bot {
                    text: error.text,
                    allow_retry: error.allow_retry,
                    error_type: error.error_type,
                });
            }
        };
        acc.apply(event).map_err(ClientError::Protocol)?;
    }
    Ok(acc.materialize())
}

fn partial_event(partial: PartialResponse) -> BotEvent {
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
