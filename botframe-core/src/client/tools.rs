//! Function-calling round trip against a peer bot
//!
//! The first call advertises the available tools; any tool calls the
//! peer emits are matched to caller-supplied executables by name,
//! executed locally, and their results are sent back in a second call
//! whose merged response is returned.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{Future, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::client::error::ClientError;
use crate::client::FederationClient;
use crate::protocol::{
    Accumulator, BotEvent, BotMessage, FunctionCall, Materialized, MetaResponse, QueryRequest,
    ToolCallDefinition, ToolDefinition, ToolResultDefinition,
};

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// A locally runnable implementation of a declared tool
#[derive(Clone)]
pub struct ToolExecutable {
    name: String,
    func: Arc<ToolFn>,
}

impl ToolExecutable {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |args| Box::pin(func(args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, arguments: Value) -> anyhow::Result<Value> {
        (self.func)(arguments).await
    }
}

/// One streamed fragment of a tool call; later fragments extend the
/// arguments of the call they follow
#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    tool_type: Option<String>,
    #[serde(default)]
    function: FunctionFragment,
}

#[derive(Deserialize, Default)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ToolCallChunk {
    #[serde(default)]
    tool_calls: Vec<ToolCallFragment>,
}

fn absorb_fragments(calls: &mut Vec<ToolCallDefinition>, payload: &Value) {
    let Ok(chunk) = serde_json::from_value::<ToolCallChunk>(payload.clone()) else {
        return;
    };
    for fragment in chunk.tool_calls {
        match fragment.id.filter(|id| !id.is_empty()) {
            Some(id) => calls.push(ToolCallDefinition {
                id,
                tool_type: fragment.tool_type.unwrap_or_else(|| "function".to_string()),
                function: FunctionCall {
                    name: fragment.function.name.unwrap_or_default(),
                    arguments: fragment.function.arguments.unwrap_or_default(),
                },
            }),
            None => {
                if let Some(open) = calls.last_mut() {
                    if let Some(name) = fragment.function.name {
                        open.function.name.push_str(&name);
                    }
                    if let Some(arguments) = fragment.function.arguments {
                        open.function.arguments.push_str(&arguments);
                    }
                }
            }
        }
    }
}

impl FederationClient {
    /// Run the full function-calling round trip against `target_bot`.
    ///
    /// When the first call produces no tool calls, its merged response
    /// is returned directly.
    pub async fn invoke_with_tools(
        &self,
        request: QueryRequest,
        target_bot: &str,
        tool_defs: Vec<ToolDefinition>,
        executables: Vec<ToolExecutable>,
    ) -> Result<Materialized, ClientError> {
        let mut stream = self.open_call_with_tools(
            request.clone(),
            target_bot,
            Some(tool_defs.clone()),
            None,
            None,
        );

        let mut calls: Vec<ToolCallDefinition> = Vec::new();
        let mut acc = Accumulator::new();
        while let Some(item) = stream.next().await {
            match item? {
                BotMessage::Partial(partial) => {
                    if let Some(data) = &partial.data {
                        absorb_fragments(&mut calls, data);
                    }
                    acc.apply(super::partial_event(partial))
                        .map_err(ClientError::Protocol)?;
                }
                BotMessage::Meta(MetaResponse {
                    suggested_replies,
                    content_type,
                    refetch_settings,
                }) => {
                    acc.apply(BotEvent::Meta {
                        suggested_replies,
                        content_type,
                        refetch_settings,
                    })
                    .map_err(ClientError::Protocol)?;
                }
                BotMessage::Error(error) => {
                    return Err(ClientError::Bot {
                        text: error.text,
                        allow_retry: error.allow_retry,
                        error_type: error.error_type,
                    });
                }
            }
        }

        if calls.is_empty() {
            return Ok(acc.materialize());
        }
        debug!(bot = %target_bot, count = calls.len(), "peer requested tool calls");

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let executable = executables
                .iter()
                .find(|e| e.name == call.function.name)
                .ok_or_else(|| ClientError::UnknownTool(call.function.name.clone()))?;
            let arguments: Value = if call.function.arguments.is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    ClientError::ToolExecutionFailed {
                        name: call.function.name.clone(),
                        source: anyhow::anyhow!("arguments are not valid JSON: {e}"),
                    }
                })?
            };
            let output = executable.run(arguments).await.map_err(|source| {
                ClientError::ToolExecutionFailed {
                    name: call.function.name.clone(),
                    source,
                }
            })?;
            results.push(ToolResultDefinition {
                role: "tool".to_string(),
                name: call.function.name.clone(),
                tool_call_id: call.id.clone(),
                content: output.to_string(),
            });
        }

        self.wait_for_final_with_tools(
            request,
            target_bot,
            Some(tool_defs),
            Some(calls),
            Some(results),
        )
        .await
    }
}
