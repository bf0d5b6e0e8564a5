//! Function-calling round trip tests against a mocked peer bot

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use botframe_core::protocol::{
    FunctionDefinition, ParametersDefinition, ProtocolMessage, QueryRequest, ToolDefinition,
};
use botframe_core::{ClientError, FederationClient, ToolExecutable};

fn sse(frames: &[(&str, &str)]) -> ResponseTemplate {
    let body: String = frames
        .iter()
        .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
        .collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn query(content: &str) -> QueryRequest {
    QueryRequest::new(vec![ProtocolMessage::user(content)])
}

fn add_tool() -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: "add".to_string(),
            description: "Add two integers".to_string(),
            parameters: ParametersDefinition {
                kind: "object".to_string(),
                properties: [
                    ("a".to_string(), json!({"type": "integer"})),
                    ("b".to_string(), json!({"type": "integer"})),
                ]
                .into_iter()
                .collect(),
                required: Some(vec!["a".to_string(), "b".to_string()]),
            },
        },
    }
}

fn add_executable() -> ToolExecutable {
    ToolExecutable::new("add", |args: Value| async move {
        let a = args["a"].as_i64().unwrap_or(0);
        let b = args["b"].as_i64().unwrap_or(0);
        Ok(json!({"sum": a + b}))
    })
}

const TOOL_CALL_STREAM: &[(&str, &str)] = &[
    (
        "json",
        r#"{"tool_calls": [{"id": "call-1", "type": "function", "function": {"name": "add", "arguments": "{\"a\": 19,"}}]}"#,
    ),
    (
        "json",
        r#"{"tool_calls": [{"function": {"arguments": " \"b\": 23}"}}]}"#,
    ),
    ("done", "{}"),
];

#[tokio::test]
async fn tool_round_trip_returns_the_second_call_result() {
    let server = MockServer::start().await;

    // First call advertises tools and gets tool calls back.
    Mock::given(method("POST"))
        .and(path("/bot/solver"))
        .respond_with(sse(TOOL_CALL_STREAM))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Second call carries the executed results.
    Mock::given(method("POST"))
        .and(path("/bot/solver"))
        .and(body_partial_json(json!({
            "tool_results": [{"role": "tool", "name": "add", "tool_call_id": "call-1"}]
        })))
        .respond_with(sse(&[("text", r#"{"text": "The sum is 42."}"#), ("done", "{}")]))
        .mount(&server)
        .await;

    let client = FederationClient::new(server.uri(), "test-key");
    let result = client
        .invoke_with_tools(query("what is 19 + 23?"), "solver", vec![add_tool()], vec![
            add_executable(),
        ])
        .await
        .unwrap();
    assert_eq!(result.text, "The sum is 42.");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn no_tool_calls_short_circuits_to_one_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot/solver"))
        .respond_with(sse(&[
            ("text", r#"{"text": "No tools needed."}"#),
            ("done", "{}"),
        ]))
        .mount(&server)
        .await;

    let client = FederationClient::new(server.uri(), "test-key");
    let result = client
        .invoke_with_tools(query("hello"), "solver", vec![add_tool()], vec![
            add_executable(),
        ])
        .await
        .unwrap();
    assert_eq!(result.text, "No tools needed.");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_tool_name_fails_before_the_second_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot/solver"))
        .respond_with(sse(TOOL_CALL_STREAM))
        .mount(&server)
        .await;

    let client = FederationClient::new(server.uri(), "test-key");
    let error = client
        .invoke_with_tools(query("add"), "solver", vec![add_tool()], vec![])
        .await
        .unwrap_err();
    assert!(matches!(error, ClientError::UnknownTool(ref name) if name == "add"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failing_executable_wraps_the_underlying_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot/solver"))
        .respond_with(sse(TOOL_CALL_STREAM))
        .mount(&server)
        .await;

    let broken = ToolExecutable::new("add", |_args: Value| async move {
        Err::<Value, _>(anyhow::anyhow!("arithmetic unit offline"))
    });
    let client = FederationClient::new(server.uri(), "test-key");
    let error = client
        .invoke_with_tools(query("add"), "solver", vec![add_tool()], vec![broken])
        .await
        .unwrap_err();
    match error {
        ClientError::ToolExecutionFailed { name, source } => {
            assert_eq!(name, "add");
            assert!(source.to_string().contains("arithmetic unit offline"));
        }
        other => panic!("expected tool failure, got {other}"),
    }
}
