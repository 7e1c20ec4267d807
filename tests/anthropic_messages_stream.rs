mod common;

use std::sync::Arc;

use common::{Reply, ScriptedTransport, event};
use nagare_llm::provider::anthropic_messages::AnthropicMessagesProvider;
use nagare_llm::{ChatRequest, LLMError, LLMProvider, Message, StreamState, ToolCall};
use tokio_util::sync::CancellationToken;

fn provider(transport: Arc<ScriptedTransport>) -> AnthropicMessagesProvider {
    AnthropicMessagesProvider::new(transport, "sk-ant-test").with_default_model("claude-sonnet-4")
}

fn request() -> ChatRequest {
    ChatRequest::new(vec![Message::user("hi")])
}

#[tokio::test]
async fn text_stream_ends_on_message_stop() {
    let transport = Arc::new(ScriptedTransport::sse(&[
        &event(
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_1","model":"claude-sonnet-4","usage":{"input_tokens":9,"output_tokens":1}}}"#,
        ),
        &event(
            "content_block_start",
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        ),
        &event("ping", r#"{"type":"ping"}"#),
        &event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        ),
        &event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there"}}"#,
        ),
        &event("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
        &event(
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#,
        ),
        &event("message_stop", r#"{"type":"message_stop"}"#),
    ]));

    let mut stream = provider(transport.clone())
        .stream_chat(request(), CancellationToken::new())
        .await
        .expect("stream");

    let mut text = String::new();
    while let Some(chunk) = stream.recv().await.expect("chunk") {
        text.push_str(&chunk.text_delta);
    }
    assert_eq!(text, "Hi there");
    assert_eq!(stream.state(), StreamState::Completed);

    let response = stream.response().expect("response");
    assert_eq!(response.text, "Hi there");
    assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
    let usage = response.usage.clone().expect("usage");
    assert_eq!(usage.prompt_tokens, Some(9));
    assert_eq!(usage.completion_tokens, Some(4));
    assert_eq!(usage.total_tokens, Some(13));

    let sent = &transport.requests()[0];
    assert_eq!(sent.url, "https://api.anthropic.com/v1/messages");
    assert_eq!(
        sent.headers.get("x-api-key").map(String::as_str),
        Some("sk-ant-test")
    );
    assert_eq!(
        sent.headers.get("anthropic-version").map(String::as_str),
        Some("2023-06-01")
    );
}

#[tokio::test]
async fn tool_use_arguments_stream_as_json_fragments() {
    let transport = Arc::new(ScriptedTransport::sse(&[
        &event(
            "content_block_start",
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        ),
        &event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Checking."}}"#,
        ),
        &event("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
        &event(
            "content_block_start",
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"get_weather","input":{}}}"#,
        ),
        &event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":""}}"#,
        ),
        &event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\": "}}"#,
        ),
        &event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"Paris\"}"}}"#,
        ),
        &event("content_block_stop", r#"{"type":"content_block_stop","index":1}"#),
        &event(
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":20}}"#,
        ),
        &event("message_stop", r#"{"type":"message_stop"}"#),
    ]));

    let response = provider(transport)
        .stream_chat(request(), CancellationToken::new())
        .await
        .expect("stream")
        .collect()
        .await
        .expect("response");

    assert_eq!(response.text, "Checking.");
    assert_eq!(response.finish_reason.as_deref(), Some("tool_use"));
    assert_eq!(
        response.tool_calls,
        vec![ToolCall {
            id: "toolu_01".to_string(),
            name: "get_weather".to_string(),
            arguments: "{\"city\": \"Paris\"}".to_string(),
        }]
    );
}

#[tokio::test]
async fn error_event_fails_the_stream() {
    let transport = Arc::new(ScriptedTransport::sse(&[
        &event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        ),
        &event(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ),
    ]));
    let mut stream = provider(transport)
        .stream_chat(request(), CancellationToken::new())
        .await
        .expect("stream");

    stream.recv().await.expect("text").expect("chunk");
    match stream.recv().await {
        Err(LLMError::Api {
            status, message, ..
        }) => {
            assert_eq!(status, None);
            assert!(message.contains("Overloaded"), "unexpected message: {message}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(stream.state(), StreamState::Failed);
    assert!(stream.response().is_none());
}

#[tokio::test]
async fn tool_results_are_sent_as_user_tool_result_blocks() {
    let transport = Arc::new(ScriptedTransport::sse(&[
        &event(
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":1}}"#,
        ),
        &event("message_stop", r#"{"type":"message_stop"}"#),
    ]));
    let call = ToolCall {
        id: "toolu_01".to_string(),
        name: "get_weather".to_string(),
        arguments: "{\"city\":\"Paris\"}".to_string(),
    };
    let request = ChatRequest::new(vec![
        Message::user("weather?"),
        Message::assistant_with_tool_calls("", vec![call]),
        Message::tool_result("toolu_01", "sunny"),
    ]);

    provider(transport.clone())
        .stream_chat(request, CancellationToken::new())
        .await
        .expect("stream")
        .collect()
        .await
        .expect("response");

    let sent = &transport.requests()[0];
    let body: serde_json::Value =
        serde_json::from_slice(sent.body.as_deref().expect("body")).expect("json");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 4096);
    assert_eq!(body["messages"][1]["content"][0]["type"], "tool_use");
    assert_eq!(body["messages"][1]["content"][0]["input"]["city"], "Paris");
    assert_eq!(body["messages"][2]["role"], "user");
    assert_eq!(body["messages"][2]["content"][0]["type"], "tool_result");
    assert_eq!(body["messages"][2]["content"][0]["tool_use_id"], "toolu_01");
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![Reply::Status(
        401,
        r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#
            .to_string(),
    )]));

    let err = provider(transport.clone())
        .chat(request(), CancellationToken::new())
        .await
        .expect_err("auth error");

    assert_eq!(err.status(), Some(401));
    assert_eq!(transport.attempts(), 1);
}
