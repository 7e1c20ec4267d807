use serde_json::Value;

use crate::error::LLMError;
use crate::types::{ChatResponse, ProviderMetadata, ToolCall, synthesize_tool_call_id};

use super::types::OpenAiChatResponse;

/// Maps a buffered completion body. Only the first choice is read.
pub(crate) fn map_response(
    raw: Value,
    provider: &'static str,
    endpoint: String,
    started_at: i64,
) -> Result<ChatResponse, LLMError> {
    let resp: OpenAiChatResponse = serde_json::from_value(raw.clone()).map_err(|err| {
        LLMError::decode(provider, format!("failed to parse OpenAI response: {err}"))
    })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;
    if let Some(choice) = resp.choices.into_iter().next() {
        finish_reason = choice.finish_reason;
        if let Some(message) = choice.message {
            if let Some(content) = message.content {
                text = content.into_text();
            }
            for (index, call) in message.tool_calls.unwrap_or_default().into_iter().enumerate() {
                let function = call.function.unwrap_or_default();
                let arguments = function
                    .arguments
                    .filter(|args| !args.trim().is_empty())
                    .unwrap_or_else(|| "{}".to_string());
                tool_calls.push(ToolCall {
                    id: call
                        .id
                        .unwrap_or_else(|| synthesize_tool_call_id(started_at, index)),
                    name: function.name.unwrap_or_default(),
                    arguments,
                });
            }
        }
    }

    Ok(ChatResponse {
        text,
        tool_calls,
        finish_reason,
        usage: resp.usage.map(Into::into),
        model: resp.model,
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.id,
            endpoint: Some(endpoint),
            raw: Some(raw),
        },
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(raw: Value) -> ChatResponse {
        map_response(raw, "openai_chat", "https://api.openai.com/v1/chat/completions".to_string(), 1)
            .expect("response")
    }

    #[test]
    fn maps_text_usage_and_metadata() {
        let response = map(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }));

        assert_eq!(response.text, "Hello there");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(response.usage.and_then(|u| u.total_tokens), Some(12));
        assert_eq!(response.provider.request_id.as_deref(), Some("chatcmpl-123"));
        assert!(response.provider.raw.is_some());
    }

    #[test]
    fn maps_tool_calls_and_fills_gaps() {
        let response = map(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_a", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}},
                        {"type": "function", "function": {"name": "now", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        }));

        assert!(response.text.is_empty());
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].arguments, "{\"q\":\"rust\"}");
        assert_eq!(response.tool_calls[1].id, "call_1_1");
        assert_eq!(response.tool_calls[1].arguments, "{}");
    }

    #[test]
    fn joins_text_parts() {
        let response = map(json!({
            "choices": [{
                "message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}
            }]
        }));
        assert_eq!(response.text, "ab");
    }

    #[test]
    fn rejects_unexpected_shapes() {
        let err = map_response(json!({"choices": "nope"}), "openai_chat", String::new(), 0)
            .expect_err("decode error");
        assert!(matches!(err, LLMError::Decode { .. }));
    }
}
