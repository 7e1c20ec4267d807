use serde_json::Value;

use crate::error::LLMError;
use crate::types::{ChatResponse, ProviderMetadata, ToolCall};

use super::types::{AnthropicContentBlock, AnthropicMessageResponse};

pub(crate) fn map_response(
    raw: Value,
    provider: &'static str,
    endpoint: String,
) -> Result<ChatResponse, LLMError> {
    let resp: AnthropicMessageResponse = serde_json::from_value(raw.clone()).map_err(|err| {
        LLMError::decode(provider, format!("failed to parse Anthropic response: {err}"))
    })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block {
            AnthropicContentBlock::Text { text: chunk } => text.push_str(&chunk),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                let arguments = match input {
                    Some(Value::Null) | None => "{}".to_string(),
                    Some(value) => value.to_string(),
                };
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            AnthropicContentBlock::Other => {}
        }
    }

    Ok(ChatResponse {
        text,
        tool_calls,
        finish_reason: resp.stop_reason,
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
