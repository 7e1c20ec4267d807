use serde_json::Value;

use crate::error::LLMError;
use crate::types::{ChatResponse, ProviderMetadata, ToolCall, synthesize_tool_call_id};

use super::types::GeminiGenerateContentResponse;

/// Maps a buffered GenerateContent body. Only the first candidate is read; Gemini
/// returns no call ids so they are synthesized from `started_at`.
pub(crate) fn map_response(
    raw: Value,
    provider: &'static str,
    endpoint: String,
    started_at: i64,
) -> Result<ChatResponse, LLMError> {
    let resp: GeminiGenerateContentResponse = serde_json::from_value(raw.clone())
        .map_err(|err| LLMError::decode(provider, format!("failed to parse Gemini response: {err}")))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;
    if let Some(candidate) = resp.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = &part.function_call {
                tool_calls.push(ToolCall {
                    id: synthesize_tool_call_id(started_at, tool_calls.len()),
                    name: call.name.clone(),
                    arguments: call.arguments(),
                });
            } else if let Some(chunk) = part.text.filter(|_| part.thought != Some(true)) {
                text.push_str(&chunk);
            }
        }
    }

    Ok(ChatResponse {
        text,
        tool_calls,
        finish_reason,
        usage: resp.usage_metadata.map(Into::into),
        model: resp.model_version,
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.response_id,
            endpoint: Some(endpoint),
            raw: Some(raw),
        },
    })
}
