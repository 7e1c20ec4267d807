use crate::error::LLMError;
use crate::provider::StreamDecoder;
use crate::stream::SseEvent;
use crate::types::{StreamDelta, synthesize_tool_call_id};

use super::error::stream_error;
use super::types::GeminiGenerateContentResponse;

/// Decodes `streamGenerateContent?alt=sse` chunks.
///
/// Every chunk is a partial GenerateContentResponse. Function calls arrive whole, so
/// they are emitted as complete tool calls with ids numbered per response.
#[derive(Debug)]
pub(crate) struct GeminiStreamDecoder {
    started_at: i64,
    calls: usize,
    provider: &'static str,
}

impl GeminiStreamDecoder {
    pub(crate) fn new(provider: &'static str, started_at: i64) -> Self {
        Self {
            started_at,
            calls: 0,
            provider,
        }
    }
}

impl StreamDecoder for GeminiStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamDelta>, LLMError> {
        if let Some(err) = stream_error(&event.data) {
            return Err(err);
        }
        let chunk: GeminiGenerateContentResponse = serde_json::from_value(event.data.clone())
            .map_err(|err| {
                LLMError::decode(self.provider, format!("failed to parse stream chunk: {err}"))
            })?;

        let mut deltas = Vec::new();
        let mut finish = None;
        if let Some(candidate) = chunk.candidates.into_iter().next() {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(call) = &part.function_call {
                    deltas.push(StreamDelta::ToolCall {
                        id: synthesize_tool_call_id(self.started_at, self.calls),
                        name: call.name.clone(),
                        arguments: call.arguments(),
                    });
                    self.calls += 1;
                } else if let Some(text) = part.text {
                    if part.thought != Some(true) && !text.is_empty() {
                        deltas.push(StreamDelta::Text(text));
                    }
                }
            }
            finish = candidate.finish_reason;
        }
        if let Some(usage) = chunk.usage_metadata {
            deltas.push(StreamDelta::Usage(usage.into()));
        }
        if let Some(reason) = finish {
            deltas.push(StreamDelta::Finish { reason });
        }
        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn event(data: Value) -> SseEvent {
        SseEvent { event: None, data }
    }

    #[test]
    fn function_calls_are_emitted_whole_with_synthesized_ids() {
        let mut decoder = GeminiStreamDecoder::new("google_gemini", 1_000);
        let deltas = decoder
            .decode(&event(json!({"candidates":[{"content":{"role":"model","parts":[
                {"functionCall":{"name":"a","args":{}}},
                {"functionCall":{"name":"b","args":{"k":"v"}}}
            ]}}]})))
            .expect("decode");
        assert_eq!(
            deltas,
            vec![
                StreamDelta::ToolCall {
                    id: "call_1000_0".to_string(),
                    name: "a".to_string(),
                    arguments: "{}".to_string()
                },
                StreamDelta::ToolCall {
                    id: "call_1000_1".to_string(),
                    name: "b".to_string(),
                    arguments: "{\"k\":\"v\"}".to_string()
                },
            ]
        );
    }

    #[test]
    fn finish_reason_follows_text_and_usage() {
        let mut decoder = GeminiStreamDecoder::new("google_gemini", 0);
        let deltas = decoder
            .decode(&event(json!({
                "candidates":[{"content":{"parts":[{"text":"!"}]},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":3,"totalTokenCount":5}
            })))
            .expect("decode");
        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[0], StreamDelta::Text("!".to_string()));
        assert!(matches!(&deltas[1], StreamDelta::Usage(u) if u.total_tokens == Some(5)));
        assert_eq!(
            deltas[2],
            StreamDelta::Finish {
                reason: "STOP".to_string()
            }
        );
    }

    #[test]
    fn error_chunk_fails_the_stream() {
        let mut decoder = GeminiStreamDecoder::new("google_gemini", 0);
        let err = decoder
            .decode(&event(json!({"error":{"code":500,"message":"Internal error","status":"INTERNAL"}})))
            .expect_err("vendor error");
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn null_error_field_is_a_regular_chunk() {
        let mut decoder = GeminiStreamDecoder::new("google_gemini", 0);
        let deltas = decoder
            .decode(&event(json!({
                "candidates":[{"content":{"parts":[{"text":"hi"}]},"finishReason":"STOP"}],
                "error":null
            })))
            .expect("decode");
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Text("hi".to_string()),
                StreamDelta::Finish {
                    reason: "STOP".to_string()
                }
            ]
        );
    }
}
