use std::collections::BTreeSet;

use crate::error::LLMError;
use crate::provider::StreamDecoder;
use crate::stream::SseEvent;
use crate::types::StreamDelta;

use super::error::stream_error;
use super::types::OpenAiStreamChunk;

/// Decodes `chat.completion.chunk` payloads.
///
/// Tool calls are keyed by the `index` OpenAI attaches to each fragment; only the first
/// fragment of a call carries its id and name. Some compatible servers omit `index`:
/// a fragment with a new id then opens a new call, anything else continues the last one.
#[derive(Debug)]
pub(crate) struct OpenAiStreamDecoder {
    started: BTreeSet<usize>,
    /// Key and id of the most recently touched call.
    last: Option<(usize, Option<String>)>,
    provider: &'static str,
}

impl OpenAiStreamDecoder {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            started: BTreeSet::new(),
            last: None,
            provider,
        }
    }

    fn key_for(&self, index: Option<usize>, id: Option<&str>) -> usize {
        if let Some(index) = index {
            return index;
        }
        match (&self.last, id) {
            (Some((key, _)), None) => *key,
            (Some((key, Some(last_id))), Some(id)) if last_id == id => *key,
            _ => self.started.last().map_or(0, |key| key + 1),
        }
    }
}

impl StreamDecoder for OpenAiStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamDelta>, LLMError> {
        if let Some(err) = stream_error(&event.data) {
            return Err(err);
        }
        let chunk: OpenAiStreamChunk = serde_json::from_value(event.data.clone()).map_err(|err| {
            LLMError::decode(self.provider, format!("failed to parse stream chunk: {err}"))
        })?;

        let mut deltas = Vec::new();
        let mut finish = None;
        for choice in chunk.choices.into_iter().filter(|choice| choice.index == 0) {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content {
                    let text = content.into_text();
                    if !text.is_empty() {
                        deltas.push(StreamDelta::Text(text));
                    }
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    let key = self.key_for(call.index, call.id.as_deref());
                    if call.id.is_some() || self.last.as_ref().map(|(last, _)| *last) != Some(key) {
                        self.last = Some((key, call.id.clone()));
                    }
                    let function = call.function.unwrap_or_default();
                    if self.started.insert(key) {
                        deltas.push(StreamDelta::ToolCallStart {
                            key,
                            id: call.id,
                            name: function.name.unwrap_or_default(),
                        });
                    }
                    if let Some(fragment) = function.arguments.filter(|args| !args.is_empty()) {
                        deltas.push(StreamDelta::ToolCallArguments { key, fragment });
                    }
                }
            }
            if choice.finish_reason.is_some() {
                finish = choice.finish_reason;
            }
        }

        if let Some(usage) = chunk.usage {
            deltas.push(StreamDelta::Usage(usage.into()));
        }
        if let Some(reason) = finish {
            self.last = None;
            for key in std::mem::take(&mut self.started) {
                deltas.push(StreamDelta::ToolCallEnd { key });
            }
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
    fn text_parts_and_plain_strings_become_text() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        let deltas = decoder
            .decode(&event(json!({"choices":[{"delta":{"content":[{"type":"text","text":"Hello"}]}}]})))
            .expect("decode");
        assert_eq!(deltas, vec![StreamDelta::Text("Hello".to_string())]);

        let deltas = decoder
            .decode(&event(json!({"choices":[{"index":0,"delta":{"content":" world"},"finish_reason":"stop"}]})))
            .expect("decode");
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Text(" world".to_string()),
                StreamDelta::Finish {
                    reason: "stop".to_string()
                }
            ]
        );
    }

    #[test]
    fn tool_call_fragments_are_keyed_by_index() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        let first = decoder
            .decode(&event(json!({"choices":[{"delta":{"tool_calls":[
                {"index":1,"id":"call_x","type":"function","function":{"name":"lookup","arguments":""}}
            ]}}]})))
            .expect("decode");
        assert_eq!(
            first,
            vec![StreamDelta::ToolCallStart {
                key: 1,
                id: Some("call_x".to_string()),
                name: "lookup".to_string()
            }]
        );

        let second = decoder
            .decode(&event(json!({"choices":[{"delta":{"tool_calls":[
                {"index":1,"function":{"arguments":"{\"q\":1}"}}
            ]}}]})))
            .expect("decode");
        assert_eq!(
            second,
            vec![StreamDelta::ToolCallArguments {
                key: 1,
                fragment: "{\"q\":1}".to_string()
            }]
        );

        let last = decoder
            .decode(&event(json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]})))
            .expect("decode");
        assert_eq!(
            last,
            vec![
                StreamDelta::ToolCallEnd { key: 1 },
                StreamDelta::Finish {
                    reason: "tool_calls".to_string()
                }
            ]
        );
    }

    #[test]
    fn usage_only_chunk_is_forwarded() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        let deltas = decoder
            .decode(&event(json!({"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}})))
            .expect("decode");
        assert!(matches!(&deltas[..], [StreamDelta::Usage(usage)] if usage.total_tokens == Some(7)));
    }

    #[test]
    fn secondary_choices_are_ignored() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        let deltas = decoder
            .decode(&event(json!({"choices":[{"index":1,"delta":{"content":"other"}}]})))
            .expect("decode");
        assert!(deltas.is_empty());
    }

    #[test]
    fn error_payload_fails_the_stream() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        let err = decoder
            .decode(&event(json!({"error":{"message":"The server had an error","type":"server_error"}})))
            .expect_err("vendor error");
        assert!(matches!(err, LLMError::Api { .. }), "unexpected: {err:?}");
    }

    #[test]
    fn calls_without_index_are_told_apart_by_id() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        let mut deltas = Vec::new();
        for chunk in [
            json!({"choices":[{"delta":{"tool_calls":[{"id":"call_a","function":{"name":"first","arguments":"{\"a\":"}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"1}"}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"id":"call_b","function":{"name":"second","arguments":"{}"}}]}}]}),
            json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}),
        ] {
            deltas.extend(decoder.decode(&event(chunk)).expect("decode"));
        }

        assert_eq!(
            deltas,
            vec![
                StreamDelta::ToolCallStart {
                    key: 0,
                    id: Some("call_a".to_string()),
                    name: "first".to_string()
                },
                StreamDelta::ToolCallArguments {
                    key: 0,
                    fragment: "{\"a\":".to_string()
                },
                StreamDelta::ToolCallArguments {
                    key: 0,
                    fragment: "1}".to_string()
                },
                StreamDelta::ToolCallStart {
                    key: 1,
                    id: Some("call_b".to_string()),
                    name: "second".to_string()
                },
                StreamDelta::ToolCallArguments {
                    key: 1,
                    fragment: "{}".to_string()
                },
                StreamDelta::ToolCallEnd { key: 0 },
                StreamDelta::ToolCallEnd { key: 1 },
                StreamDelta::Finish {
                    reason: "tool_calls".to_string()
                }
            ]
        );
    }

    #[test]
    fn repeated_id_without_index_continues_the_call() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        decoder
            .decode(&event(json!({"choices":[{"delta":{"tool_calls":[{"id":"call_a","function":{"name":"f","arguments":"{"}}]}}]})))
            .expect("decode");
        let deltas = decoder
            .decode(&event(json!({"choices":[{"delta":{"tool_calls":[{"id":"call_a","function":{"arguments":"}"}}]}}]})))
            .expect("decode");
        assert_eq!(
            deltas,
            vec![StreamDelta::ToolCallArguments {
                key: 0,
                fragment: "}".to_string()
            }]
        );
    }

    #[test]
    fn null_error_field_is_a_regular_chunk() {
        let mut decoder = OpenAiStreamDecoder::new("openai_chat");
        let deltas = decoder
            .decode(&event(json!({"choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":"stop"}],"error":null})))
            .expect("decode");
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Text("hi".to_string()),
                StreamDelta::Finish {
                    reason: "stop".to_string()
                }
            ]
        );
    }
}
