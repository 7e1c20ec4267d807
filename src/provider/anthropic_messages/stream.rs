use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::LLMError;
use crate::provider::StreamDecoder;
use crate::stream::SseEvent;
use crate::types::{StreamDelta, TokenUsage};

use super::error::stream_error;
use super::types::{
    AnthropicContentBlock, BlockDelta, ContentBlockDelta, ContentBlockStart, ContentBlockStop,
    MessageDelta, MessageStart,
};

/// Decodes the typed Messages event stream.
///
/// Tool calls are keyed by the content block `index`. `message_start` reports the prompt
/// token count once; it is kept so later usage updates carry a complete total.
#[derive(Debug)]
pub(crate) struct AnthropicStreamDecoder {
    tool_blocks: HashSet<usize>,
    input_tokens: Option<u64>,
    provider: &'static str,
}

impl AnthropicStreamDecoder {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            tool_blocks: HashSet::new(),
            input_tokens: None,
            provider,
        }
    }

    fn parse<T: DeserializeOwned>(&self, name: &str, data: &Value) -> Result<T, LLMError> {
        serde_json::from_value(data.clone()).map_err(|err| {
            LLMError::decode(self.provider, format!("failed to parse `{name}` event: {err}"))
        })
    }

    fn usage(&mut self, usage: TokenUsage) -> TokenUsage {
        if usage.prompt_tokens.is_some() {
            self.input_tokens = usage.prompt_tokens;
        }
        let prompt_tokens = usage.prompt_tokens.or(self.input_tokens);
        let total_tokens = match (prompt_tokens, usage.completion_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => usage.total_tokens,
        };
        TokenUsage {
            prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens,
        }
    }
}

impl StreamDecoder for AnthropicStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<StreamDelta>, LLMError> {
        let Some(name) = event.name() else {
            return Ok(Vec::new());
        };
        let mut deltas = Vec::new();
        match name {
            "message_start" => {
                let start: MessageStart = self.parse(name, &event.data)?;
                if let Some(usage) = start.message.usage {
                    let usage = self.usage(usage.into());
                    deltas.push(StreamDelta::Usage(usage));
                }
            }
            "content_block_start" => {
                let start: ContentBlockStart = self.parse(name, &event.data)?;
                match start.content_block {
                    AnthropicContentBlock::Text { text } if !text.is_empty() => {
                        deltas.push(StreamDelta::Text(text));
                    }
                    AnthropicContentBlock::ToolUse { id, name, input } => {
                        self.tool_blocks.insert(start.index);
                        deltas.push(StreamDelta::ToolCallStart {
                            key: start.index,
                            id: Some(id),
                            name,
                        });
                        // Input normally arrives through input_json_delta; a start block
                        // only carries it when non-empty.
                        if let Some(input) = input.filter(|v| v.as_object().is_some_and(|o| !o.is_empty())) {
                            deltas.push(StreamDelta::ToolCallArguments {
                                key: start.index,
                                fragment: input.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta: ContentBlockDelta = self.parse(name, &event.data)?;
                match delta.delta {
                    BlockDelta::TextDelta { text } => deltas.push(StreamDelta::Text(text)),
                    BlockDelta::InputJsonDelta { partial_json } if !partial_json.is_empty() => {
                        deltas.push(StreamDelta::ToolCallArguments {
                            key: delta.index,
                            fragment: partial_json,
                        });
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let stop: ContentBlockStop = self.parse(name, &event.data)?;
                if self.tool_blocks.remove(&stop.index) {
                    deltas.push(StreamDelta::ToolCallEnd { key: stop.index });
                }
            }
            "message_delta" => {
                let delta: MessageDelta = self.parse(name, &event.data)?;
                if let Some(usage) = delta.usage {
                    let usage = self.usage(usage.into());
                    deltas.push(StreamDelta::Usage(usage));
                }
                if let Some(reason) = delta.delta.stop_reason {
                    deltas.push(StreamDelta::Finish { reason });
                }
            }
            "error" => return Err(stream_error(&event.data)),
            // ping, message_stop and unknown events carry nothing to accumulate.
            _ => {}
        }
        Ok(deltas)
    }
}
