use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::LLMError;
use crate::types::{
    ChatResponse, ProviderMetadata, StreamChunk, StreamDelta, ToolCall, synthesize_tool_call_id,
};

/// Folds [`StreamDelta`]s into a growing [`ChatResponse`].
///
/// Each emitted [`StreamChunk`] holds an `Arc` to the snapshot as of that chunk. Updates
/// go through [`Arc::make_mut`], so a snapshot the caller still holds is copied before
/// being changed and is never mutated after it was handed out. When the caller drops
/// chunks promptly the snapshot is updated in place.
#[derive(Debug)]
pub struct SnapshotAccumulator {
    snapshot: Arc<ChatResponse>,
    /// Vendor key of a streamed tool call -> position in `tool_calls`.
    positions: HashMap<usize, usize>,
    /// Positions whose arguments are still being streamed.
    open: Vec<usize>,
    started_at: i64,
    provider: &'static str,
}

impl SnapshotAccumulator {
    pub fn new(metadata: ProviderMetadata, provider: &'static str) -> Self {
        Self::with_timestamp(metadata, provider, chrono::Utc::now().timestamp_millis())
    }

    /// Fixes the timestamp used for synthesized tool-call ids.
    pub fn with_timestamp(metadata: ProviderMetadata, provider: &'static str, started_at: i64) -> Self {
        Self {
            snapshot: Arc::new(ChatResponse {
                provider: metadata,
                ..Default::default()
            }),
            positions: HashMap::new(),
            open: Vec::new(),
            started_at,
            provider,
        }
    }

    /// Records the model serving the response.
    pub fn set_model(&mut self, model: impl Into<String>) {
        Arc::make_mut(&mut self.snapshot).model = Some(model.into());
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ChatResponse> {
        Arc::clone(&self.snapshot)
    }

    /// Applies one delta and returns the chunk describing it.
    ///
    /// # Errors
    ///
    /// [`LLMError::Decode`] when argument fragments reference an unknown call or a
    /// completed call's arguments are not valid JSON.
    pub fn apply(&mut self, delta: StreamDelta) -> Result<StreamChunk, LLMError> {
        let mut text_delta = String::new();
        let mut finish_reason = None;

        match &delta {
            StreamDelta::Text(text) => {
                Arc::make_mut(&mut self.snapshot).text.push_str(text);
                text_delta.clone_from(text);
            }
            StreamDelta::ToolCallStart { key, id, name } => self.start_call(*key, id, name),
            StreamDelta::ToolCallArguments { key, fragment } => {
                let position = self.position(*key)?;
                Arc::make_mut(&mut self.snapshot).tool_calls[position]
                    .arguments
                    .push_str(fragment);
            }
            StreamDelta::ToolCallEnd { key } => {
                let position = self.position(*key)?;
                self.complete(position)?;
            }
            StreamDelta::ToolCall {
                id,
                name,
                arguments,
            } => {
                let call = ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                };
                Arc::make_mut(&mut self.snapshot).tool_calls.push(call);
            }
            StreamDelta::Usage(usage) => {
                let snapshot = Arc::make_mut(&mut self.snapshot);
                snapshot.usage.get_or_insert_with(Default::default).merge(usage);
            }
            StreamDelta::Finish { reason } => {
                self.complete_all()?;
                Arc::make_mut(&mut self.snapshot).finish_reason = Some(reason.clone());
                finish_reason = Some(reason.clone());
            }
        }

        Ok(StreamChunk {
            text_delta,
            delta,
            snapshot: self.snapshot(),
            finish_reason,
        })
    }

    /// Completes every open tool call, e.g. when the stream ended without a finish event.
    pub fn complete_all(&mut self) -> Result<(), LLMError> {
        for position in std::mem::take(&mut self.open) {
            self.normalize_arguments(position)?;
        }
        Ok(())
    }

    fn start_call(&mut self, key: usize, id: &Option<String>, name: &str) {
        if let Some(&position) = self.positions.get(&key) {
            // Repeated start for the same call only fills in missing fields.
            let call = &mut Arc::make_mut(&mut self.snapshot).tool_calls[position];
            if call.name.is_empty() {
                call.name = name.to_string();
            }
            if let Some(id) = id {
                call.id.clone_from(id);
            }
            return;
        }

        let snapshot = Arc::make_mut(&mut self.snapshot);
        let position = snapshot.tool_calls.len();
        let id = id
            .clone()
            .unwrap_or_else(|| synthesize_tool_call_id(self.started_at, position));
        snapshot.tool_calls.push(ToolCall {
            id,
            name: name.to_string(),
            arguments: String::new(),
        });
        self.positions.insert(key, position);
        self.open.push(position);
    }

    fn position(&self, key: usize) -> Result<usize, LLMError> {
        self.positions.get(&key).copied().ok_or_else(|| {
            LLMError::decode(
                self.provider,
                format!("tool call fragment for unknown index {key}"),
            )
        })
    }

    fn complete(&mut self, position: usize) -> Result<(), LLMError> {
        if let Some(index) = self.open.iter().position(|open| *open == position) {
            self.open.swap_remove(index);
            self.normalize_arguments(position)?;
        }
        Ok(())
    }

    /// Empty arguments become `{}`; anything else must already be valid JSON.
    fn normalize_arguments(&mut self, position: usize) -> Result<(), LLMError> {
        let current = &self.snapshot.tool_calls[position];
        if current.arguments.trim().is_empty() {
            Arc::make_mut(&mut self.snapshot).tool_calls[position].arguments = "{}".to_string();
            return Ok(());
        }
        serde_json::from_str::<Value>(&current.arguments)
            .map(|_| ())
            .map_err(|err| {
                LLMError::decode(
                    self.provider,
                    format!("arguments of tool call `{}` are not valid JSON: {err}", current.name),
                )
            })
    }
}
