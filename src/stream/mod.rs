//! Streaming facade: transport body -> SSE framer -> vendor decoder -> accumulator.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::StreamDecoder;
use crate::types::{ChatResponse, ProviderMetadata, StreamChunk};

pub mod accumulator;
pub mod sse;

pub use accumulator::SnapshotAccumulator;
pub use sse::{Framing, SseEvent, SseFramer};

/// Boxed chunk stream returned by [`ChatStream::into_stream`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>;

/// Lifecycle of a [`ChatStream`].
///
/// A stream object only exists once the request was accepted, so it starts in
/// `Connecting` and moves to `Streaming` on the first body bytes. Exactly one of the
/// terminal states is reached and the connection is released on entering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Failed | StreamState::Cancelled
        )
    }
}

/// 流式响应读取器
///
/// Yields one [`StreamChunk`] per decoded delta via [`ChatStream::recv`]. Reading takes
/// `&mut self`, so a single stream can never be polled from two places at once.
pub struct ChatStream {
    framer: Option<SseFramer>,
    decoder: Box<dyn StreamDecoder>,
    accumulator: SnapshotAccumulator,
    pending: VecDeque<StreamChunk>,
    cancel: CancellationToken,
    state: StreamState,
    provider: &'static str,
}

impl ChatStream {
    pub fn new(
        body: HttpBodyStream,
        framing: Framing,
        decoder: Box<dyn StreamDecoder>,
        metadata: ProviderMetadata,
        provider: &'static str,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_accumulator(
            body,
            framing,
            decoder,
            SnapshotAccumulator::new(metadata, provider),
            provider,
            cancel,
        )
    }

    pub(crate) fn with_accumulator(
        body: HttpBodyStream,
        framing: Framing,
        decoder: Box<dyn StreamDecoder>,
        accumulator: SnapshotAccumulator,
        provider: &'static str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            framer: Some(SseFramer::new(body, provider, framing)),
            decoder,
            accumulator,
            pending: VecDeque::new(),
            cancel,
            state: StreamState::Connecting,
            provider,
        }
    }

    /// Seeds the snapshot with the requested model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.accumulator.set_model(model);
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Final response, available once the stream completed.
    ///
    /// Failed and cancelled streams return `None`: their partial content is not
    /// reliable.
    pub fn response(&self) -> Option<Arc<ChatResponse>> {
        (self.state == StreamState::Completed).then(|| self.accumulator.snapshot())
    }

    /// Returns the next chunk, `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// The first decode, vendor, or transport error moves the stream to
    /// [`StreamState::Failed`]. Cancellation moves it to [`StreamState::Cancelled`] and
    /// yields [`LLMError::Cancelled`]. Either way the error is reported once and later
    /// calls return `Ok(None)`.
    pub async fn recv(&mut self) -> Result<Option<StreamChunk>, LLMError> {
        if !self.state.is_terminal() && self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }

        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.state.is_terminal() {
                return Ok(None);
            }
            let Some(framer) = self.framer.as_mut() else {
                return Ok(None);
            };

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                next = framer.next() => next,
            };
            if self.state == StreamState::Connecting && framer.has_received_bytes() {
                self.transition(StreamState::Streaming);
            }

            match next {
                Some(Ok(event)) => {
                    let deltas = match self.decoder.decode(&event) {
                        Ok(deltas) => deltas,
                        Err(err) => return Err(self.fail(err)),
                    };
                    for delta in deltas {
                        let chunk = match self.accumulator.apply(delta) {
                            Ok(chunk) => chunk,
                            Err(err) => return Err(self.fail(err)),
                        };
                        let terminal = chunk.finish_reason.is_some();
                        self.pending.push_back(chunk);
                        if terminal {
                            self.transition(StreamState::Completed);
                            break;
                        }
                    }
                }
                Some(Err(err)) => return Err(self.fail(err)),
                None => {
                    if let Err(err) = self.accumulator.complete_all() {
                        return Err(self.fail(err));
                    }
                    self.transition(StreamState::Completed);
                }
            }
        }
    }

    /// Stops reading and releases the connection. Safe to call repeatedly and after
    /// completion.
    pub fn close(&mut self) {
        self.pending.clear();
        if !self.state.is_terminal() {
            self.transition(StreamState::Cancelled);
        }
        self.framer = None;
    }

    /// Drains the stream and returns the final response.
    pub async fn collect(mut self) -> Result<ChatResponse, LLMError> {
        while self.recv().await?.is_some() {}
        self.response()
            .map(|snapshot| (*snapshot).clone())
            .ok_or_else(|| LLMError::cancelled("stream closed before completion"))
    }

    /// Adapts the reader into a [`futures_core::Stream`].
    pub fn into_stream(self) -> ChunkStream {
        Box::pin(futures_util::stream::unfold(self, |mut stream| async move {
            match stream.recv().await {
                Ok(Some(chunk)) => Some((Ok(chunk), stream)),
                Ok(None) => None,
                Err(err) => Some((Err(err), stream)),
            }
        }))
    }

    fn cancelled(&mut self) -> LLMError {
        self.pending.clear();
        self.transition(StreamState::Cancelled);
        LLMError::cancelled(format!("{} stream cancelled by caller", self.provider))
    }

    fn fail(&mut self, err: LLMError) -> LLMError {
        self.pending.clear();
        self.transition(StreamState::Failed);
        err
    }

    fn transition(&mut self, next: StreamState) {
        debug!(provider = self.provider, from = ?self.state, to = ?next, "stream state changed");
        self.state = next;
        if next.is_terminal() {
            if let Some(mut framer) = self.framer.take() {
                framer.close();
            }
        }
    }
}
