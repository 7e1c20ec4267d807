use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde_json::Value;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

/// How a vendor marks the end of its event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data: [DONE]` ends the stream and is not yielded.
    DoneSentinel,
    /// The named event ends the stream after being yielded.
    TerminalEvent(&'static str),
    /// Only the connection closing ends the stream.
    Close,
}

/// One SSE record with its JSON payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` line, if any.
    pub event: Option<String>,
    pub data: Value,
}

impl SseEvent {
    /// Event name, falling back to the payload's `type` field.
    pub fn name(&self) -> Option<&str> {
        self.event
            .as_deref()
            .or_else(|| self.data.get("type").and_then(Value::as_str))
    }
}

/// Splits a byte stream into [`SseEvent`]s.
///
/// Records may span any number of transport chunks. A payload that is not valid JSON
/// yields [`LLMError::Decode`] and ends the sequence. The body is dropped as soon as
/// the terminator is seen.
pub struct SseFramer {
    body: Option<HttpBodyStream>,
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<SseEvent, LLMError>>,
    provider: &'static str,
    framing: Framing,
    finished: bool,
    received_bytes: bool,
}

impl SseFramer {
    pub fn new(body: HttpBodyStream, provider: &'static str, framing: Framing) -> Self {
        Self {
            body: Some(body),
            buffer: Vec::new(),
            event_name: None,
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            framing,
            finished: false,
            received_bytes: false,
        }
    }

    /// `true` once the transport delivered at least one chunk.
    pub fn has_received_bytes(&self) -> bool {
        self.received_bytes
    }

    /// Drops the underlying body and discards anything buffered.
    pub fn close(&mut self) {
        self.body = None;
        self.finished = true;
        self.buffer.clear();
        self.data_lines.clear();
        self.pending.clear();
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if line.starts_with(b":") {
            return;
        }
        if let Some(value) = field_value(&line, b"data:") {
            self.data_lines.push(value.to_vec());
        } else if let Some(value) = field_value(&line, b"event:") {
            self.event_name = Some(String::from_utf8_lossy(value).trim().to_string());
        }
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        let event = self.event_name.take();
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        let data = String::from_utf8(joined).map_err(|err| {
            LLMError::decode(self.provider, format!("invalid UTF-8 in stream chunk: {err}"))
        })?;
        if data.trim().is_empty() {
            return Ok(());
        }

        if self.framing == Framing::DoneSentinel && data.trim() == "[DONE]" {
            self.finish();
            return Ok(());
        }

        let data: Value = serde_json::from_str(&data).map_err(|err| {
            LLMError::decode(self.provider, format!("malformed stream payload: {err}"))
        })?;
        let event = SseEvent { event, data };
        let terminal = matches!(self.framing, Framing::TerminalEvent(name) if event.name() == Some(name));
        self.pending.push_back(Ok(event));
        if terminal {
            self.finish();
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.body = None;
        self.buffer.clear();
    }

    fn fail(&mut self, err: LLMError) -> Poll<Option<Result<SseEvent, LLMError>>> {
        self.close();
        Poll::Ready(Some(Err(err)))
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

/// Returns the value of an SSE field, without the single optional leading space.
fn field_value<'a>(line: &'a [u8], field: &[u8]) -> Option<&'a [u8]> {
    let value = line.strip_prefix(field)?;
    Some(value.strip_prefix(b" ").unwrap_or(value))
}

impl Stream for SseFramer {
    type Item = Result<SseEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            let polled = match this.body.as_mut() {
                Some(body) => body.as_mut().poll_next(cx),
                None => Poll::Ready(None),
            };

            match polled {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.received_bytes = true;
                    this.buffer.extend_from_slice(&bytes);
                    while !this.finished {
                        let Some(line) = Self::drain_line(&mut this.buffer) else {
                            break;
                        };
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return this.fail(err);
                            }
                        } else {
                            this.handle_line(line);
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => return this.fail(err),
                Poll::Ready(None) => {
                    if !this.buffer.is_empty() {
                        let line = std::mem::take(&mut this.buffer);
                        this.handle_line(line);
                    }
                    let flushed = this.flush_event();
                    this.finish();
                    if let Err(err) = flushed {
                        return this.fail(err);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
