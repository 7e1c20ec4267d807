//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use nagare_llm::error::LLMError;
use nagare_llm::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

/// What one attempt receives.
pub enum Reply {
    /// 200 with the given body chunks, then a clean end of stream.
    Chunks(Vec<String>),
    /// 200 with the given chunks, then the connection stays open forever.
    Hang(Vec<String>),
    /// 200 with the given chunks, then the connection breaks.
    Broken(Vec<String>),
    /// Non-success status with a body.
    Status(u16, String),
    /// Network failure before any response.
    Unreachable,
}

/// Plays back one [`Reply`] per attempt and counts attempts.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    attempts: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            attempts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Single SSE body split at arbitrary byte offsets.
    pub fn sse(chunks: &[&str]) -> Self {
        Self::new(vec![Reply::Chunks(
            chunks.iter().map(|c| c.to_string()).collect(),
        )])
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }

    fn next_reply(&self, request: HttpRequest) -> Reply {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock").push(request);
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Reply::Unreachable)
    }
}

fn ok_chunks(chunks: Vec<String>) -> Vec<Result<Vec<u8>, LLMError>> {
    chunks.into_iter().map(|c| Ok(c.into_bytes())).collect()
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let (status, body) = match self.next_reply(request) {
            Reply::Chunks(chunks) => (200, chunks.concat()),
            Reply::Status(status, body) => (status, body),
            Reply::Hang(_) => std::future::pending().await,
            Reply::Broken(_) | Reply::Unreachable => {
                return Err(LLMError::transport("connection refused"));
            }
        };
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: body.into_bytes(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let (status, body) = match self.next_reply(request) {
            Reply::Chunks(chunks) => (200, stream::iter(ok_chunks(chunks)).boxed()),
            Reply::Hang(chunks) => (
                200,
                stream::iter(ok_chunks(chunks))
                    .chain(stream::pending())
                    .boxed(),
            ),
            Reply::Broken(chunks) => {
                let mut items = ok_chunks(chunks);
                items.push(Err(LLMError::transport("connection reset by peer")));
                (200, stream::iter(items).boxed())
            }
            Reply::Status(status, body) => {
                (status, stream::iter(ok_chunks(vec![body])).boxed())
            }
            Reply::Unreachable => return Err(LLMError::transport("connection refused")),
        };
        Ok(HttpStreamResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }
}

/// Formats one `data:` record.
pub fn data(json: &str) -> String {
    format!("data: {json}\n\n")
}

/// Formats one named Anthropic record.
pub fn event(name: &str, json: &str) -> String {
    format!("event: {name}\ndata: {json}\n\n")
}
