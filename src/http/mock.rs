//! In-memory transport for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::error::LLMError;

use super::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

/// Replies to every request with the same status, headers and body chunks, and keeps
/// the requests it saw.
pub(crate) struct MockTransport {
    status: u16,
    headers: HashMap<String, String>,
    chunks: Vec<String>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub(crate) fn new(status: u16, chunks: &[&str]) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().expect("lock").clone()
    }

    pub(crate) fn last_body(&self) -> serde_json::Value {
        let requests = self.requests();
        let body = requests
            .last()
            .and_then(|r| r.body.clone())
            .expect("request body");
        serde_json::from_slice(&body).expect("json body")
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        self.seen.lock().expect("lock").push(request);
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.chunks.concat().into_bytes(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        self.seen.lock().expect("lock").push(request);
        let chunks: Vec<Result<Vec<u8>, LLMError>> = self
            .chunks
            .iter()
            .map(|c| Ok(c.clone().into_bytes()))
            .collect();
        Ok(HttpStreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: Box::pin(stream::iter(chunks)),
        })
    }
}
