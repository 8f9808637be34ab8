//! Mock HTTP transport for testing.
//!
//! Replies are scripted in order; every call is recorded so tests can
//! assert on attempt counts and request shapes without a live origin.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::session::{HttpResponse, HttpTransport};

enum Reply {
    Response(HttpResponse),
    TransportError(String),
}

/// A recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Scripted transport implementing [`HttpTransport`].
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain response.
    pub fn push_status(&self, status: u16, body: &str) {
        self.push_reply(Reply::Response(HttpResponse {
            status,
            body: body.to_string(),
            retry_after: None,
        }));
    }

    /// Queue a response carrying a `Retry-After` header.
    pub fn push_retry_after(&self, status: u16, retry_after: u64) {
        self.push_reply(Reply::Response(HttpResponse {
            status,
            body: String::new(),
            retry_after: Some(retry_after),
        }));
    }

    /// Queue a transport-level failure.
    pub fn push_transport_error(&self, message: &str) {
        self.push_reply(Reply::TransportError(message.to_string()));
    }

    fn push_reply(&self, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    /// Number of requests made so far.
    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// All recorded requests, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                method: method.to_string(),
                url: url.to_string(),
                headers: headers.to_vec(),
            });

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::TransportError(message)) => Err(Error::Transport(message)),
            None => Err(Error::Transport("no scripted reply left".to_string())),
        }
    }
}
