//! In-process transport double for unit tests.

use crate::error::{OpenApiToolsError, Result};
use crate::transport::{HttpTransport, OutboundRequest, OutboundResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;

/// Records every request and answers with a canned response (or a canned failure).
pub(crate) struct SpyTransport {
    requests: Mutex<Vec<OutboundRequest>>,
    reply: std::result::Result<OutboundResponse, String>,
}

impl SpyTransport {
    pub(crate) fn replying(status: StatusCode, content_type: &'static str, body: &[u8]) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Ok(OutboundResponse {
                status,
                headers,
                body: body.to_vec(),
            }),
        }
    }

    pub(crate) fn ok_json(body: Value) -> Self {
        Self::replying(StatusCode::OK, "application/json", body.to_string().as_bytes())
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Err(message.to_string()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for SpyTransport {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse> {
        self.requests.lock().push(request);
        self.reply
            .clone()
            .map_err(OpenApiToolsError::Transport)
    }
}
