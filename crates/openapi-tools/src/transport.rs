//! Outbound HTTP seam.
//!
//! Dispatch talks to the upstream through [`HttpTransport`] so tests can count and inspect
//! requests without a network.

use crate::error::{OpenApiToolsError, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// `None` disables the per-request timeout.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request. Any HTTP status is a successful send.
    ///
    /// # Errors
    ///
    /// Returns `Transport` on connection failure or timeout.
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse>;
}

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(t) = request.timeout {
            builder = builder.timeout(t);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OpenApiToolsError::Transport(sanitize_reqwest_error(&e)))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| OpenApiToolsError::Transport(sanitize_reqwest_error(&e)))?;

        Ok(OutboundResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// URL safe for logs and error messages: no credentials, query or fragment.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// `reqwest` error text with the request URL redacted (query strings may carry API keys).
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    if e.is_timeout() && !msg.contains("timed out") {
        msg.push_str(" (timed out)");
    }
    msg
}
