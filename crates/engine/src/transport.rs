//! HTTP transport abstraction used by the operation invoker.
//!
//! The invoker never talks to `reqwest` directly; it goes through
//! [`HttpTransport`] so tests can script replies without a network. The
//! production implementation wraps [`charter_api::ApiClient`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use charter_api::ApiClient;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

/// Reply captured from one HTTP exchange.
///
/// Non-2xx statuses are replies, not errors; only transport-level failures
/// (timeouts, connection resets) surface as `Err` from [`HttpTransport::send`].
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body; `Null` when the body was empty or not JSON.
    pub body: Value,
}

/// Sends one request and returns the reply.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue `method path?query` with an optional JSON body.
    async fn send(&self, method: Method, path: &str, query: &[(String, String)], body: Option<&Value>) -> Result<TransportReply>;
}

/// Transport backed by a configured [`ApiClient`].
pub struct RestTransport {
    client: ApiClient,
}

impl RestTransport {
    /// Wrap an already configured client.
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for RestTransport {
    async fn send(&self, method: Method, path: &str, query: &[(String, String)], body: Option<&Value>) -> Result<TransportReply> {
        let mut builder = self.client.request(method.clone(), path);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.context("transport failure")?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        debug!(%method, path, status, "request completed");

        Ok(TransportReply {
            status,
            body: charter_api::parse_response_json(&text).unwrap_or(Value::Null),
        })
    }
}
