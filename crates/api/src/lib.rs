//! Charter HTTP client utilities.
//!
//! This module provides a lightweight client for the REST endpoints a
//! workflow run calls into. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Discovering a bearer token from `CHARTER_API_TOKEN`
//! - Validating the configured base URL for safety
//! - Building requests with a consistent User-Agent and Accept headers
//!
//! The primary entry point is [`ApiClient`]. Create an instance via
//! [`ApiClient::new`], and then build requests with [`ApiClient::request`].
//!
//! # Example
//!
//! ```ignore
//! use charter_api::ApiClient;
//! use anyhow::Result;
//!
//! async fn list_customers() -> Result<()> {
//!     let client = ApiClient::new("https://billing.example.com")?;
//!     let res = client.request(reqwest::Method::GET, "/customers").send().await?;
//!     println!("status: {}", res.status());
//!     Ok(())
//! }
//! ```

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, RequestBuilder, Url, header};
use serde_json::Value;
use tracing::debug;

/// Hostnames allowed to use plain HTTP for local development.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Default per-request timeout applied to every outbound call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for workflow API access.
///
/// The client pre-configures default headers and builds requests against a
/// validated base URL. Authentication is read from the environment when
/// present; unauthenticated targets (local mock servers) work without it.
pub struct ApiClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl ApiClient {
    /// Construct an [`ApiClient`] for the given base URL.
    ///
    /// A bearer token is taken from `CHARTER_API_TOKEN` when set. The base
    /// URL must use HTTPS unless it points at localhost.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Construct an [`ApiClient`] with an explicit per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        validate_base_url(&base_url)?;

        let mut default_headers = header::HeaderMap::new();
        if let Ok(api_token) = env::var("CHARTER_API_TOKEN") {
            let authorization_header_value = format!("Bearer {}", api_token);
            default_headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&authorization_header_value).context("invalid CHARTER_API_TOKEN")?,
            );
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("charter/0.1; {}", env::consts::OS),
        })
    }

    /// Build a `reqwest::RequestBuilder` for a method and API-relative path.
    ///
    /// The resulting request includes the configured User-Agent and base
    /// headers, and is resolved relative to `self.base_url`.
    pub fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");

        self.http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<()> {
    let parsed_base_url = Url::parse(base).map_err(|e| anyhow!("Invalid base URL '{}': {}", base, e))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("base URL must include a host"))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(anyhow!(
            "base URL must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        ));
    }

    Ok(())
}

/// Parse a response body as JSON, treating an empty body as absent.
///
/// Endpoints that return `204 No Content` or a bare acknowledgement produce
/// no body; callers get `None` rather than a parse error for those.
pub fn parse_response_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<Value>(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_allows_plain_http() {
        assert!(validate_base_url("http://localhost:8000").is_ok());
        assert!(validate_base_url("http://127.0.0.1:8000").is_ok());
    }

    #[test]
    fn remote_hosts_require_https() {
        assert!(validate_base_url("http://billing.example.com").is_err());
        assert!(validate_base_url("https://billing.example.com").is_ok());
    }

    #[test]
    fn base_url_without_host_is_rejected() {
        assert!(validate_base_url("file:///tmp/spec.yaml").is_err());
    }

    #[test]
    fn empty_bodies_parse_as_absent() {
        assert!(parse_response_json("").is_none());
        assert!(parse_response_json("   ").is_none());
        assert_eq!(parse_response_json("{\"ok\":true}").unwrap()["ok"], true);
    }
}
