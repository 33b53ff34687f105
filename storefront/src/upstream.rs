//! Client for the e-commerce platform's REST API.
//!
//! Every call goes through the [`Upstream`] trait so that handlers and the
//! aggregator can be exercised against fakes. [`HttpUpstream`] is the real
//! implementation: it appends percent-encoded path segments to the configured
//! base URL and authenticates with the app key/token header pair.

use crate::config::ResolvedUpstream;
use crate::metrics_defs::UPSTREAM_REQUEST_DURATION;
use async_trait::async_trait;
use http::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use url::Url;

pub const APP_KEY_HEADER: &str = "x-vtex-api-appkey";
pub const APP_TOKEN_HEADER: &str = "x-vtex-api-apptoken";

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream base URL cannot carry a path: {0}")]
    InvalidBaseUrl(String),

    #[error("Invalid credential header {0}")]
    InvalidHeader(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request to {path} failed: {message}")]
    Transport { path: String, message: String },

    #[error("Request to {path} timed out")]
    Timeout { path: String },

    #[error("Upstream returned {status} for {path}")]
    Status {
        path: String,
        status: StatusCode,
        body: Value,
    },

    #[error("Could not decode response from {path}: {message}")]
    Decode { path: String, message: String },

    /// The response decoded fine but does not have the expected shape.
    #[error("Unexpected payload from {path}: {message}")]
    UnexpectedPayload { path: String, message: String },
}

impl UpstreamError {
    /// Diagnostic payload suitable for returning to a caller.
    pub fn details(&self) -> Value {
        match self {
            UpstreamError::Status { status, body, .. } => serde_json::json!({
                "status": status.as_u16(),
                "response": body,
            }),
            other => serde_json::json!({ "message": other.to_string() }),
        }
    }
}

/// Path below the upstream base URL, kept as raw segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ApiPath(Vec<String>);

impl ApiPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ApiPath(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ApiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: ApiPath,
    pub body: Option<Value>,
}

impl UpstreamRequest {
    pub fn get(path: ApiPath) -> Self {
        Self {
            method: Method::GET,
            path,
            body: None,
        }
    }

    pub fn post(path: ApiPath, body: Value) -> Self {
        Self {
            method: Method::POST,
            path,
            body: Some(body),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Sends one request. Non-2xx statuses are returned as
    /// [`UpstreamError::Status`]. No retries are attempted.
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpUpstream {
    pub fn new(config: &ResolvedUpstream) -> Result<Self, UpstreamError> {
        if config.url.cannot_be_a_base() {
            return Err(UpstreamError::InvalidBaseUrl(config.url.to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(APP_KEY_HEADER),
            credential(&config.app_key, APP_KEY_HEADER)?,
        );
        headers.insert(
            HeaderName::from_static(APP_TOKEN_HEADER),
            credential(&config.app_token, APP_TOKEN_HEADER)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        Ok(HttpUpstream {
            client,
            base_url: config.url.clone(),
        })
    }

    fn url_for(&self, path: &ApiPath) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(path.segments());
        Ok(url)
    }
}

fn credential(value: &str, name: &'static str) -> Result<HeaderValue, UpstreamError> {
    let mut value = HeaderValue::from_str(value).map_err(|_| UpstreamError::InvalidHeader(name))?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let path = request.path.to_string();
        let url = self.url_for(&request.path)?;

        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let result = builder.send().await;
        shared::histogram!(UPSTREAM_REQUEST_DURATION, "method" => request.method.to_string())
            .record(start.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            tracing::error!(path = %path, error = %e, "Upstream request failed");
            if e.is_timeout() {
                UpstreamError::Timeout { path: path.clone() }
            } else {
                UpstreamError::Transport {
                    path: path.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| UpstreamError::Decode {
            path: path.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let body = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            tracing::error!(path = %path, %status, response = %body, "Upstream returned an error");
            return Err(UpstreamError::Status { path, status, body });
        }

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode {
                path: path.clone(),
                message: e.to_string(),
            })?
        };

        tracing::debug!(path = %path, %status, "Upstream request completed");
        Ok(UpstreamResponse { status, body })
    }
}
