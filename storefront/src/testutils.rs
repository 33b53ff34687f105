use crate::config::ResolvedUpstream;
use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};
use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use url::Url;

pub fn resolved_upstream(url: &str) -> ResolvedUpstream {
    ResolvedUpstream {
        url: Url::parse(url).unwrap(),
        app_key: "test-key".to_string(),
        app_token: "test-token".to_string(),
        account: None,
        timeout_secs: 5,
    }
}

/// What the mock server saw for one request
pub struct MockRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

pub struct MockUpstreamServer {
    port: u16,
}

impl MockUpstreamServer {
    /// Start a mock HTTP server that answers every request with `handler`
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(MockRequest) -> Response<Bytes> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let handler = handler.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let handler = handler.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let bytes = body
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes())
                                .unwrap_or_default();
                            let mock_request = MockRequest {
                                method: parts.method,
                                path: parts.uri.path().to_string(),
                                headers: parts.headers,
                                body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
                            };
                            let (parts, body) = handler(mock_request).into_parts();
                            Ok::<_, Infallible>(Response::from_parts(parts, Full::new(body)))
                        }
                    });

                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockUpstreamServer { port }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// In-memory upstream keyed by request path.
///
/// Unknown paths answer 404. Non-2xx statuses are returned as errors, the
/// same way `HttpUpstream` does.
#[derive(Default)]
pub struct FakeUpstream {
    routes: HashMap<String, (StatusCode, Value)>,
    calls: Mutex<Vec<UpstreamRequest>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(self, path: &str, body: Value) -> Self {
        self.with_status(path, StatusCode::OK, body)
    }

    pub fn with_status(mut self, path: &str, status: StatusCode, body: Value) -> Self {
        self.routes.insert(path.to_string(), (status, body));
        self
    }

    pub fn calls(&self) -> Vec<UpstreamRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let path = request.path.to_string();
        self.calls.lock().unwrap().push(request);

        let (status, body) = self
            .routes
            .get(&path)
            .cloned()
            .unwrap_or((StatusCode::NOT_FOUND, Value::String("not found".into())));

        if status.is_success() {
            Ok(UpstreamResponse { status, body })
        } else {
            Err(UpstreamError::Status { path, status, body })
        }
    }
}
