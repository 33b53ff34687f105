use crate::api::utils::{HandlerBody, text_response};
use crate::api::{ApiState, Endpoint, RouteRequest};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ALLOW, HeaderValue,
};
use hyper::body::Bytes;
use hyper::{Method, Response, StatusCode};
use shared::http::full_body;
use shared::{gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    Param(&'static str),
}

/// A path template such as `/sku/{skuId}`.
///
/// Empty segments are ignored on both sides, so `/cart` and `/cart/` are the
/// same path.
#[derive(Clone, Debug)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &'static str) -> Self {
        let segments = split(pattern)
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name),
                None => Segment::Literal(s),
            })
            .collect();
        PathPattern { segments }
    }

    /// Returns the percent-decoded parameters if `path` matches.
    pub fn matches(&self, path: &str) -> Option<HashMap<&'static str, String>> {
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) => {
                    if *literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = urlencoding::decode(part).ok()?;
                    params.insert(*name, value.into_owned());
                }
            }
        }
        Some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Clone, Debug)]
pub struct Route {
    pub method: Method,
    pub pattern: PathPattern,
    pub endpoint: Endpoint,
}

impl Route {
    pub fn new(method: Method, pattern: &'static str, endpoint: Endpoint) -> Self {
        Route {
            method,
            pattern: PathPattern::parse(pattern),
            endpoint,
        }
    }
}

pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new(Method::GET, "/sku/{skuId}", Endpoint::Sku),
        Route::new(Method::GET, "/pricing/{skuId}", Endpoint::Pricing),
        Route::new(Method::GET, "/collectionProduct", Endpoint::CollectionProducts),
        Route::new(Method::GET, "/searchProducts", Endpoint::SearchProducts),
        Route::new(Method::POST, "/simulateOrder", Endpoint::SimulateOrder),
        Route::new(Method::GET, "/cart", Endpoint::Cart),
        Route::new(
            Method::GET,
            "/cart-with-product-details/{orderFormId}",
            Endpoint::CartWithProductDetails,
        ),
        Route::new(Method::POST, "/add-to-cart/{orderFormId}", Endpoint::AddToCart),
    ]
}

enum Match {
    Found(Endpoint, HashMap<&'static str, String>),
    Preflight(Vec<Method>),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Decrements the in-flight gauge even if the request future is dropped.
struct InflightGuard;

impl InflightGuard {
    fn enter() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

/// Router that matches incoming requests against the route table
#[derive(Clone)]
pub struct Router {
    routes: Arc<Vec<Route>>,
    state: ApiState,
}

impl Router {
    pub fn new(state: ApiState) -> Self {
        Self::with_routes(state, default_routes())
    }

    pub fn with_routes(state: ApiState, routes: Vec<Route>) -> Self {
        Self {
            routes: Arc::new(routes),
            state,
        }
    }

    /// Routes a request to its endpoint. Every response allows any origin.
    pub async fn route(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        body: Bytes,
    ) -> Response<HandlerBody> {
        let mut response = match self.find(method, path) {
            Match::Found(endpoint, params) => {
                tracing::debug!(endpoint = endpoint.name(), "Matched route");
                let request = RouteRequest {
                    params,
                    query: query.map(String::from),
                    body,
                };
                self.dispatch(endpoint, request).await
            }
            Match::Preflight(methods) => {
                let mut response = Response::new(full_body(Bytes::new()));
                *response.status_mut() = StatusCode::NO_CONTENT;
                if let Some(allowed) = allow_header(&methods) {
                    response
                        .headers_mut()
                        .insert(ACCESS_CONTROL_ALLOW_METHODS, allowed);
                }
                response
                    .headers_mut()
                    .insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
                response
            }
            Match::MethodNotAllowed(methods) => {
                tracing::debug!(%method, path, "Method not allowed");
                let mut response =
                    text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n");
                if let Some(allowed) = allow_header(&methods) {
                    response.headers_mut().insert(ALLOW, allowed);
                }
                response
            }
            Match::NotFound => {
                tracing::warn!(%method, path, "No route matched");
                text_response(StatusCode::NOT_FOUND, "No route matched\n")
            }
        };

        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        response
    }

    async fn dispatch(&self, endpoint: Endpoint, request: RouteRequest) -> Response<HandlerBody> {
        let started = Instant::now();
        let _inflight = InflightGuard::enter();

        let response = endpoint.handle(&self.state, request).await;

        histogram!(
            REQUEST_DURATION,
            "route" => endpoint.name(),
            "status" => response.status().as_u16().to_string()
        )
        .record(started.elapsed().as_secs_f64());
        response
    }

    fn find(&self, method: &Method, path: &str) -> Match {
        let mut allowed = Vec::new();
        for route in self.routes.iter() {
            if let Some(params) = route.pattern.matches(path) {
                if route.method == *method {
                    return Match::Found(route.endpoint, params);
                }
                allowed.push(route.method.clone());
            }
        }

        match (allowed.is_empty(), *method == Method::OPTIONS) {
            (true, _) => Match::NotFound,
            (false, true) => Match::Preflight(allowed),
            (false, false) => Match::MethodNotAllowed(allowed),
        }
    }
}

fn allow_header(methods: &[Method]) -> Option<HeaderValue> {
    let joined = methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    HeaderValue::from_str(&joined).ok()
}
