pub mod aggregator;
pub mod api;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod router;
pub mod upstream;

#[cfg(test)]
mod testutils;

use crate::aggregator::Aggregator;
use crate::api::ApiState;
use crate::api::utils::{HandlerBody, text_response};
use crate::catalog::Catalog;
use crate::errors::{Result, StorefrontError};
use crate::router::Router;
use crate::upstream::HttpUpstream;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::pin::Pin;
use std::sync::Arc;

pub async fn run(config: config::Config) -> Result<()> {
    let upstream_config = config.validate()?;
    let upstream = HttpUpstream::new(&upstream_config)?;

    shared::metrics_defs::describe_all(metrics_defs::ALL_METRICS);

    let state = ApiState::new(
        Catalog::new(Arc::new(upstream), upstream_config.account.clone()),
        Aggregator::new(config.fanout.max_concurrency),
    );
    let service = StorefrontService::new(Router::new(state));

    tracing::info!(
        upstream = %upstream_config.url,
        max_concurrency = ?config.fanout.max_concurrency,
        "Starting storefront gateway"
    );

    let router_task = run_http_service(&config.listener.host, config.listener.port, service);
    // The upstream client exists by now, so the gateway is ready as soon as
    // the admin listener accepts connections.
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, StorefrontError>::new(|| true),
    );

    tokio::try_join!(router_task, admin_task)?;
    Ok(())
}

pub struct StorefrontService {
    router: Router,
}

impl StorefrontService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl Service<Request<Incoming>> for StorefrontService {
    type Response = Response<HandlerBody>;
    type Error = StorefrontError;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read request body");
                    return Ok(text_response(
                        StatusCode::BAD_REQUEST,
                        "Failed to read request body",
                    ));
                }
            };

            Ok(router
                .route(&parts.method, parts.uri.path(), parts.uri.query(), body)
                .await)
        })
    }
}
