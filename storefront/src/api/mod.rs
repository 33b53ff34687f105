//! Endpoint handlers.
//!
//! Each handler validates its parameters, calls the catalog, and returns
//! either a JSON value or an [`ApiError`]. Rendering to HTTP happens in
//! [`Endpoint::handle`].

pub mod catalog;
pub mod checkout;
pub mod utils;

use crate::aggregator::Aggregator;
use crate::catalog::Catalog;
use crate::errors::ApiError;
use http::StatusCode;
use hyper::Response;
use hyper::body::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use utils::{ErrorStyle, HandlerBody, error_response, json_response};

/// Everything a handler needs, shared by all requests.
#[derive(Clone)]
pub struct ApiState {
    pub catalog: Catalog,
    pub aggregator: Aggregator,
}

impl ApiState {
    pub fn new(catalog: Catalog, aggregator: Aggregator) -> Self {
        Self { catalog, aggregator }
    }
}

/// An inbound request after routing.
#[derive(Debug, Default)]
pub struct RouteRequest {
    pub params: HashMap<&'static str, String>,
    pub query: Option<String>,
    pub body: Bytes,
}

impl RouteRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Successful handler output
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl From<Value> for Reply {
    fn from(body: Value) -> Self {
        Reply {
            status: StatusCode::OK,
            body,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Sku,
    Pricing,
    CollectionProducts,
    SearchProducts,
    SimulateOrder,
    Cart,
    CartWithProductDetails,
    AddToCart,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Sku => "sku",
            Endpoint::Pricing => "pricing",
            Endpoint::CollectionProducts => "collection_products",
            Endpoint::SearchProducts => "search_products",
            Endpoint::SimulateOrder => "simulate_order",
            Endpoint::Cart => "cart",
            Endpoint::CartWithProductDetails => "cart_with_product_details",
            Endpoint::AddToCart => "add_to_cart",
        }
    }

    fn error_style(&self) -> ErrorStyle {
        match self {
            Endpoint::AddToCart => ErrorStyle::Json,
            _ => ErrorStyle::Text,
        }
    }

    pub async fn handle(self, state: &ApiState, request: RouteRequest) -> Response<HandlerBody> {
        let result: Result<Reply, ApiError> = match self {
            Endpoint::Sku => catalog::sku(state, &request).await.map(Reply::from),
            Endpoint::Pricing => catalog::pricing(state, &request).await.map(Reply::from),
            Endpoint::CollectionProducts => catalog::collection_products(state, &request)
                .await
                .map(Reply::from),
            Endpoint::SearchProducts => catalog::search_products(state, &request)
                .await
                .map(Reply::from),
            Endpoint::SimulateOrder => checkout::simulate_order(state, &request)
                .await
                .map(Reply::from),
            Endpoint::Cart => checkout::cart(state).await.map(Reply::from),
            Endpoint::CartWithProductDetails => {
                checkout::cart_with_product_details(state, &request)
                    .await
                    .map(Reply::from)
            }
            Endpoint::AddToCart => checkout::add_to_cart(state, &request).await,
        };

        match result {
            Ok(reply) => json_response(reply.status, &reply.body),
            Err(e) => {
                match &e {
                    ApiError::Upstream { .. } => {
                        tracing::error!(endpoint = self.name(), error = %e, "Request failed")
                    }
                    _ => tracing::debug!(endpoint = self.name(), error = %e, "Rejected request"),
                }
                error_response(&e, self.error_style())
            }
        }
    }
}
