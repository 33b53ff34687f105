//! Catalog routes: SKU and price pass-through, and the two product listings
//! that are enriched per item.

use super::utils::{query_param, require};
use super::{ApiState, RouteRequest};
use crate::aggregator::{Attach, EnrichmentError, identifier, render};
use crate::errors::ApiError;
use serde_json::Value;

pub const SKU_ID_REQUIRED: &str = "SKU ID is required";
pub const COLLECTION_ID_REQUIRED: &str = "Collection ID is required";
pub const SEARCH_QUERY_REQUIRED: &str = "Search query is required";

const SKU_DETAILS_FAILED: &str = "Failed to fetch SKU details";
const VARIATIONS_FAILED: &str = "Failed to fetch SKU variations";

/// `GET /sku/{skuId}`
pub async fn sku(state: &ApiState, request: &RouteRequest) -> Result<Value, ApiError> {
    let sku_id = require(request.param("skuId"), SKU_ID_REQUIRED)?;
    state
        .catalog
        .sku(sku_id)
        .await
        .map_err(ApiError::upstream("Error fetching SKU details"))
}

/// `GET /pricing/{skuId}`
pub async fn pricing(state: &ApiState, request: &RouteRequest) -> Result<Value, ApiError> {
    let sku_id = require(request.param("skuId"), SKU_ID_REQUIRED)?;
    state
        .catalog
        .price(sku_id)
        .await
        .map_err(ApiError::upstream("Error fetching pricing details"))
}

/// `GET /collectionProduct?collectionId=`
///
/// Each product is returned with its SKU details under `skuDetails`.
pub async fn collection_products(
    state: &ApiState,
    request: &RouteRequest,
) -> Result<Value, ApiError> {
    let collection_id = query_param(request.query.as_deref(), "collectionId");
    let collection_id = require(collection_id.as_deref(), COLLECTION_ID_REQUIRED)?;

    let products = state
        .catalog
        .collection_products(collection_id)
        .await
        .map_err(ApiError::upstream("Error fetching products"))?;

    let enriched = state
        .aggregator
        .aggregate(products, |product| {
            let catalog = state.catalog.clone();
            let sku_id = identifier(product, "SkuId");
            async move {
                let sku_id = sku_id?;
                catalog.sku(&sku_id).await.map_err(EnrichmentError::from)
            }
        })
        .await;

    Ok(Value::Array(render(
        enriched,
        Attach::Field("skuDetails"),
        SKU_DETAILS_FAILED,
    )))
}

/// `GET /searchProducts?q=`
///
/// Each product is returned with its variations under `skus`.
pub async fn search_products(state: &ApiState, request: &RouteRequest) -> Result<Value, ApiError> {
    let query = query_param(request.query.as_deref(), "q");
    let query = require(query.as_deref(), SEARCH_QUERY_REQUIRED)?;

    let products = state
        .catalog
        .search(query)
        .await
        .map_err(ApiError::upstream("Error fetching search results"))?;

    let enriched = state
        .aggregator
        .aggregate(products, |product| {
            let catalog = state.catalog.clone();
            let product_id = identifier(product, "productId");
            async move {
                let product_id = product_id?;
                catalog
                    .variations(&product_id)
                    .await
                    .map_err(EnrichmentError::from)
            }
        })
        .await;

    Ok(Value::Array(render(
        enriched,
        Attach::Field("skus"),
        VARIATIONS_FAILED,
    )))
}
