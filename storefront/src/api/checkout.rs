//! Checkout routes: order simulation and the order form (cart).

use super::utils::{deserialize_body, present, require};
use super::{ApiState, Reply, RouteRequest};
use crate::aggregator::{Attach, EnrichmentError, identifier, render};
use crate::errors::ApiError;
use crate::upstream::UpstreamError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SIMULATION_FIELDS_REQUIRED: &str = "Items, postalCode, and country are required";
pub const ORDER_FORM_ID_REQUIRED: &str = "Order Form ID is required";
pub const ITEM_DATA_REQUIRED: &str = "Item data is required";

const DEFAULT_SELLER: &str = "1";
const PRODUCT_DETAILS_FIELD: &str = "productDetails";
const SKU_DETAILS_FAILED: &str = "Failed to fetch SKU details";
const CART_DETAILS_FAILED: &str = "Error combining OrderForm and SKU details";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationRequest {
    items: Option<Vec<SimulationItemRequest>>,
    postal_code: Option<Value>,
    country: Option<Value>,
}

#[derive(Deserialize)]
struct SimulationItemRequest {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(default)]
    seller: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Simulation {
    items: Vec<SimulationItem>,
    postal_code: Value,
    country: Value,
}

/// An item as forwarded upstream. Absent `id` or `quantity` stay absent.
#[derive(Debug, PartialEq, Serialize)]
struct SimulationItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<Value>,
    seller: Value,
}

impl From<SimulationItemRequest> for SimulationItem {
    fn from(item: SimulationItemRequest) -> Self {
        SimulationItem {
            id: item.id,
            quantity: item.quantity,
            seller: present(item.seller).unwrap_or_else(|| DEFAULT_SELLER.into()),
        }
    }
}

/// `POST /simulateOrder`
///
/// `postalCode`, `country` and `seller` are forwarded with whatever JSON type
/// the caller used. An empty `items` array is forwarded as is.
pub async fn simulate_order(state: &ApiState, request: &RouteRequest) -> Result<Value, ApiError> {
    let body: SimulationRequest = deserialize_body(&request.body)?;

    let missing = || ApiError::MissingParameter(SIMULATION_FIELDS_REQUIRED);
    let items = body.items.ok_or_else(missing)?;
    let postal_code = present(body.postal_code).ok_or_else(missing)?;
    let country = present(body.country).ok_or_else(missing)?;

    let simulation = Simulation {
        items: items.into_iter().map(SimulationItem::from).collect(),
        postal_code,
        country,
    };
    let simulation = serde_json::to_value(&simulation)
        .map_err(|e| ApiError::InvalidBody(e.to_string()))?;

    let result = state
        .catalog
        .simulate(simulation)
        .await
        .map_err(ApiError::upstream("Error simulating order"))?;

    tracing::debug!(result = %result, "Simulation result");
    Ok(result)
}

/// `GET /cart/`
pub async fn cart(state: &ApiState) -> Result<Value, ApiError> {
    state
        .catalog
        .order_form()
        .await
        .map_err(ApiError::upstream("Error fetching OrderForm"))
}

/// `GET /cart-with-product-details/{orderFormId}`
///
/// Returns the order form with an extra `productDetails` array: its items,
/// each with SKU details under `skuDetails`.
pub async fn cart_with_product_details(
    state: &ApiState,
    request: &RouteRequest,
) -> Result<Value, ApiError> {
    let order_form_id = require(request.param("orderFormId"), ORDER_FORM_ID_REQUIRED)?;

    let order_form = state
        .catalog
        .order_form_by_id(order_form_id)
        .await
        .map_err(ApiError::upstream(CART_DETAILS_FAILED))?;

    let Value::Object(mut order_form) = order_form else {
        return Err(ApiError::Upstream {
            reason: CART_DETAILS_FAILED,
            source: UpstreamError::UnexpectedPayload {
                path: format!("/api/checkout/pub/orderForm/{order_form_id}"),
                message: "expected an order form object".into(),
            },
        });
    };

    let items = match order_form.get("items") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let details = match items.is_empty() {
        true => Vec::new(),
        false => {
            let enriched = state
                .aggregator
                .aggregate(items, |item| {
                    let catalog = state.catalog.clone();
                    let sku_id = identifier(item, "id");
                    async move {
                        let sku_id = sku_id?;
                        catalog.sku(&sku_id).await.map_err(EnrichmentError::from)
                    }
                })
                .await;
            render(enriched, Attach::Field("skuDetails"), SKU_DETAILS_FAILED)
        }
    };

    order_form.insert(PRODUCT_DETAILS_FIELD.into(), Value::Array(details));
    Ok(Value::Object(order_form))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddToCartRequest {
    order_items: Option<Value>,
}

/// `POST /add-to-cart/{orderFormId}`
///
/// Relays the upstream status code along with its body.
pub async fn add_to_cart(state: &ApiState, request: &RouteRequest) -> Result<Reply, ApiError> {
    let order_form_id = require(request.param("orderFormId"), ORDER_FORM_ID_REQUIRED)?;
    let body: AddToCartRequest = deserialize_body(&request.body)?;

    let order_items =
        present(body.order_items).ok_or(ApiError::MissingParameter(ITEM_DATA_REQUIRED))?;

    let response = state
        .catalog
        .add_items(order_form_id, order_items)
        .await
        .map_err(ApiError::upstream("Failed to add item to cart"))?;

    Ok(Reply {
        status: response.status,
        body: response.body,
    })
}
