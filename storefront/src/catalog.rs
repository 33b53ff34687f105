//! Typed operations on top of the e-commerce platform API.
//!
//! This is the only place that knows upstream path templates.

use crate::upstream::{ApiPath, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};
use serde_json::Value;
use std::sync::Arc;

const SKU_BY_ID: [&str; 5] = ["api", "catalog_system", "pvt", "sku", "stockkeepingunitbyid"];
const PRODUCT_SEARCH: [&str; 5] = ["api", "catalog_system", "pub", "products", "search"];
const PRODUCT_VARIATIONS: [&str; 5] = ["api", "catalog_system", "pub", "products", "variations"];
const ORDER_FORM: [&str; 4] = ["api", "checkout", "pub", "orderForm"];
const SIMULATION: [&str; 5] = ["api", "checkout", "pub", "orderForms", "simulation"];

/// Field of the collection products response holding the items
pub const COLLECTION_DATA_FIELD: &str = "Data";

#[derive(Clone)]
pub struct Catalog {
    upstream: Arc<dyn Upstream>,
    account: Option<String>,
}

impl Catalog {
    pub fn new(upstream: Arc<dyn Upstream>, account: Option<String>) -> Self {
        Self { upstream, account }
    }

    async fn get(&self, path: ApiPath) -> Result<Value, UpstreamError> {
        let response = self.upstream.send(UpstreamRequest::get(path)).await?;
        Ok(response.body)
    }

    pub async fn sku(&self, sku_id: &str) -> Result<Value, UpstreamError> {
        self.get(join(&SKU_BY_ID, [sku_id])).await
    }

    pub async fn price(&self, sku_id: &str) -> Result<Value, UpstreamError> {
        let segments = self
            .account
            .iter()
            .map(String::as_str)
            .chain(["pricing", "prices", sku_id]);
        self.get(ApiPath::new(segments)).await
    }

    /// Products of a collection. The items are read from the `Data` field.
    pub async fn collection_products(&self, collection_id: &str) -> Result<Vec<Value>, UpstreamError> {
        let path = ApiPath::new(["api", "catalog", "pvt", "collection", collection_id, "products"]);
        let display = path.to_string();
        let mut body = self.get(path).await?;

        match body.get_mut(COLLECTION_DATA_FIELD).map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(UpstreamError::UnexpectedPayload {
                path: display,
                message: format!("expected an array under `{COLLECTION_DATA_FIELD}`"),
            }),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Value>, UpstreamError> {
        let path = join(&PRODUCT_SEARCH, [query]);
        let display = path.to_string();

        match self.get(path).await? {
            Value::Array(items) => Ok(items),
            _ => Err(UpstreamError::UnexpectedPayload {
                path: display,
                message: "expected an array of products".into(),
            }),
        }
    }

    pub async fn variations(&self, product_id: &str) -> Result<Value, UpstreamError> {
        self.get(join(&PRODUCT_VARIATIONS, [product_id])).await
    }

    pub async fn simulate(&self, simulation: Value) -> Result<Value, UpstreamError> {
        let response = self
            .upstream
            .send(UpstreamRequest::post(join(&SIMULATION, []), simulation))
            .await?;
        Ok(response.body)
    }

    pub async fn order_form(&self) -> Result<Value, UpstreamError> {
        self.get(join(&ORDER_FORM, [])).await
    }

    pub async fn order_form_by_id(&self, order_form_id: &str) -> Result<Value, UpstreamError> {
        self.get(join(&ORDER_FORM, [order_form_id])).await
    }

    /// Adds items to an order form. The upstream status is kept so it can be
    /// relayed to the caller.
    pub async fn add_items(
        &self,
        order_form_id: &str,
        order_items: Value,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let path = join(&ORDER_FORM, [order_form_id, "items"]);
        let body = serde_json::json!({ "orderItems": order_items });
        self.upstream.send(UpstreamRequest::post(path, body)).await
    }
}

fn join<const N: usize, const M: usize>(prefix: &[&str; N], rest: [&str; M]) -> ApiPath {
    ApiPath::new(prefix.iter().copied().chain(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::FakeUpstream;
    use http::{Method, StatusCode};
    use serde_json::json;

    fn catalog(upstream: FakeUpstream, account: Option<&str>) -> (Arc<FakeUpstream>, Catalog) {
        let upstream = Arc::new(upstream);
        let catalog = Catalog::new(upstream.clone(), account.map(String::from));
        (upstream, catalog)
    }

    #[tokio::test]
    async fn test_paths() {
        let (upstream, catalog) = catalog(FakeUpstream::new(), Some("store"));

        let _ = catalog.sku("1").await;
        let _ = catalog.price("1").await;
        let _ = catalog.variations("9").await;
        let _ = catalog.order_form().await;
        let _ = catalog.order_form_by_id("of1").await;
        let _ = catalog.search("red shoes").await;

        let paths: Vec<String> = upstream.calls().iter().map(|c| c.path.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "/api/catalog_system/pvt/sku/stockkeepingunitbyid/1",
                "/store/pricing/prices/1",
                "/api/catalog_system/pub/products/variations/9",
                "/api/checkout/pub/orderForm",
                "/api/checkout/pub/orderForm/of1",
                "/api/catalog_system/pub/products/search/red shoes",
            ]
        );
    }

    #[tokio::test]
    async fn test_price_without_account() {
        let (upstream, catalog) = catalog(FakeUpstream::new(), None);
        let _ = catalog.price("5").await;
        assert_eq!(upstream.calls()[0].path.to_string(), "/pricing/prices/5");
    }

    #[tokio::test]
    async fn test_collection_products_reads_data_field() {
        let (_, catalog) = catalog(
            FakeUpstream::new()
                .with_json(
                    "/api/catalog/pvt/collection/10/products",
                    json!({"Data": [{"SkuId": 1}, {"SkuId": 2}], "Page": 1}),
                )
                .with_json("/api/catalog/pvt/collection/11/products", json!({"Page": 1})),
            None,
        );

        let items = catalog.collection_products("10").await.unwrap();
        assert_eq!(items, vec![json!({"SkuId": 1}), json!({"SkuId": 2})]);

        assert!(matches!(
            catalog.collection_products("11").await.unwrap_err(),
            UpstreamError::UnexpectedPayload { .. }
        ));
    }

    #[tokio::test]
    async fn test_search_requires_array() {
        let (_, catalog) = catalog(
            FakeUpstream::new().with_json(
                "/api/catalog_system/pub/products/search/bad",
                json!({"not": "an array"}),
            ),
            None,
        );
        assert!(matches!(
            catalog.search("bad").await.unwrap_err(),
            UpstreamError::UnexpectedPayload { .. }
        ));
    }

    #[tokio::test]
    async fn test_add_items_wraps_body_and_keeps_status() {
        let (upstream, catalog) = catalog(
            FakeUpstream::new().with_status(
                "/api/checkout/pub/orderForm/of1/items",
                StatusCode::CREATED,
                json!({"orderFormId": "of1"}),
            ),
            None,
        );

        let response = catalog
            .add_items("of1", json!([{"id": "1", "quantity": 1, "seller": "1"}]))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::CREATED);

        let call = &upstream.calls()[0];
        assert_eq!(call.method, Method::POST);
        assert_eq!(
            call.body,
            Some(json!({"orderItems": [{"id": "1", "quantity": 1, "seller": "1"}]}))
        );
    }
}
