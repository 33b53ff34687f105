//! Partial-failure tolerant fan-out.
//!
//! Given an already fetched list of primary items and an enrichment function,
//! [`Aggregator::aggregate`] runs one enrichment per item concurrently and
//! waits for all of them to settle. A failed enrichment only affects its own
//! item: the output always has the same length and order as the input.
//!
//! ```text
//! items:  [A, B, C]
//!           │  │  │      spawned up front, one task each
//!           ▼  ▼  ▼
//! enrich:  ok err ok     settle in any order
//!           │  │  │      written back by input index
//!           ▼  ▼  ▼
//! output: [A+ok, B+err, C+ok]
//! ```

use crate::metrics_defs::ENRICHMENT_RESULTS;
use crate::upstream::UpstreamError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Key under which a failed enrichment is annotated on the item.
pub const ERROR_FIELD: &str = "error";

#[derive(thiserror::Error, Debug)]
pub enum EnrichmentError {
    #[error("Item has no usable `{0}` field")]
    MissingIdentifier(&'static str),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Enrichment task failed: {0}")]
    TaskFailed(String),
}

pub type EnrichmentResult<P> = Result<P, EnrichmentError>;

/// A primary item together with the outcome of its enrichment.
#[derive(Debug)]
pub struct EnrichedItem<T, P> {
    pub item: T,
    pub enrichment: EnrichmentResult<P>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    AllSucceeded,
    PartiallyFailed,
}

impl Outcome {
    pub fn of<T, P>(items: &[EnrichedItem<T, P>]) -> Outcome {
        match items.iter().all(|i| i.enrichment.is_ok()) {
            true => Outcome::AllSucceeded,
            false => Outcome::PartiallyFailed,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    max_concurrency: Option<NonZeroUsize>,
}

impl Aggregator {
    pub fn new(max_concurrency: Option<NonZeroUsize>) -> Self {
        Self { max_concurrency }
    }

    /// Enriches every item concurrently and joins on all of them.
    ///
    /// Every enrichment future is created and spawned before any is awaited.
    /// When a concurrency limit is configured the spawned tasks queue on a
    /// semaphore local to this call. Each enrichment is attempted once.
    ///
    /// Dropping the returned future aborts the enrichments still in flight.
    pub async fn aggregate<T, P, F, Fut>(&self, items: Vec<T>, enrich: F) -> Vec<EnrichedItem<T, P>>
    where
        F: Fn(&T) -> Fut,
        Fut: Future<Output = EnrichmentResult<P>> + Send + 'static,
        P: Send + 'static,
    {
        let semaphore = self
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.get())));

        let mut join_set = JoinSet::new();
        // Maps task IDs back to input positions for failed joins
        let mut task_index = HashMap::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let enrichment = enrich(item);
            let semaphore = semaphore.clone();

            let abort_handle = join_set.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                (index, enrichment.await)
            });
            task_index.insert(abort_handle.id(), index);
        }

        let mut slots: Vec<Option<EnrichmentResult<P>>> = items.iter().map(|_| None).collect();

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((_, (index, result))) => slots[index] = Some(result),
                Err(e) => {
                    tracing::error!("Enrichment task failed: {e}");
                    if let Some(&index) = task_index.get(&e.id()) {
                        slots[index] = Some(Err(EnrichmentError::TaskFailed(e.to_string())));
                    }
                }
            }
        }

        let enriched: Vec<EnrichedItem<T, P>> = items
            .into_iter()
            .zip(slots)
            .map(|(item, slot)| EnrichedItem {
                item,
                enrichment: slot.unwrap_or_else(|| {
                    Err(EnrichmentError::TaskFailed("task did not report".into()))
                }),
            })
            .collect();

        record_outcomes(&enriched);
        enriched
    }
}

fn record_outcomes<T, P>(enriched: &[EnrichedItem<T, P>]) {
    let mut failures = 0u64;
    for (index, item) in enriched.iter().enumerate() {
        if let Err(e) = &item.enrichment {
            failures += 1;
            tracing::warn!(index, error = %e, "Enrichment failed, keeping item without it");
        }
    }
    let successes = enriched.len() as u64 - failures;

    shared::counter!(ENRICHMENT_RESULTS, "outcome" => "success").increment(successes);
    shared::counter!(ENRICHMENT_RESULTS, "outcome" => "failure").increment(failures);
    tracing::debug!(
        total = enriched.len(),
        failures,
        outcome = ?Outcome::of(enriched),
        "Aggregation finished"
    );
}

/// Reads an item's identifier as a string. Numeric ids are accepted.
pub fn identifier(item: &Value, field: &'static str) -> EnrichmentResult<String> {
    match item.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(EnrichmentError::MissingIdentifier(field)),
    }
}

/// Where enrichment payloads go when rendering an item as JSON.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attach {
    /// Merge the payload's fields into the item
    Flatten,
    /// Store the payload under the given field
    Field(&'static str),
}

impl EnrichedItem<Value, Value> {
    /// Renders the item as a single JSON object.
    ///
    /// On failure the item keeps its original fields, the attachment field
    /// (if any) is `null`, and `error` carries `failure_message`.
    pub fn into_json(self, attach: Attach, failure_message: &str) -> Value {
        let mut fields = match self.item {
            Value::Object(map) => map,
            other => Map::from_iter([("item".to_string(), other)]),
        };

        match (self.enrichment, attach) {
            (Ok(Value::Object(payload)), Attach::Flatten) => fields.extend(payload),
            (Ok(payload), Attach::Flatten) => {
                fields.insert("enrichment".into(), payload);
            }
            (Ok(payload), Attach::Field(name)) => {
                fields.insert(name.into(), payload);
            }
            (Err(_), attach) => {
                if let Attach::Field(name) = attach {
                    fields.insert(name.into(), Value::Null);
                }
                fields.insert(ERROR_FIELD.into(), Value::String(failure_message.into()));
            }
        }

        Value::Object(fields)
    }
}

/// Renders a whole batch, preserving order.
pub fn render(enriched: Vec<EnrichedItem<Value, Value>>, attach: Attach, failure_message: &str) -> Vec<Value> {
    enriched
        .into_iter()
        .map(|item| item.into_json(attach, failure_message))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::time::sleep;

    fn failure(id: &str) -> EnrichmentError {
        EnrichmentError::Upstream(UpstreamError::Status {
            path: format!("/price/{id}"),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Value::Null,
        })
    }

    fn ids(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "id": i.to_string() })).collect()
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let items = vec![json!({"id": "A"}), json!({"id": "B"}), json!({"id": "C"})];

        let enriched = Aggregator::default()
            .aggregate(items, |item| {
                let id = identifier(item, "id");
                async move {
                    match id?.as_str() {
                        "A" => Ok(json!({"price": 10})),
                        "C" => Ok(json!({"price": 20})),
                        other => Err(failure(other)),
                    }
                }
            })
            .await;

        assert_eq!(Outcome::of(&enriched), Outcome::PartiallyFailed);
        let rendered = render(enriched, Attach::Flatten, "Failed to fetch price");
        assert_eq!(
            Value::Array(rendered),
            json!([
                {"id": "A", "price": 10},
                {"id": "B", "error": "Failed to fetch price"},
                {"id": "C", "price": 20},
            ])
        );
    }

    #[tokio::test]
    async fn test_order_preserved_regardless_of_completion() {
        let items = ids(6);

        // Later items finish first
        let enriched = Aggregator::default()
            .aggregate(items, |item| {
                let id: u64 = identifier(item, "id").unwrap().parse().unwrap();
                async move {
                    sleep(Duration::from_millis(60 - id * 10)).await;
                    Ok(json!({ "seen": id }))
                }
            })
            .await;

        assert_eq!(enriched.len(), 6);
        for (index, item) in enriched.iter().enumerate() {
            assert_eq!(item.item["id"], index.to_string());
            assert_eq!(item.enrichment.as_ref().unwrap()["seen"], index as u64);
        }
    }

    #[tokio::test]
    async fn test_all_succeed_has_no_error_annotations() {
        let enriched = Aggregator::default()
            .aggregate(ids(4), |_| async { Ok(json!({"ok": true})) })
            .await;

        assert_eq!(Outcome::of(&enriched), Outcome::AllSucceeded);
        for item in render(enriched, Attach::Field("details"), "failed") {
            assert!(item.get(ERROR_FIELD).is_none());
            assert_eq!(item["details"], json!({"ok": true}));
        }
    }

    #[tokio::test]
    async fn test_single_failure_in_the_middle() {
        let enriched = Aggregator::default()
            .aggregate(ids(5), |item| {
                let id = identifier(item, "id");
                async move {
                    let id = id?;
                    if id == "2" {
                        Err(failure(&id))
                    } else {
                        Ok(json!({"sku": id}))
                    }
                }
            })
            .await;

        let rendered = render(enriched, Attach::Field("skuDetails"), "Failed to fetch SKU details");
        assert_eq!(rendered.len(), 5);
        for (index, item) in rendered.iter().enumerate() {
            assert_eq!(item["id"], index.to_string());
            if index == 2 {
                assert_eq!(item["skuDetails"], Value::Null);
                assert_eq!(item[ERROR_FIELD], "Failed to fetch SKU details");
            } else {
                assert_eq!(item["skuDetails"]["sku"], index.to_string());
                assert!(item.get(ERROR_FIELD).is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_missing_identifier_is_item_failure() {
        let items = vec![json!({"id": 7}), json!({"name": "no id"})];

        let enriched = Aggregator::default()
            .aggregate(items, |item| {
                let id = identifier(item, "id");
                async move { id.map(|id| json!({ "id_seen": id })) }
            })
            .await;

        assert_eq!(enriched[0].enrichment.as_ref().unwrap()["id_seen"], "7");
        assert!(matches!(
            enriched[1].enrichment,
            Err(EnrichmentError::MissingIdentifier("id"))
        ));
    }

    #[tokio::test]
    async fn test_panicking_enrichment_is_isolated() {
        let enriched = Aggregator::default()
            .aggregate(ids(3), |item| {
                let id = identifier(item, "id").unwrap();
                async move {
                    if id == "1" {
                        panic!("enrichment blew up");
                    }
                    Ok(json!({}))
                }
            })
            .await;

        assert!(enriched[0].enrichment.is_ok());
        assert!(matches!(
            enriched[1].enrichment,
            Err(EnrichmentError::TaskFailed(_))
        ));
        assert!(enriched[2].enrichment.is_ok());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let enriched: Vec<EnrichedItem<Value, Value>> = Aggregator::default()
            .aggregate(Vec::new(), |_| async { Ok(Value::Null) })
            .await;
        assert!(enriched.is_empty());
        assert_eq!(Outcome::of(&enriched), Outcome::AllSucceeded);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let aggregator = Aggregator::default();
        let enrich = |item: &Value| {
            let id = identifier(item, "id");
            async move {
                let id = id?;
                match id.as_str() {
                    "3" => Err(failure(&id)),
                    _ => Ok(json!({ "double": format!("{id}{id}") })),
                }
            }
        };

        let first = render(aggregator.aggregate(ids(5), enrich).await, Attach::Flatten, "x");
        let second = render(aggregator.aggregate(ids(5), enrich).await, Attach::Flatten, "x");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_latency_bounded_by_slowest_call() {
        let start = Instant::now();
        let enriched = Aggregator::default()
            .aggregate(ids(5), |_| async {
                sleep(Duration::from_millis(200)).await;
                Ok(Value::Null)
            })
            .await;

        // Sequential dispatch would take a full second
        assert!(start.elapsed() < Duration::from_millis(600));
        assert_eq!(enriched.len(), 5);
    }

    #[tokio::test]
    async fn test_dropping_aggregate_aborts_enrichments() {
        let completed = Arc::new(AtomicUsize::new(0));

        let aggregator = Aggregator::default();
        let aggregation = aggregator.aggregate(ids(3), |_| {
            let completed = completed.clone();
            async move {
                sleep(Duration::from_millis(100)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
        // The caller gives up while every enrichment is still sleeping
        let result = tokio::time::timeout(Duration::from_millis(20), aggregation).await;
        assert!(result.is_err());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let enriched = Aggregator::new(NonZeroUsize::new(2))
            .aggregate(ids(6), |_| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .await;

        assert_eq!(enriched.len(), 6);
        assert!(enriched.iter().all(|i| i.enrichment.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_render_non_object_payloads() {
        let ok = EnrichedItem {
            item: json!({"id": "A"}),
            enrichment: Ok(json!([1, 2])),
        };
        assert_eq!(
            ok.into_json(Attach::Flatten, "x"),
            json!({"id": "A", "enrichment": [1, 2]})
        );

        let scalar_item = EnrichedItem {
            item: json!("A"),
            enrichment: Err(EnrichmentError::MissingIdentifier("id")),
        };
        assert_eq!(
            scalar_item.into_json(Attach::Field("skus"), "failed"),
            json!({"item": "A", "skus": null, "error": "failed"})
        );
    }
}
