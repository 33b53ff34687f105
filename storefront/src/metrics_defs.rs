use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "upstream.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of calls to the e-commerce API in seconds. Tagged with method.",
};

pub const ENRICHMENT_RESULTS: MetricDef = MetricDef {
    name: "enrichment.results",
    metric_type: MetricType::Counter,
    description: "Per-item enrichment outcomes. Tagged with outcome (success, failure).",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    UPSTREAM_REQUEST_DURATION,
    ENRICHMENT_RESULTS,
];
