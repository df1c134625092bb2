//! Metrics definitions for the submission pipeline.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with method and status.",
};

pub const SUBMISSIONS_RECEIVED: MetricDef = MetricDef {
    name: "submissions.received",
    metric_type: MetricType::Counter,
    description: "Form bodies accepted by the ingestion endpoint",
};

pub const RELAY_SEND_FAILED: MetricDef = MetricDef {
    name: "relay.send.failed",
    metric_type: MetricType::Counter,
    description: "Submissions that could not be handed to the datagram relay. Tagged with reason.",
};

pub const RELAY_DATAGRAMS_RECEIVED: MetricDef = MetricDef {
    name: "relay.datagrams.received",
    metric_type: MetricType::Counter,
    description: "Datagrams read by the receive loop",
};

pub const RELAY_DATAGRAMS_DROPPED: MetricDef = MetricDef {
    name: "relay.datagrams.dropped",
    metric_type: MetricType::Counter,
    description: "Datagrams discarded by the receive loop. Tagged with reason.",
};

pub const STORE_APPEND_DURATION: MetricDef = MetricDef {
    name: "store.append.duration",
    metric_type: MetricType::Histogram,
    description: "Time to read, update and rewrite the store document in seconds",
};

pub const STORE_APPEND_FAILED: MetricDef = MetricDef {
    name: "store.append.failed",
    metric_type: MetricType::Counter,
    description: "Appends that failed with a corrupt document or an I/O error",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    SUBMISSIONS_RECEIVED,
    RELAY_SEND_FAILED,
    RELAY_DATAGRAMS_RECEIVED,
    RELAY_DATAGRAMS_DROPPED,
    STORE_APPEND_DURATION,
    STORE_APPEND_FAILED,
];
