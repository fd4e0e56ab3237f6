use operator_common::resources::Role;
use serde_json::json;

use crate::model::{
    Sink, Source, BLACKHOLE, INTERNAL_METRICS, KUBERNETES_LOGS, PROMETHEUS_EXPORTER, VECTOR,
};

pub const DEFAULT_SOURCE_NAME: &str = "defaultSource";
pub const DEFAULT_SINK_NAME: &str = "defaultSink";
pub const INTERNAL_METRICS_SOURCE_NAME: &str = "internalMetricsSource";
pub const INTERNAL_METRICS_SINK_NAME: &str = "internalMetricsSink";

pub const API_PORT: u16 = 8686;
pub const DEFAULT_AGGREGATOR_PORT: u16 = 8989;
pub const DEFAULT_PIPELINE_NAME: &str = "default-pipeline";
pub const DEFAULT_NAMESPACE: &str = "default";

pub const AGENT_DATA_DIR: &str = "/vector-data-dir";
pub const AGGREGATOR_DATA_DIR: &str = "/var/lib/vector";

pub fn api_address() -> String {
    format!("0.0.0.0:{API_PORT}")
}

pub fn default_data_dir(role: Role) -> &'static str {
    match role {
        Role::Agent => AGENT_DATA_DIR,
        Role::Aggregator => AGGREGATOR_DATA_DIR,
    }
}

/// Collector used when nothing else feeds an instance.
pub fn default_source(role: Role) -> Source {
    match role {
        Role::Agent => Source::new(KUBERNETES_LOGS),
        Role::Aggregator => Source::new(VECTOR)
            .with_option("address", format!("0.0.0.0:{DEFAULT_AGGREGATOR_PORT}")),
    }
}

pub fn default_sink() -> Sink {
    Sink::new(BLACKHOLE, &[DEFAULT_SOURCE_NAME])
        .with_option("rate", json!(100))
        .with_option("print_interval_secs", json!(60))
}

pub fn internal_metrics_source() -> Source {
    Source::new(INTERNAL_METRICS)
}

pub fn internal_metrics_sink() -> Sink {
    Sink::new(PROMETHEUS_EXPORTER, &[INTERNAL_METRICS_SOURCE_NAME])
}
