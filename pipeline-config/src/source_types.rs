//! Vector source types grouped by where they can run.

/// Sources an aggregator can host: network receivers and queue consumers.
pub const AGGREGATOR_SOURCE_TYPES: &[&str] = &[
    "amqp",
    "aws_kinesis_firehose",
    "aws_s3",
    "aws_sqs",
    "datadog_agent",
    "fluent",
    "gcp_pubsub",
    "heroku_logs",
    "http_client",
    "http_server",
    "internal_logs",
    "internal_metrics",
    "kafka",
    "kubernetes_events",
    "logstash",
    "nats",
    "opentelemetry",
    "pulsar",
    "redis",
    "socket",
    "splunk_hec",
    "statsd",
    "syslog",
    "vector",
];

/// Sources tied to the node an agent runs on.
pub const AGENT_SOURCE_TYPES: &[&str] = &[
    "apache_metrics",
    "demo_logs",
    "dnstap",
    "docker_logs",
    "eventstoredb_metrics",
    "file",
    "host_metrics",
    "http_client",
    "internal_logs",
    "internal_metrics",
    "journald",
    "kubernetes_logs",
    "mongodb_metrics",
    "nginx_metrics",
    "opentelemetry",
    "postgresql_metrics",
    "prometheus_pushgateway",
    "prometheus_remote_write",
    "prometheus_scrape",
];

pub fn is_agent_type(kind: &str) -> bool {
    AGENT_SOURCE_TYPES.contains(&kind)
}

pub fn is_aggregator_type(kind: &str) -> bool {
    AGGREGATOR_SOURCE_TYPES.contains(&kind)
}
