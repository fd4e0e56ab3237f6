use operator_common::labels::SelectorError;
use thiserror::Error;

/// Why a fragment's sources do not map to a single role.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("sources list is empty")]
    EmptySources,
    #[error("unsupported source type: {0}")]
    UnsupportedSourceType(String),
    #[error("unknown vector role")]
    UnknownRole,
    #[error("failed to decode sources: {0}")]
    Decode(String),
}

/// Synthesis failures. All of them are configuration errors: retrying with
/// the same input produces the same error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to decode {section} of pipeline {pipeline}: {source}")]
    Decode {
        pipeline: String,
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("pipeline {pipeline}: source {source_name} has type {kind}, type kubernetes_logs only allowed")]
    SourceTypeNotAllowed {
        pipeline: String,
        source_name: String,
        kind: String,
    },
    #[error("pipeline {pipeline}: invalid {field} on source {source_name}: {error}")]
    InvalidSelector {
        pipeline: String,
        source_name: String,
        field: &'static str,
        #[source]
        error: SelectorError,
    },
    #[error("pipeline {pipeline}: source {source_name}: logs from external namespace not allowed")]
    ExternalNamespace {
        pipeline: String,
        source_name: String,
    },
    #[error("component {name} of pipeline {pipeline} collides with a component of pipeline {other}")]
    DuplicateComponent {
        pipeline: String,
        name: String,
        other: String,
    },
    #[error("pipeline {pipeline}: {component} reads from unknown input {input}")]
    UnknownInput {
        pipeline: String,
        component: String,
        input: String,
    },
    #[error("pipeline {pipeline}: more than one {kind} source")]
    DuplicateEventSource { pipeline: String, kind: String },
    #[error("pipeline {pipeline}: source {source_name} has invalid address {address:?}: {reason}")]
    InvalidAddress {
        pipeline: String,
        source_name: String,
        address: String,
        reason: String,
    },
    #[error("pipeline {pipeline}: no free port left for the event relay")]
    RelayPortsExhausted { pipeline: String },
    #[error("pipeline {pipeline}: duplicate port {port}/{protocol} already used by pipeline {other}")]
    DuplicatePort {
        pipeline: String,
        port: u16,
        protocol: String,
        other: String,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ConfigError {
    /// Identities of the fragments this error is attributed to. A collision
    /// belongs to the fragment that claimed the name or port second.
    pub fn pipelines(&self) -> Vec<&str> {
        match self {
            ConfigError::Decode { pipeline, .. }
            | ConfigError::SourceTypeNotAllowed { pipeline, .. }
            | ConfigError::InvalidSelector { pipeline, .. }
            | ConfigError::ExternalNamespace { pipeline, .. }
            | ConfigError::DuplicateComponent { pipeline, .. }
            | ConfigError::UnknownInput { pipeline, .. }
            | ConfigError::DuplicateEventSource { pipeline, .. }
            | ConfigError::InvalidAddress { pipeline, .. }
            | ConfigError::RelayPortsExhausted { pipeline, .. }
            | ConfigError::DuplicatePort { pipeline, .. } => vec![pipeline.as_str()],
            ConfigError::Serialize(_) => Vec::new(),
        }
    }

    /// `(pipeline, other)` for a collision between two distinct fragments.
    pub fn collision(&self) -> Option<(&str, &str)> {
        match self {
            ConfigError::DuplicateComponent {
                pipeline, other, ..
            }
            | ConfigError::DuplicatePort {
                pipeline, other, ..
            } if pipeline != other => Some((pipeline.as_str(), other.as_str())),
            _ => None,
        }
    }

    /// The same collision, attributed to the other fragment.
    pub fn swapped(self) -> Self {
        match self {
            ConfigError::DuplicateComponent {
                pipeline,
                name,
                other,
            } => ConfigError::DuplicateComponent {
                pipeline: other,
                name,
                other: pipeline,
            },
            ConfigError::DuplicatePort {
                pipeline,
                port,
                protocol,
                other,
            } => ConfigError::DuplicatePort {
                pipeline: other,
                port,
                protocol,
                other: pipeline,
            },
            error => error,
        }
    }
}
