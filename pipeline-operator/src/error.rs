use config_check::CheckError;
use operator_common::store::StoreError;
use pipeline_config::{ConfigError, RoleError};
use thiserror::Error;

/// Errors from reconciling one instance or one pipeline.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to read or write resources: {0}")]
    Store(#[from] StoreError),
    #[error("failed to build config for {target}: {source}")]
    Build {
        target: String,
        #[source]
        source: ConfigError,
    },
    #[error("failed to classify pipeline {pipeline}: {source}")]
    Role {
        pipeline: String,
        #[source]
        source: RoleError,
    },
    #[error("config check for {target} did not pass: {source}")]
    Check {
        target: String,
        #[source]
        source: CheckError,
    },
    #[error("failed to apply workload for {instance}: {source}")]
    Apply {
        instance: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to compress config: {0}")]
    Compress(#[from] std::io::Error),
    #[error("reconcile task failed: {0}")]
    Task(String),
}

impl ReconcileError {
    /// Infrastructure failures are retried after a backoff; failures caused by
    /// fragment content are recorded in status instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Store(e) | ReconcileError::Apply { source: e, .. } => e.is_retryable(),
            ReconcileError::Check { source, .. } => source.is_retryable(),
            ReconcileError::Task(_) => true,
            ReconcileError::Build { .. }
            | ReconcileError::Role { .. }
            | ReconcileError::Compress(_) => false,
        }
    }

    /// Rank used to pick one error out of a fan-out. A definite rejection
    /// outranks an infrastructure failure.
    pub fn severity(&self) -> u8 {
        match self {
            ReconcileError::Check { source, .. } if !source.is_retryable() => 4,
            ReconcileError::Build { .. } | ReconcileError::Role { .. } => 3,
            ReconcileError::Apply { .. } | ReconcileError::Check { .. } => 2,
            ReconcileError::Store(_) | ReconcileError::Compress(_) | ReconcileError::Task(_) => 1,
        }
    }

    /// Reason recorded on a rejected fragment.
    pub fn reason(&self) -> String {
        match self {
            ReconcileError::Check {
                source: CheckError::Validation { reason },
                ..
            } => reason.clone(),
            ReconcileError::Build { source, .. } => source.to_string(),
            ReconcileError::Role { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

/// The most severe error of a fan-out; ties keep the first one seen.
pub fn most_critical(errors: Vec<ReconcileError>) -> Option<ReconcileError> {
    errors
        .into_iter()
        .fold(None, |worst: Option<ReconcileError>, e| match worst {
            Some(w) if w.severity() >= e.severity() => Some(w),
            _ => Some(e),
        })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn timed_out() -> ReconcileError {
        ReconcileError::Check {
            target: "Vector/vector/agent".to_owned(),
            source: CheckError::TimedOut {
                name: "configcheck-agent-abcde".to_owned(),
                timeout: Duration::from_secs(1),
            },
        }
    }

    fn invalid(reason: &str) -> ReconcileError {
        ReconcileError::Check {
            target: "Vector/vector/agent".to_owned(),
            source: CheckError::Validation {
                reason: reason.to_owned(),
            },
        }
    }

    #[test]
    fn classifies_retryable_errors() {
        assert!(timed_out().is_retryable());
        assert!(!invalid("bad").is_retryable());
        assert!(ReconcileError::Store(StoreError::Conflict("x".to_owned())).is_retryable());
        assert!(!ReconcileError::Role {
            pipeline: "ns/p".to_owned(),
            source: RoleError::EmptySources,
        }
        .is_retryable());
    }

    #[test]
    fn rejection_outranks_infrastructure_failures() {
        let worst = most_critical(vec![timed_out(), invalid("first"), invalid("second")]).unwrap();
        assert_eq!(worst.reason(), "first");
        assert!(most_critical(Vec::new()).is_none());
    }
}
