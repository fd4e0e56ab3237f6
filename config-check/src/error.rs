use std::time::Duration;

use operator_common::store::StoreError;
use thiserror::Error;

/// Failures talking to whatever runs the check workload.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to compress config: {0}")]
    Compress(#[from] std::io::Error),
    #[error("invalid {what} manifest: missing {field}")]
    Manifest {
        what: &'static str,
        field: &'static str,
    },
    #[error("{0}")]
    Other(String),
}

/// Outcome of a config check that did not end in `Succeeded`.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("config check failed: {reason}")]
    Validation { reason: String },
    #[error("config check {name} did not finish within {timeout:?}")]
    TimedOut { name: String, timeout: Duration },
    #[error("config check could not run: {0}")]
    Runtime(#[from] RuntimeError),
}

impl CheckError {
    /// A rejected config stays rejected until the config itself changes.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CheckError::Validation { .. })
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            CheckError::Validation { .. } => "invalid",
            CheckError::TimedOut { .. } => "timed_out",
            CheckError::Runtime(_) => "infra_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_failures_are_final() {
        let invalid = CheckError::Validation {
            reason: "unknown field".to_owned(),
        };
        let timed_out = CheckError::TimedOut {
            name: "configcheck-x-abcde".to_owned(),
            timeout: Duration::from_secs(1),
        };
        let infra = CheckError::Runtime(RuntimeError::Other("boom".to_owned()));

        assert!(!invalid.is_retryable());
        assert!(timed_out.is_retryable());
        assert!(infra.is_retryable());
        assert_eq!(invalid.outcome(), "invalid");
        assert_eq!(timed_out.outcome(), "timed_out");
        assert_eq!(infra.outcome(), "infra_error");
    }
}
