use std::sync::Arc;
use std::time::{Duration, Instant};

use operator_common::compression::gzip;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{CheckError, RuntimeError};
use crate::manifest::{random_suffix, CheckResources};
use crate::runtime::{CheckObject, CheckRuntime, PodPhase};

pub const DEFAULT_IMAGE: &str = "timberio/vector:0.28.1-distroless-libc";
pub const DEFAULT_UNPACK_IMAGE: &str = "busybox:1.36";
pub const LOG_TAIL_LINES: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    InfraError,
}

impl CheckState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckState::Pending | CheckState::Running)
    }
}

impl From<&CheckError> for CheckState {
    fn from(error: &CheckError) -> Self {
        match error {
            CheckError::Validation { .. } => CheckState::Failed,
            CheckError::TimedOut { .. } => CheckState::TimedOut,
            CheckError::Runtime(_) => CheckState::InfraError,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub image: String,
    pub unpack_image: String,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            image: DEFAULT_IMAGE.to_owned(),
            unpack_image: DEFAULT_UNPACK_IMAGE.to_owned(),
        }
    }
}

/// The instance a config is checked for.
#[derive(Debug, Clone, Copy)]
pub struct CheckTarget<'a> {
    pub instance: &'a str,
    pub namespace: &'a str,
    pub image: Option<&'a str>,
    pub compress: bool,
}

/// Runs a serialized config through the agent binary's `validate` mode in a
/// throwaway pod.
#[derive(Clone)]
pub struct ConfigCheck {
    runtime: Arc<dyn CheckRuntime>,
    settings: CheckSettings,
}

impl ConfigCheck {
    pub fn new(runtime: Arc<dyn CheckRuntime>, settings: CheckSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    /// Objects created by the run are removed before returning, whatever the
    /// outcome.
    pub async fn run(&self, target: &CheckTarget<'_>, config: &[u8]) -> Result<(), CheckError> {
        let resources = CheckResources::new(
            target.instance,
            &random_suffix(),
            target.namespace,
            target.image.unwrap_or(self.settings.image.as_str()),
            &self.settings.unpack_image,
            target.compress,
        );
        let started = Instant::now();
        info!(check = %resources.name, namespace = %resources.namespace, "starting config check");

        let result =
            match tokio::time::timeout(self.settings.timeout, self.execute(&resources, config))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(CheckError::TimedOut {
                    name: resources.name.clone(),
                    timeout: self.settings.timeout,
                }),
            };

        self.cleanup(&resources).await;

        let outcome = match &result {
            Ok(()) => "valid",
            Err(e) => e.outcome(),
        };
        let labels = [("outcome", outcome.to_owned())];
        metrics::counter!("config_checks_total", &labels).increment(1);
        metrics::histogram!("config_check_duration_seconds", &labels)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(()) => info!(check = %resources.name, "config check passed"),
            Err(e) => warn!(
                check = %resources.name,
                state = ?CheckState::from(e),
                error = %e,
                "config check did not pass"
            ),
        }
        result
    }

    async fn execute(&self, resources: &CheckResources, config: &[u8]) -> Result<(), CheckError> {
        let payload = if resources.compressed {
            gzip(config).map_err(RuntimeError::from)?
        } else {
            config.to_vec()
        };

        self.runtime
            .create(CheckObject::ServiceAccount, &resources.service_account())
            .await?;
        self.runtime
            .create(CheckObject::Secret, &resources.secret(&payload))
            .await?;
        self.runtime
            .create(CheckObject::Pod, &resources.pod())
            .await?;

        let mut state = CheckState::Pending;
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let phase = self
                .runtime
                .pod_phase(&resources.namespace, &resources.name)
                .await?;
            let next = match phase {
                PodPhase::Pending | PodPhase::Unknown => CheckState::Pending,
                PodPhase::Running => CheckState::Running,
                PodPhase::Succeeded => return Ok(()),
                PodPhase::Failed => {
                    let reason = self
                        .runtime
                        .pod_logs(&resources.namespace, &resources.name, LOG_TAIL_LINES)
                        .await?;
                    return Err(CheckError::Validation { reason });
                }
            };

            if next != state {
                debug!(
                    check = %resources.name,
                    from = ?state,
                    to = ?next,
                    "config check transition"
                );
                state = next;
            }
        }
    }

    async fn cleanup(&self, resources: &CheckResources) {
        for object in CheckObject::all() {
            if let Err(e) = self
                .runtime
                .delete(object, &resources.namespace, &resources.name)
                .await
            {
                warn!(
                    check = %resources.name,
                    ?object,
                    error = %e,
                    "failed to clean up config check object"
                );
            }
        }
    }
}
