use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use config_check::{CheckTarget, ConfigCheck};
use operator_common::compression::gzip;
use operator_common::hash::content_hash;
use operator_common::resources::{
    AnyPipeline, Fragment, Instance, InstanceKey, PipelineKey, Role,
};
use operator_common::store::{ResourceStore, StoreError};
use pipeline_config::ports::EventReceiver;
use pipeline_config::role::classify_fragment;
use pipeline_config::{
    allocate_ports, build, optimize, select_fragments, BuildParams, ConfigError, Selection,
    ServicePorts,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::applier::{Workload, WorkloadApplier};
use crate::error::{most_critical, ReconcileError};

/// A unit of work for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trigger {
    Instance(InstanceKey),
    Pipeline(PipelineKey),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Instance(key) => write!(f, "instance {key}"),
            Trigger::Pipeline(key) => write!(f, "pipeline {key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The configuration was promoted; `checked` is false when the check was
    /// skipped because the content was already applied or checks are off.
    Applied { config_hash: u32, checked: bool },
    InstanceRejected { reason: String },
    FragmentsRejected { pipelines: Vec<PipelineKey> },
    PipelineAccepted { role: Role, checked: usize },
    PipelineRejected { reason: String },
    Unchanged,
    Gone,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "applied",
            Outcome::InstanceRejected { .. } => "rejected",
            Outcome::FragmentsRejected { .. } => "fragments_rejected",
            Outcome::PipelineAccepted { .. } => "accepted",
            Outcome::PipelineRejected { .. } => "rejected",
            Outcome::Unchanged => "unchanged",
            Outcome::Gone => "gone",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub outcome: Outcome,
    /// Work this pass makes necessary elsewhere.
    pub follow_up: Vec<Trigger>,
}

impl Reconciled {
    fn done(outcome: Outcome) -> Self {
        Self {
            outcome,
            follow_up: Vec::new(),
        }
    }
}

struct Rendered {
    bytes: Vec<u8>,
    config_hash: u32,
    global_hash: u32,
    ports: ServicePorts,
}

/// Select, synthesize, allocate ports for aggregators, optimize and hash.
fn render<F: Fragment>(instance: &Instance, fragments: &[F]) -> Result<Rendered, ConfigError> {
    let params = BuildParams::for_instance(instance);
    let mut config = build(&params, fragments)?;
    let ports = match params.role {
        Role::Aggregator => allocate_ports(&mut config)?,
        Role::Agent => ServicePorts::default(),
    };
    optimize(&mut config);

    let bytes = config.to_json()?;
    Ok(Rendered {
        config_hash: content_hash(&bytes),
        global_hash: config.global_hash()?,
        bytes,
        ports,
    })
}

/// Whether `other` rather than `pipeline` is the fragment the instance does
/// not run yet: leaving it out gives back the last applied configuration.
fn other_is_newcomer(
    instance: &Instance,
    fragments: &[AnyPipeline],
    pipeline: &str,
    other: &str,
) -> bool {
    let Some(applied) = instance.status.last_applied_config_hash else {
        return false;
    };
    let reproduces = |excluded: &str| {
        let rest: Vec<AnyPipeline> = fragments
            .iter()
            .filter(|f| f.key().to_string() != excluded)
            .cloned()
            .collect();
        render(instance, &rest).is_ok_and(|r| r.config_hash == applied)
    };
    reproduces(other) && !reproduces(pipeline)
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    check: ConfigCheck,
    applier: Arc<dyn WorkloadApplier>,
    operator_namespace: String,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        check: ConfigCheck,
        applier: Arc<dyn WorkloadApplier>,
        operator_namespace: &str,
    ) -> Self {
        Self {
            store,
            check,
            applier,
            operator_namespace: operator_namespace.to_owned(),
        }
    }

    pub async fn reconcile(&self, trigger: &Trigger) -> Result<Reconciled, ReconcileError> {
        let (metric, kind, result) = match trigger {
            Trigger::Instance(key) => (
                "instance_reconciles_total",
                key.kind.kind(),
                self.reconcile_instance(key).await,
            ),
            Trigger::Pipeline(key) => (
                "pipeline_reconciles_total",
                key.kind.kind(),
                self.reconcile_pipeline(key).await,
            ),
        };

        let outcome = match &result {
            Ok(reconciled) => reconciled.outcome.label(),
            Err(e) if e.is_retryable() => "retry",
            Err(_) => "error",
        };
        let labels = [("kind", kind.to_owned()), ("outcome", outcome.to_owned())];
        metrics::counter!(metric, &labels).increment(1);

        result
    }

    /// Namespace holding the instance's secret, services and check pods.
    fn workload_namespace(&self, instance: &Instance) -> String {
        match (&instance.metadata.namespace, instance.kind.is_namespaced()) {
            (Some(namespace), true) => namespace.clone(),
            _ => self.operator_namespace.clone(),
        }
    }

    async fn run_check(
        &self,
        instance: &Instance,
        namespace: &str,
        config: &[u8],
    ) -> Result<(), ReconcileError> {
        let target = CheckTarget {
            instance: instance.name(),
            namespace,
            image: instance
                .spec
                .config_check
                .image
                .as_deref()
                .or(instance.spec.image.as_deref()),
            compress: instance.spec.compress_config,
        };
        self.check
            .run(&target, config)
            .await
            .map_err(|source| ReconcileError::Check {
                target: instance.key().to_string(),
                source,
            })
    }

    pub async fn reconcile_instance(
        &self,
        key: &InstanceKey,
    ) -> Result<Reconciled, ReconcileError> {
        let Some(mut instance) = self.store.get_instance(key).await? else {
            return Ok(Reconciled::done(Outcome::Gone));
        };
        if instance.metadata.deletion_timestamp.is_some() {
            return Ok(Reconciled::done(Outcome::Gone));
        }

        let pipelines = self.store.list_pipelines().await?;
        let fragments = select_fragments(&Selection::for_instance(&instance), &pipelines);
        let rendered = match render(&instance, &fragments) {
            Ok(rendered) => rendered,
            Err(e) => {
                return self
                    .reject_fragments(&instance, &fragments, &pipelines, e)
                    .await
            }
        };

        if instance.rejected(rendered.config_hash) {
            return Ok(Reconciled::done(Outcome::Unchanged));
        }

        let namespace = self.workload_namespace(&instance);
        let unchanged = instance.status.config_check_result == Some(true)
            && instance.status.last_applied_config_hash == Some(rendered.config_hash);
        let checked = !unchanged && !instance.spec.config_check.disabled;

        if checked {
            if let Err(e) = self.run_check(&instance, &namespace, &rendered.bytes).await {
                if e.is_retryable() {
                    return Err(e);
                }
                let reason = e.reason();
                warn!(instance = %key, %reason, "configuration rejected");
                instance.set_failed(reason.clone(), rendered.config_hash);
                self.store.update_instance_status(&instance).await?;
                return Ok(Reconciled::done(Outcome::InstanceRejected { reason }));
            }
        }

        let compressed = instance.spec.compress_config;
        let config = if compressed {
            gzip(&rendered.bytes)?
        } else {
            rendered.bytes
        };
        let event_receivers: Vec<EventReceiver> = rendered
            .ports
            .event_receivers(instance.name(), &namespace);
        let workload = Workload {
            instance: key.clone(),
            secret_name: instance.config_secret_name(),
            config,
            compressed,
            config_hash: rendered.config_hash,
            global_hash: rendered.global_hash,
            services: rendered.ports.services(instance.name()),
            event_receivers,
            namespace,
        };
        self.applier
            .apply(&workload)
            .await
            .map_err(|source| ReconcileError::Apply {
                instance: key.to_string(),
                source,
            })?;

        let before = instance.status.clone();
        instance.set_succeeded(rendered.config_hash, rendered.global_hash);
        if instance.status != before {
            self.store.update_instance_status(&instance).await?;
        }

        info!(instance = %key, hash = rendered.config_hash, checked, "configuration applied");
        Ok(Reconciled::done(Outcome::Applied {
            config_hash: rendered.config_hash,
            checked,
        }))
    }

    /// Record a synthesis failure on the fragment it is attributed to, then
    /// rebuild the instance without it.
    async fn reject_fragments(
        &self,
        instance: &Instance,
        fragments: &[AnyPipeline],
        pipelines: &[AnyPipeline],
        error: ConfigError,
    ) -> Result<Reconciled, ReconcileError> {
        let key = instance.key();
        let swap = error.collision().is_some_and(|(pipeline, other)| {
            other_is_newcomer(instance, fragments, pipeline, other)
        });
        let error = if swap { error.swapped() } else { error };

        let owners: BTreeSet<&str> = error.pipelines().into_iter().collect();
        if owners.is_empty() {
            return Err(ReconcileError::Build {
                target: key.to_string(),
                source: error,
            });
        }

        let reason = error.to_string();
        warn!(instance = %key, %reason, "pipelines rejected during synthesis");

        let mut rejected = Vec::new();
        for pipeline in pipelines {
            let pipeline_key = pipeline.key();
            if !owners.contains(pipeline_key.to_string().as_str()) {
                continue;
            }
            let hash = pipeline
                .pipeline_hash()
                .map_err(|e| StoreError::decode(pipeline_key.to_string(), e))?;
            let mut pipeline = pipeline.clone();
            match error.collision() {
                Some((_, other)) => pipeline.set_collision(reason.clone(), hash, other),
                None => pipeline.set_failed(reason.clone(), hash),
            }
            self.store.update_pipeline_status(&pipeline).await?;
            rejected.push(pipeline_key);
        }

        Ok(Reconciled {
            outcome: Outcome::FragmentsRejected {
                pipelines: rejected,
            },
            follow_up: vec![Trigger::Instance(key)],
        })
    }

    /// A collision recorded against a fragment that no longer exists.
    async fn collision_cleared(&self, pipeline: &AnyPipeline) -> Result<bool, ReconcileError> {
        let Some(other) = pipeline.collides_with() else {
            return Ok(false);
        };
        let pipelines = self.store.list_pipelines().await?;
        Ok(!pipelines
            .iter()
            .any(|p| !p.is_deleted() && p.key().to_string() == other))
    }

    /// Check one fragment on its own against every instance it would feed.
    pub async fn reconcile_pipeline(
        &self,
        key: &PipelineKey,
    ) -> Result<Reconciled, ReconcileError> {
        let instances = self.store.list_instances().await?;
        let all_instances = || -> Vec<Trigger> {
            instances.iter().map(|i| Trigger::Instance(i.key())).collect()
        };

        let pipeline = match self.store.get_pipeline(key).await? {
            Some(pipeline) if !pipeline.is_deleted() => pipeline,
            _ => {
                info!(pipeline = %key, "pipeline removed, refreshing instances");
                let removed = key.to_string();
                let mut follow_up: Vec<Trigger> = self
                    .store
                    .list_pipelines()
                    .await?
                    .iter()
                    .filter(|p| p.collides_with() == Some(removed.as_str()))
                    .map(|p| Trigger::Pipeline(p.key()))
                    .collect();
                follow_up.extend(all_instances());
                return Ok(Reconciled {
                    outcome: Outcome::Gone,
                    follow_up,
                });
            }
        };

        let hash = pipeline
            .pipeline_hash()
            .map_err(|e| StoreError::decode(key.to_string(), e))?;
        if pipeline.is_settled(hash) && !self.collision_cleared(&pipeline).await? {
            return Ok(Reconciled::done(Outcome::Unchanged));
        }

        let role = match classify_fragment(&pipeline) {
            Ok(role) => role,
            Err(source) => {
                let error = ReconcileError::Role {
                    pipeline: key.to_string(),
                    source,
                };
                return self
                    .reject_pipeline(pipeline, hash, error, all_instances())
                    .await;
            }
        };

        let mut tasks = JoinSet::new();
        for instance in instances.iter().filter(|i| {
            i.kind.role() == role && Selection::for_instance(i).covers(&pipeline)
        }) {
            let this = self.clone();
            let instance = instance.clone();
            let fragment = pipeline.clone();
            tasks.spawn(async move { this.check_fragment(&instance, fragment).await });
        }

        let mut errors = Vec::new();
        let mut checked = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => checked += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => {
                    error!(pipeline = %key, error = %e, "pipeline check task failed");
                    errors.push(ReconcileError::Task(e.to_string()));
                }
            }
        }

        if let Some(error) = most_critical(errors) {
            if error.is_retryable() {
                return Err(error);
            }
            return self
                .reject_pipeline(pipeline, hash, error, all_instances())
                .await;
        }

        let mut pipeline = pipeline;
        pipeline.set_succeeded(role, hash);
        self.store.update_pipeline_status(&pipeline).await?;
        info!(pipeline = %key, %role, checked, "pipeline accepted");

        Ok(Reconciled {
            outcome: Outcome::PipelineAccepted { role, checked },
            follow_up: instances
                .iter()
                .filter(|i| i.kind.role() == role)
                .map(|i| Trigger::Instance(i.key()))
                .collect(),
        })
    }

    /// Returns whether a check actually ran.
    async fn check_fragment(
        &self,
        instance: &Instance,
        fragment: AnyPipeline,
    ) -> Result<bool, ReconcileError> {
        let rendered =
            render(instance, &[fragment]).map_err(|source| ReconcileError::Build {
                target: instance.key().to_string(),
                source,
            })?;
        if instance.spec.config_check.disabled {
            return Ok(false);
        }

        let namespace = self.workload_namespace(instance);
        self.run_check(instance, &namespace, &rendered.bytes)
            .await?;
        Ok(true)
    }

    async fn reject_pipeline(
        &self,
        mut pipeline: AnyPipeline,
        hash: u32,
        error: ReconcileError,
        follow_up: Vec<Trigger>,
    ) -> Result<Reconciled, ReconcileError> {
        let reason = error.reason();
        warn!(pipeline = %pipeline.key(), %reason, "pipeline rejected");
        pipeline.set_failed(reason.clone(), hash);
        self.store.update_pipeline_status(&pipeline).await?;

        Ok(Reconciled {
            outcome: Outcome::PipelineRejected { reason },
            follow_up,
        })
    }
}
