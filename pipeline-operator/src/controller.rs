use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use operator_common::resources::Fragment;
use operator_common::store::{ResourceStore, StoreError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health::{ComponentStatus, HealthHandle};
use crate::reconciler::{Reconciler, Trigger};

#[derive(Default)]
struct Keys {
    /// Waiting for a worker permit.
    queued: HashSet<Trigger>,
    in_flight: HashSet<Trigger>,
    dirty: HashSet<Trigger>,
}

/// Dispatches triggers to the reconciler.
///
/// Distinct keys run concurrently up to the worker limit. A trigger for a key
/// still waiting for a worker is dropped. A trigger for a key that is already
/// being reconciled marks it dirty, and the running pass repeats once it
/// finishes.
#[derive(Clone)]
pub struct Controller {
    reconciler: Reconciler,
    sender: mpsc::Sender<Trigger>,
    semaphore: Arc<Semaphore>,
    retry_backoff: Duration,
    keys: Arc<Mutex<Keys>>,
}

impl Controller {
    pub fn new(
        reconciler: Reconciler,
        sender: mpsc::Sender<Trigger>,
        max_concurrent: usize,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            reconciler,
            sender,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            retry_backoff,
            keys: Arc::default(),
        }
    }

    fn keys(&self) -> MutexGuard<'_, Keys> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of keys currently being reconciled.
    pub fn in_flight(&self) -> usize {
        self.keys().in_flight.len()
    }

    pub async fn run(self, mut receiver: mpsc::Receiver<Trigger>, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                trigger = receiver.recv() => match trigger {
                    Some(trigger) => self.dispatch(trigger, &mut tasks),
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "reconcile task failed");
                    }
                }
            }
        }

        info!("controller shutting down");
        tasks.shutdown().await;
    }

    fn dispatch(&self, trigger: Trigger, tasks: &mut JoinSet<()>) {
        {
            let mut keys = self.keys();
            if keys.queued.contains(&trigger) {
                debug!(%trigger, "already queued");
                return;
            }
            if keys.in_flight.contains(&trigger) {
                debug!(%trigger, "already reconciling, marking dirty");
                keys.dirty.insert(trigger);
                return;
            }
            keys.queued.insert(trigger.clone());
        }

        let worker = self.clone();
        tasks.spawn(async move { worker.process(trigger).await });
    }

    async fn process(self, trigger: Trigger) {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            self.keys().queued.remove(&trigger);
            return;
        };
        {
            let mut keys = self.keys();
            keys.queued.remove(&trigger);
            keys.in_flight.insert(trigger.clone());
        }

        loop {
            self.reconcile_once(&trigger).await;

            let again = {
                let mut keys = self.keys();
                if keys.dirty.remove(&trigger) {
                    true
                } else {
                    keys.in_flight.remove(&trigger);
                    false
                }
            };
            if !again {
                break;
            }
        }
    }

    async fn reconcile_once(&self, trigger: &Trigger) {
        match self.reconciler.reconcile(trigger).await {
            Ok(reconciled) => {
                debug!(%trigger, outcome = ?reconciled.outcome, "reconciled");
                for follow_up in reconciled.follow_up {
                    if self.sender.send(follow_up).await.is_err() {
                        warn!(%trigger, "trigger queue closed, dropping follow-up work");
                        break;
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    %trigger,
                    error = %e,
                    backoff = ?self.retry_backoff,
                    "reconcile failed, will retry"
                );
                self.retry_later(trigger.clone());
            }
            Err(e) => {
                error!(%trigger, error = %e, "reconcile failed");
            }
        }
    }

    fn retry_later(&self, trigger: Trigger) {
        let sender = self.sender.clone();
        let backoff = self.retry_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if sender.send(trigger).await.is_err() {
                debug!("trigger queue closed before retry");
            }
        });
    }
}

/// Every pipeline and instance currently in the store; pipelines first so
/// newly valid fragments are checked before the instances that use them.
pub async fn resync_triggers(store: &dyn ResourceStore) -> Result<Vec<Trigger>, StoreError> {
    let pipelines = store.list_pipelines().await?;
    let instances = store.list_instances().await?;

    Ok(pipelines
        .iter()
        .map(|p| Trigger::Pipeline(p.key()))
        .chain(instances.iter().map(|i| Trigger::Instance(i.key())))
        .collect())
}

pub async fn resync_loop(
    store: Arc<dyn ResourceStore>,
    sender: mpsc::Sender<Trigger>,
    period: Duration,
    liveness: HealthHandle,
    readiness: HealthHandle,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        liveness.report_healthy().await;

        match resync_triggers(store.as_ref()).await {
            Ok(triggers) => {
                readiness.report_healthy().await;
                debug!(count = triggers.len(), "resync");
                for trigger in triggers {
                    if sender.send(trigger).await.is_err() {
                        warn!("trigger queue closed, stopping resync");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "resync failed to list resources");
                readiness.report_status(ComponentStatus::Unhealthy).await;
            }
        }
    }
}
