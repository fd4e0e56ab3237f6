//! A `CheckRuntime` that plays back a fixed sequence of pod phases.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RuntimeError;
use crate::runtime::{CheckObject, CheckRuntime, PodPhase};

#[derive(Default)]
struct Script {
    phases: VecDeque<PodPhase>,
    last_phase: Option<PodPhase>,
    logs: String,
    fail_create: Option<CheckObject>,
    fail_deletes: bool,
    create_delay: Option<Duration>,
    created: Vec<(CheckObject, Value)>,
    deleted: Vec<(CheckObject, String)>,
    polls: usize,
}

/// Once the scripted phases run out the last one repeats; with no phases at
/// all the pod stays `Pending` forever.
#[derive(Clone, Default)]
pub struct ScriptedRuntime {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRuntime {
    pub fn new(phases: impl IntoIterator<Item = PodPhase>) -> Self {
        let runtime = Self::default();
        runtime.lock().phases = phases.into_iter().collect();
        runtime
    }

    /// Every check passes on the first poll.
    pub fn passing() -> Self {
        Self::new([PodPhase::Succeeded])
    }

    pub fn failing(logs: &str) -> Self {
        let runtime = Self::new([PodPhase::Running, PodPhase::Failed]);
        runtime.lock().logs = logs.to_owned();
        runtime
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("scripted runtime lock poisoned")
    }

    pub fn fail_create(&self, object: CheckObject) {
        self.lock().fail_create = Some(object);
    }

    pub fn fail_deletes(&self) {
        self.lock().fail_deletes = true;
    }

    pub fn delay_creates(&self, delay: Duration) {
        self.lock().create_delay = Some(delay);
    }

    pub fn created(&self) -> Vec<(CheckObject, Value)> {
        self.lock().created.clone()
    }

    pub fn deleted(&self) -> Vec<(CheckObject, String)> {
        self.lock().deleted.clone()
    }

    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    /// Number of checks started so far.
    pub fn runs(&self) -> usize {
        self.lock()
            .created
            .iter()
            .filter(|(object, _)| *object == CheckObject::ServiceAccount)
            .count()
    }
}

#[async_trait]
impl CheckRuntime for ScriptedRuntime {
    async fn create(&self, object: CheckObject, manifest: &Value) -> Result<(), RuntimeError> {
        let delay = self.lock().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        if script.fail_create == Some(object) {
            return Err(RuntimeError::Other(format!("cannot create {object:?}")));
        }
        script.created.push((object, manifest.clone()));
        Ok(())
    }

    async fn delete(
        &self,
        object: CheckObject,
        _namespace: &str,
        name: &str,
    ) -> Result<(), RuntimeError> {
        let mut script = self.lock();
        script.deleted.push((object, name.to_owned()));
        if script.fail_deletes {
            return Err(RuntimeError::Other(format!("cannot delete {object:?}")));
        }
        Ok(())
    }

    async fn pod_phase(&self, _namespace: &str, _name: &str) -> Result<PodPhase, RuntimeError> {
        let mut script = self.lock();
        script.polls += 1;
        let phase = match script.phases.pop_front() {
            Some(phase) => phase,
            None => script.last_phase.unwrap_or(PodPhase::Pending),
        };
        script.last_phase = Some(phase);
        Ok(phase)
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        _name: &str,
        _tail_lines: u32,
    ) -> Result<String, RuntimeError> {
        Ok(self.lock().logs.clone())
    }
}
