use std::collections::BTreeMap;

use operator_common::labels::match_labels;
use operator_common::resources::{Fragment, Instance, InstanceKind, PipelineKind, Role};

use crate::role::classify_fragment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Cluster,
    Namespace(String),
}

/// Which fragments an instance runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub scope: Scope,
    pub match_labels: BTreeMap<String, String>,
    pub role: Role,
}

impl Selection {
    /// Agents run every agent fragment, namespaced aggregators the
    /// fragments of their own namespace, cluster aggregators the
    /// cluster-scoped fragments.
    pub fn for_instance(instance: &Instance) -> Self {
        let scope = match instance.kind {
            InstanceKind::Agent => Scope::All,
            InstanceKind::Aggregator => {
                Scope::Namespace(instance.metadata.namespace.clone().unwrap_or_default())
            }
            InstanceKind::ClusterAggregator => Scope::Cluster,
        };
        Self {
            scope,
            match_labels: instance.match_labels(),
            role: instance.kind.role(),
        }
    }

    fn in_scope<F: Fragment + ?Sized>(&self, fragment: &F) -> bool {
        match &self.scope {
            Scope::All => true,
            Scope::Cluster => fragment.kind() == PipelineKind::Cluster,
            Scope::Namespace(namespace) => {
                fragment.kind() == PipelineKind::Namespaced
                    && fragment.namespace() == Some(namespace.as_str())
            }
        }
    }

    /// Scope and labels only; used to find the instances a fragment feeds.
    pub fn covers<F: Fragment + ?Sized>(&self, fragment: &F) -> bool {
        self.in_scope(fragment) && match_labels(&self.match_labels, fragment.labels())
    }

    pub fn matches<F: Fragment + ?Sized>(&self, fragment: &F) -> bool {
        if fragment.is_deleted() || !fragment.is_valid() || !self.covers(fragment) {
            return false;
        }
        let role = fragment.role().or_else(|| classify_fragment(fragment).ok());
        role == Some(self.role)
    }
}

pub fn select_fragments<F: Fragment + Clone>(selection: &Selection, fragments: &[F]) -> Vec<F> {
    fragments
        .iter()
        .filter(|f| selection.matches(*f))
        .cloned()
        .collect()
}
