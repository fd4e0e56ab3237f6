//! Graph rewrites applied to a synthesized document before it is hashed.
use std::collections::{BTreeMap, BTreeSet};

use operator_common::labels::{LabelSelector, Requirement};
use serde_json::Value;
use tracing::debug;

use crate::model::{Sink, Source, Transform, VectorConfig, FILTER, KUBERNETES_LOGS};

/// Shared `kubernetes_logs` source that replaces per-fragment collectors.
pub const MERGED_KUBERNETES_SOURCE: &str = "mergedKubernetesSource";

const POD_LABELS_PATH: &str = ".kubernetes.pod_labels";
const NAMESPACE_LABELS_PATH: &str = ".kubernetes.namespace_labels";

/// Apply all rewrites. Running it again on its own output changes nothing.
pub fn optimize(config: &mut VectorConfig) {
    share_kubernetes_source(config);
    merge_sinks(config);
    merge_transforms(config);
}

/// Replace selector-only `kubernetes_logs` sources by filters over one
/// shared collector.
///
/// Each replaced source becomes a `filter` transform under the same name,
/// so anything reading from it keeps working.
fn share_kubernetes_source(config: &mut VectorConfig) {
    let replaced: Vec<(String, String, bool)> = config
        .sources
        .iter()
        .filter_map(|(name, source)| {
            filter_condition(source)
                .map(|condition| (name.clone(), condition, source.use_apiserver_cache))
        })
        .collect();

    if replaced.is_empty() {
        return;
    }
    debug!(count = replaced.len(), "sharing kubernetes_logs source");

    let use_cache = replaced.iter().any(|(_, _, cache)| *cache);
    let shared = config
        .sources
        .entry(MERGED_KUBERNETES_SOURCE.to_owned())
        .or_insert_with(|| Source::new(KUBERNETES_LOGS));
    shared.use_apiserver_cache |= use_cache;

    for (name, condition, _) in replaced {
        config.sources.remove(&name);
        let mut filter = Transform {
            kind: FILTER.to_owned(),
            inputs: vec![MERGED_KUBERNETES_SOURCE.to_owned()],
            merged: true,
            ..Default::default()
        };
        filter
            .options
            .insert("condition".to_owned(), Value::String(condition));
        config.transforms.insert(name, filter);
    }
}

/// VRL condition equivalent to the source's selectors, if the source only
/// differs from a plain collector by its pod and namespace label selectors.
fn filter_condition(source: &Source) -> Option<String> {
    if source.kind != KUBERNETES_LOGS
        || source.extra_label_selector.trim().is_empty()
        || source.extra_namespace_label_selector.trim().is_empty()
        || !source.extra_field_selector.trim().is_empty()
        || !source.options.is_empty()
    {
        return None;
    }

    let mut clauses = Vec::new();
    for (path, selector) in [
        (POD_LABELS_PATH, &source.extra_label_selector),
        (NAMESPACE_LABELS_PATH, &source.extra_namespace_label_selector),
    ] {
        for requirement in LabelSelector::parse(selector).ok()?.requirements() {
            let (key, op, value) = match requirement {
                Requirement::Equals { key, value } => (key, "==", value),
                Requirement::NotEquals { key, value } => (key, "!=", value),
                _ => return None,
            };
            clauses.push(format!("{path}.{} {op} {}", quoted(key), quoted(value)));
        }
    }

    Some(clauses.join(" && "))
}

fn quoted(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

/// Collapse sinks with identical type and options into one sink named by
/// their options hash, reading from the union of their inputs.
fn merge_sinks(config: &mut VectorConfig) {
    let mut groups: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for (name, sink) in &config.sinks {
        groups.entry(sink.options_hash()).or_default().push(name.clone());
    }

    let mut merged: Vec<(String, Sink)> = Vec::new();
    for (hash, names) in groups.into_iter().filter(|(_, names)| names.len() > 1) {
        let mut inputs = BTreeSet::new();
        let mut template: Option<Sink> = None;
        for name in &names {
            if let Some(sink) = config.sinks.remove(name) {
                inputs.extend(sink.inputs.iter().cloned());
                template.get_or_insert(sink);
            }
        }
        if let Some(mut sink) = template {
            sink.inputs = inputs.into_iter().collect();
            sink.merged = true;
            debug!(hash, sinks = ?names, "merging identical sinks");
            merged.push((hash.to_string(), sink));
        }
    }

    merged.sort_by(|a, b| b.0.cmp(&a.0));
    for (name, sink) in merged {
        config.sinks.insert(name, sink);
    }
}

struct TransformMerge {
    sink: String,
    name: String,
    replaced: Vec<String>,
    transform: Transform,
}

/// Collapse a sink's direct transform inputs when all of them are the same
/// transform (by options hash) and feed nothing but that sink.
fn merge_transforms(config: &mut VectorConfig) {
    let mut consumers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let readers = config
        .transforms
        .iter()
        .map(|(name, t)| (name, &t.inputs))
        .chain(config.sinks.iter().map(|(name, s)| (name, &s.inputs)));
    for (reader, inputs) in readers {
        for input in inputs {
            consumers.entry(input.as_str()).or_default().insert(reader.as_str());
        }
    }

    let mut reserved: BTreeSet<String> = BTreeSet::new();
    let mut merges: Vec<TransformMerge> = Vec::new();

    for (sink_name, sink) in &config.sinks {
        if sink.inputs.len() < 2 {
            continue;
        }
        let Some(transforms) = sink
            .inputs
            .iter()
            .map(|input| config.transforms.get(input))
            .collect::<Option<Vec<&Transform>>>()
        else {
            continue;
        };

        let hash = transforms[0].options_hash();
        let sole_consumer = |input: &String| {
            consumers
                .get(input.as_str())
                .is_some_and(|readers| readers.len() == 1 && readers.contains(sink_name.as_str()))
        };
        if transforms.iter().any(|t| t.options_hash() != hash)
            || !sink.inputs.iter().all(sole_consumer)
        {
            continue;
        }

        let replaced: Vec<String> = sink
            .inputs
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let taken = |candidate: &str| {
            reserved.contains(candidate)
                || config.sources.contains_key(candidate)
                || config.sinks.contains_key(candidate)
                || (config.transforms.contains_key(candidate)
                    && !replaced.iter().any(|r| r == candidate))
        };
        let mut name = hash.to_string();
        if taken(&name) {
            name = format!("{hash}-{sink_name}");
        }

        let mut transform = transforms[0].clone();
        transform.inputs = transforms
            .iter()
            .flat_map(|t| t.inputs.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        transform.merged = true;

        reserved.insert(name.clone());
        merges.push(TransformMerge {
            sink: sink_name.clone(),
            name,
            replaced,
            transform,
        });
    }

    merges.sort_by(|a, b| b.name.cmp(&a.name));
    for merge in merges {
        debug!(
            sink = %merge.sink,
            transforms = ?merge.replaced,
            name = %merge.name,
            "merging identical transforms"
        );
        for name in &merge.replaced {
            config.transforms.remove(name);
        }
        config.transforms.insert(merge.name.clone(), merge.transform);
        if let Some(sink) = config.sinks.get_mut(&merge.sink) {
            sink.inputs = vec![merge.name];
        }
    }
}
