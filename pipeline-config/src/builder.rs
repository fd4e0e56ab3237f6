use std::collections::BTreeMap;

use operator_common::labels::{
    namespace_name_to_label, LabelSelector, Requirement, NAMESPACE_NAME_LABEL,
};
use operator_common::resources::{Fragment, Instance, PipelineKind, Role};
use tracing::debug;

use crate::defaults::{
    api_address, default_data_dir, default_sink, default_source, internal_metrics_sink,
    internal_metrics_source, DEFAULT_SINK_NAME, DEFAULT_SOURCE_NAME, INTERNAL_METRICS_SINK_NAME,
    INTERNAL_METRICS_SOURCE_NAME,
};
use crate::error::ConfigError;
use crate::model::{
    ApiSpec, FragmentComponents, GlobalOptions, Origin, Source, VectorConfig, KUBERNETES_LOGS,
    PROMETHEUS_EXPORTER,
};
use crate::namespace::namespaced;

/// Instance-level inputs to synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildParams {
    pub role: Role,
    pub data_dir: String,
    pub api_enabled: bool,
    pub playground: bool,
    pub internal_metrics: bool,
    pub use_apiserver_cache: bool,
    pub expire_metrics_secs: Option<u32>,
}

impl BuildParams {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            data_dir: default_data_dir(role).to_owned(),
            api_enabled: false,
            playground: false,
            internal_metrics: false,
            use_apiserver_cache: false,
            expire_metrics_secs: None,
        }
    }

    pub fn for_instance(instance: &Instance) -> Self {
        let role = instance.kind.role();
        let spec = &instance.spec;
        Self {
            role,
            data_dir: spec
                .data_dir
                .clone()
                .unwrap_or_else(|| default_data_dir(role).to_owned()),
            api_enabled: spec.api.enabled,
            playground: spec.api.playground,
            internal_metrics: spec.internal_metrics,
            use_apiserver_cache: spec.use_apiserver_cache,
            expire_metrics_secs: spec.expire_metrics_secs,
        }
    }

    fn global(&self) -> GlobalOptions {
        GlobalOptions {
            data_dir: self.data_dir.clone(),
            expire_metrics_secs: self.expire_metrics_secs,
            api: ApiSpec {
                address: api_address(),
                enabled: self.api_enabled,
                playground: self.playground,
            },
        }
    }
}

/// Merge `fragments` into one document.
///
/// Pure and order-independent: fragments are processed sorted by identity.
/// Callers are expected to have filtered fragments already (see
/// [`crate::select`]).
pub fn build<F: Fragment>(
    params: &BuildParams,
    fragments: &[F],
) -> Result<VectorConfig, ConfigError> {
    let mut config = VectorConfig::new(params.global());
    let mut owners: BTreeMap<String, String> = BTreeMap::new();

    let mut ordered: Vec<&F> = fragments.iter().collect();
    ordered.sort_by_key(|f| f.key());

    for fragment in ordered {
        merge_fragment(params, fragment, &mut config, &mut owners)?;
    }

    if params.internal_metrics && !config.sinks.values().any(|s| s.kind == PROMETHEUS_EXPORTER) {
        config
            .sources
            .entry(INTERNAL_METRICS_SOURCE_NAME.to_owned())
            .or_insert_with(internal_metrics_source);
        config
            .sinks
            .entry(INTERNAL_METRICS_SINK_NAME.to_owned())
            .or_insert_with(internal_metrics_sink);
    }

    if config.sources.is_empty() && config.sinks.is_empty() {
        debug!(role = %params.role, "no pipeline content, using defaults");
        config.transforms.clear();
        config
            .sources
            .insert(DEFAULT_SOURCE_NAME.to_owned(), default_source(params.role));
        config
            .sinks
            .insert(DEFAULT_SINK_NAME.to_owned(), default_sink());
        config.defaulted = true;
    }

    if let Some((component, input)) = config.dangling_inputs().into_iter().next() {
        return Err(ConfigError::UnknownInput {
            pipeline: owners.get(&component).cloned().unwrap_or_default(),
            component,
            input,
        });
    }

    Ok(config)
}

fn merge_fragment<F: Fragment>(
    params: &BuildParams,
    fragment: &F,
    config: &mut VectorConfig,
    owners: &mut BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    let pipeline = fragment.key().to_string();
    let components = FragmentComponents::decode(fragment)?;
    let namespace = fragment.namespace();
    let skip_prefix = fragment.skip_prefix();
    let name = |component: &str| namespaced(namespace, fragment.name(), component, skip_prefix);

    for (component, mut source) in components.sources {
        if source.kind == KUBERNETES_LOGS {
            validate_selectors(&pipeline, &component, &source)?;
        }
        if let (Role::Agent, PipelineKind::Namespaced, Some(namespace)) =
            (params.role, fragment.kind(), namespace)
        {
            restrict_to_namespace(&pipeline, namespace, &component, &mut source)?;
        }
        if source.kind == KUBERNETES_LOGS && params.use_apiserver_cache {
            source.use_apiserver_cache = true;
        }

        let full = name(&component);
        claim(owners, &full, &pipeline)?;
        config.origins.insert(
            full.clone(),
            Origin {
                pipeline: pipeline.clone(),
                pipeline_name: fragment.name().to_owned(),
                namespace: namespace.map(str::to_owned),
                component,
                service_name: fragment.service_name_override().map(str::to_owned),
            },
        );
        config.sources.insert(full, source);
    }

    for (component, mut transform) in components.transforms {
        let full = name(&component);
        claim(owners, &full, &pipeline)?;
        transform.inputs = transform.inputs.iter().map(|i| name(i.as_str())).collect();
        config.transforms.insert(full, transform);
    }

    for (component, mut sink) in components.sinks {
        let full = name(&component);
        claim(owners, &full, &pipeline)?;
        sink.inputs = sink.inputs.iter().map(|i| name(i.as_str())).collect();
        config.sinks.insert(full, sink);
    }

    Ok(())
}

fn claim(
    owners: &mut BTreeMap<String, String>,
    name: &str,
    pipeline: &str,
) -> Result<(), ConfigError> {
    if let Some(other) = owners.get(name) {
        return Err(ConfigError::DuplicateComponent {
            pipeline: pipeline.to_owned(),
            name: name.to_owned(),
            other: other.clone(),
        });
    }
    owners.insert(name.to_owned(), pipeline.to_owned());
    Ok(())
}

fn validate_selectors(pipeline: &str, component: &str, source: &Source) -> Result<(), ConfigError> {
    let fields = [
        ("extra_label_selector", &source.extra_label_selector),
        ("extra_namespace_label_selector", &source.extra_namespace_label_selector),
    ];
    for (field, selector) in fields {
        LabelSelector::parse(selector).map_err(|error| ConfigError::InvalidSelector {
            pipeline: pipeline.to_owned(),
            source_name: component.to_owned(),
            field,
            error,
        })?;
    }
    Ok(())
}

/// Namespaced fragments on agents may only collect their own namespace's
/// pod logs. A missing namespace selector is pinned to the fragment's
/// namespace; any other selector is refused.
fn restrict_to_namespace(
    pipeline: &str,
    namespace: &str,
    component: &str,
    source: &mut Source,
) -> Result<(), ConfigError> {
    if source.kind != KUBERNETES_LOGS {
        return Err(ConfigError::SourceTypeNotAllowed {
            pipeline: pipeline.to_owned(),
            source_name: component.to_owned(),
            kind: source.kind.clone(),
        });
    }

    if source.extra_namespace_label_selector.trim().is_empty() {
        source.extra_namespace_label_selector = namespace_name_to_label(namespace);
        return Ok(());
    }

    let own = [Requirement::Equals {
        key: NAMESPACE_NAME_LABEL.to_owned(),
        value: namespace.to_owned(),
    }];
    let selector = LabelSelector::parse(&source.extra_namespace_label_selector).map_err(|error| {
        ConfigError::InvalidSelector {
            pipeline: pipeline.to_owned(),
            source_name: component.to_owned(),
            field: "extra_namespace_label_selector",
            error,
        }
    })?;
    if selector.requirements() != own.as_slice() {
        return Err(ConfigError::ExternalNamespace {
            pipeline: pipeline.to_owned(),
            source_name: component.to_owned(),
        });
    }

    Ok(())
}
