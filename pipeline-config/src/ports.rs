//! Listening ports for aggregator sources and the services exposing them.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::defaults::{
    DEFAULT_AGGREGATOR_PORT, DEFAULT_NAMESPACE, DEFAULT_PIPELINE_NAME, DEFAULT_SOURCE_NAME,
};
use crate::error::ConfigError;
use crate::model::{Source, VectorConfig, KUBERNETES_EVENTS, VECTOR};

/// First port handed to event relay sources.
pub const EVENT_RELAY_BASE_PORT: u16 = 42000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub port: u16,
    pub protocol: Protocol,
    /// Source name as authored, before prefixing.
    pub source_name: String,
    pub pipeline_name: String,
    pub namespace: String,
    pub service_name: Option<String>,
    pub event_relay: bool,
}

impl ServicePort {
    fn group(&self) -> ServiceGroup {
        ServiceGroup {
            namespace: self.namespace.clone(),
            pipeline_name: self.pipeline_name.clone(),
            service_name: self.service_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceGroup {
    pub namespace: String,
    pub pipeline_name: String,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// One service object to expose on the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub ports: Vec<PortEntry>,
}

/// Where the event collector should forward events for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReceiver {
    pub service_name: String,
    pub service_namespace: String,
    pub port: u16,
    /// Empty for cluster-wide receivers.
    pub watched_namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePorts {
    ports: Vec<ServicePort>,
}

impl ServicePorts {
    pub fn ports(&self) -> &[ServicePort] {
        &self.ports
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn groups(&self) -> BTreeMap<ServiceGroup, Vec<&ServicePort>> {
        let mut groups: BTreeMap<ServiceGroup, Vec<&ServicePort>> = BTreeMap::new();
        for port in &self.ports {
            groups.entry(port.group()).or_default().push(port);
        }
        groups
    }

    fn service_name(instance: &str, group: &ServiceGroup) -> String {
        group
            .service_name
            .clone()
            .unwrap_or_else(|| kebab_case(&format!("{instance}-{}", group.pipeline_name)))
    }

    /// Services for the aggregator `instance`. Groups resolving to the same
    /// service name share one service.
    pub fn services(&self, instance: &str) -> Vec<ServiceDefinition> {
        let mut services: BTreeMap<String, Vec<PortEntry>> = BTreeMap::new();
        for (group, ports) in self.groups() {
            let entries = services.entry(Self::service_name(instance, &group)).or_default();
            for port in ports {
                let mut name = kebab_case(&port.source_name);
                if entries.iter().any(|e| e.name == name) {
                    name = format!("{name}-{}", port.port);
                }
                entries.push(PortEntry {
                    name,
                    port: port.port,
                    protocol: port.protocol,
                });
            }
        }

        services
            .into_iter()
            .map(|(name, ports)| ServiceDefinition { name, ports })
            .collect()
    }

    pub fn event_receivers(&self, instance: &str, service_namespace: &str) -> Vec<EventReceiver> {
        self.ports
            .iter()
            .filter(|p| p.event_relay)
            .map(|p| EventReceiver {
                service_name: Self::service_name(instance, &p.group()),
                service_namespace: service_namespace.to_owned(),
                port: p.port,
                watched_namespace: p.namespace.clone(),
            })
            .collect()
    }
}

/// Assign ports to network-facing sources of an aggregator document.
///
/// Event relay sources get a dedicated port (one per fragment, the next one
/// from [`EVENT_RELAY_BASE_PORT`] that no address declares) and are rewritten
/// into `vector` receivers on that port. Other sources with an `address`
/// option expose its port.
pub fn allocate_ports(config: &mut VectorConfig) -> Result<ServicePorts, ConfigError> {
    let mut ports = ServicePorts::default();
    let mut claimed: BTreeMap<(u16, Protocol), String> = BTreeMap::new();
    let mut next_relay_port = EVENT_RELAY_BASE_PORT;
    let declared: BTreeSet<(u16, Protocol)> = config
        .sources
        .values()
        .filter(|source| source.kind != KUBERNETES_EVENTS)
        .filter_map(|source| {
            let address = source.options.get("address")?.as_str()?;
            Some((parse_port(address).ok()?, source_protocol(source)))
        })
        .collect();

    let mut by_pipeline: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, origin) in &config.origins {
        by_pipeline
            .entry(origin.pipeline.as_str())
            .or_default()
            .push(name.as_str());
    }

    for (pipeline, names) in by_pipeline {
        let mut relay_seen = false;
        for name in names {
            let (Some(origin), Some(source)) =
                (config.origins.get(name), config.sources.get_mut(name))
            else {
                continue;
            };

            let (port, protocol, event_relay) = if source.kind == KUBERNETES_EVENTS {
                if relay_seen {
                    return Err(ConfigError::DuplicateEventSource {
                        pipeline: pipeline.to_owned(),
                        kind: KUBERNETES_EVENTS.to_owned(),
                    });
                }
                relay_seen = true;
                let port = (next_relay_port..=u16::MAX)
                    .find(|port| {
                        let key = (*port, Protocol::Tcp);
                        !declared.contains(&key) && !claimed.contains_key(&key)
                    })
                    .ok_or_else(|| ConfigError::RelayPortsExhausted {
                        pipeline: pipeline.to_owned(),
                    })?;
                next_relay_port = port.saturating_add(1);
                *source = Source::new(VECTOR).with_option("address", format!("0.0.0.0:{port}"));
                (port, Protocol::Tcp, true)
            } else if let Some(address) = source.options.get("address") {
                let invalid = |reason: String| ConfigError::InvalidAddress {
                    pipeline: pipeline.to_owned(),
                    source_name: origin.component.clone(),
                    address: address
                        .as_str()
                        .map_or_else(|| address.to_string(), str::to_owned),
                    reason,
                };
                let port = address
                    .as_str()
                    .ok_or_else(|| invalid("address must be a string".to_owned()))
                    .and_then(|a| parse_port(a).map_err(invalid))?;
                (port, source_protocol(source), false)
            } else {
                continue;
            };

            if let Some(other) = claimed.insert((port, protocol), pipeline.to_owned()) {
                return Err(ConfigError::DuplicatePort {
                    pipeline: pipeline.to_owned(),
                    port,
                    protocol: protocol.to_string(),
                    other,
                });
            }
            ports.ports.push(ServicePort {
                port,
                protocol,
                source_name: origin.component.clone(),
                pipeline_name: origin.pipeline_name.clone(),
                namespace: origin.namespace.clone().unwrap_or_default(),
                service_name: origin.service_name.clone(),
                event_relay,
            });
        }
    }

    if config.defaulted {
        ports.ports.push(ServicePort {
            port: DEFAULT_AGGREGATOR_PORT,
            protocol: Protocol::Tcp,
            source_name: DEFAULT_SOURCE_NAME.to_owned(),
            pipeline_name: DEFAULT_PIPELINE_NAME.to_owned(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            service_name: None,
            event_relay: false,
        });
    }

    Ok(ports)
}

fn source_protocol(source: &Source) -> Protocol {
    match source.options.get("mode").and_then(|m| m.as_str()) {
        Some("udp") => Protocol::Udp,
        _ => Protocol::Tcp,
    }
}

/// Port of a `host:port` or `[v6]:port` address.
fn parse_port(address: &str) -> Result<u16, String> {
    let port = match address.strip_prefix('[') {
        Some(rest) => rest
            .split_once("]:")
            .map(|(_, port)| port)
            .ok_or_else(|| "expected [host]:port".to_owned())?,
        None => match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => port,
            _ => return Err("expected host:port".to_owned()),
        },
    };
    port.parse::<u16>()
        .map_err(|e| format!("invalid port {port:?}: {e}"))
}

/// Lowercase DNS label: `defaultSource` becomes `default-source`.
pub fn kebab_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('-');
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
    }
    let trimmed = out.trim_matches('-');
    trimmed[..trimmed.len().min(63)].trim_end_matches('-').to_owned()
}
