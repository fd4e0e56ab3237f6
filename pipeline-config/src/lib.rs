//! Turns pipeline fragments into one Vector configuration document:
//! decoding, namespacing, role classification, synthesis, port
//! allocation for aggregators, graph optimization and hashing.
pub mod builder;
pub mod defaults;
pub mod error;
pub mod model;
pub mod namespace;
pub mod optimize;
pub mod ports;
pub mod role;
pub mod select;
pub mod source_types;

pub use builder::{build, BuildParams};
pub use error::{ConfigError, RoleError};
pub use model::VectorConfig;
pub use optimize::optimize;
pub use ports::{allocate_ports, ServicePort, ServicePorts};
pub use role::classify;
pub use select::{select_fragments, Scope, Selection};
