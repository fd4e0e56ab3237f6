use std::collections::BTreeMap;

use operator_common::resources::{Fragment, Role};

use crate::error::RoleError;
use crate::model::{decode_section, Source};
use crate::source_types::{is_aggregator_type, is_agent_type};

/// Role of a set of sources.
///
/// Every source must fit the same role. Types valid for both roles count
/// for either, but only when the whole set is made of them, in which case
/// the fragment runs on agents; mixing them with single-role types is
/// rejected rather than guessed.
pub fn classify(sources: &BTreeMap<String, Source>) -> Result<Role, RoleError> {
    if sources.is_empty() {
        return Err(RoleError::EmptySources);
    }

    let mut agent_only = 0;
    let mut aggregator_only = 0;
    let mut dual = 0;
    for source in sources.values() {
        match (is_agent_type(&source.kind), is_aggregator_type(&source.kind)) {
            (true, true) => dual += 1,
            (true, false) => agent_only += 1,
            (false, true) => aggregator_only += 1,
            (false, false) => return Err(RoleError::UnsupportedSourceType(source.kind.clone())),
        }
    }

    match (agent_only, aggregator_only, dual) {
        (0, 0, _) => Ok(Role::Agent),
        (_, 0, 0) => Ok(Role::Agent),
        (0, _, 0) => Ok(Role::Aggregator),
        _ => Err(RoleError::UnknownRole),
    }
}

pub fn classify_fragment<F: Fragment + ?Sized>(fragment: &F) -> Result<Role, RoleError> {
    let pipeline = fragment.key().to_string();
    let sources: BTreeMap<String, Source> =
        decode_section(&pipeline, "sources", fragment.spec().sources.as_ref())
            .map_err(|e| RoleError::Decode(e.to_string()))?;
    classify(&sources)
}
