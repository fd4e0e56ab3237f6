//! Kubernetes label selector strings (`app=web,tier!=cache,env in (a,b)`)
//! and exact-match label maps.
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Label every namespace carries with its own name.
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Selector term matching exactly the namespace called `namespace`.
pub fn namespace_name_to_label(namespace: &str) -> String {
    format!("{NAMESPACE_NAME_LABEL}={namespace}")
}

/// Exact-match selector: every key/value in `selector` must be present in
/// `labels`. An empty selector matches everything.
pub fn match_labels(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty term in selector {0:?}")]
    EmptyTerm(String),
    #[error("invalid label key {0:?}")]
    InvalidKey(String),
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("unbalanced parentheses in selector {0:?}")]
    Unbalanced(String),
    #[error("set-based term {0:?} needs at least one value")]
    EmptySet(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals { key, value } => labels.get(key) == Some(value),
            Requirement::NotEquals { key, value } => labels.get(key) != Some(value),
            Requirement::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn { key, values } => {
                !labels.get(key).is_some_and(|v| values.contains(v))
            }
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        if selector.trim().is_empty() {
            return Ok(Self::default());
        }

        let requirements = split_terms(selector)?
            .into_iter()
            .map(|term| parse_term(selector, term))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LabelSelector::parse(s)
    }
}

/// Split on commas that are not inside a value set.
fn split_terms(selector: &str) -> Result<Vec<&str>, SelectorError> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::Unbalanced(selector.to_owned()))?;
            }
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Unbalanced(selector.to_owned()));
    }
    terms.push(&selector[start..]);

    Ok(terms)
}

fn parse_term(selector: &str, term: &str) -> Result<Requirement, SelectorError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(SelectorError::EmptyTerm(selector.to_owned()));
    }

    if let Some(captures) = set_term_regex().captures(term) {
        let key = validate_key(&captures[1])?;
        let values = captures[3]
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| validate_value(&key, v))
            .collect::<Result<Vec<_>, _>>()?;
        if values.is_empty() {
            return Err(SelectorError::EmptySet(term.to_owned()));
        }
        return Ok(match &captures[2] {
            "in" => Requirement::In { key, values },
            _ => Requirement::NotIn { key, values },
        });
    }

    if let Some((key, value)) = term.split_once("!=") {
        let key = validate_key(key.trim())?;
        let value = validate_value(&key, value.trim())?;
        return Ok(Requirement::NotEquals { key, value });
    }

    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        let key = validate_key(key.trim())?;
        let value = validate_value(&key, value.trim())?;
        return Ok(Requirement::Equals { key, value });
    }

    match term.strip_prefix('!') {
        Some(key) => Ok(Requirement::DoesNotExist(validate_key(key.trim())?)),
        None => Ok(Requirement::Exists(validate_key(term)?)),
    }
}

fn validate_key(key: &str) -> Result<String, SelectorError> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    let prefix_ok = prefix.map_or(true, |p| p.len() <= 253 && dns_subdomain_regex().is_match(p));
    let name_ok = !name.is_empty() && name.len() <= 63 && label_name_regex().is_match(name);

    if prefix_ok && name_ok {
        Ok(key.to_owned())
    } else {
        Err(SelectorError::InvalidKey(key.to_owned()))
    }
}

fn validate_value(key: &str, value: &str) -> Result<String, SelectorError> {
    if value.len() <= 63 && (value.is_empty() || label_name_regex().is_match(value)) {
        Ok(value.to_owned())
    } else {
        Err(SelectorError::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }
}

fn set_term_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([^\s!=(),]+)\s+(in|notin)\s*\((.*)\)$").expect("valid set term regex")
    })
}

fn label_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid label regex")
    })
}

fn dns_subdomain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("valid subdomain regex")
    })
}
