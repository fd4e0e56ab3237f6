/// Global component name for `component` owned by the fragment
/// `namespace`/`owner`. Cluster-scoped owners have no namespace segment;
/// `skip_prefix` keeps the authored name as is.
pub fn namespaced(
    namespace: Option<&str>,
    owner: &str,
    component: &str,
    skip_prefix: bool,
) -> String {
    if skip_prefix {
        return component.to_owned();
    }
    match namespace {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}-{owner}-{component}"),
        _ => format!("{owner}-{component}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_with_namespace_and_owner() {
        assert_eq!(namespaced(Some("ns1"), "p1", "log1", false), "ns1-p1-log1");
        assert_eq!(namespaced(None, "p1", "log1", false), "p1-log1");
        assert_eq!(namespaced(Some(""), "p1", "log1", false), "p1-log1");
    }

    #[test]
    fn skip_prefix_keeps_authored_name() {
        assert_eq!(namespaced(None, "p1", "metrics", true), "metrics");
    }

    #[test]
    fn distinct_owners_never_share_names() {
        let owners = [
            (Some("ns1"), "p1"),
            (Some("ns2"), "p1"),
            (Some("ns1"), "p2"),
            (None, "p1"),
            (None, "p3"),
        ];
        let names: std::collections::BTreeSet<String> = owners
            .iter()
            .map(|(ns, owner)| namespaced(*ns, owner, "log1", false))
            .collect();
        assert_eq!(names.len(), owners.len());
    }
}
