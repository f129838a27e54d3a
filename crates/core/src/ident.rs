//! Resource identifier parsing: `<type-spec>:<namespace>/<name>` or
//! `<type-spec>:<name>`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const DEFAULT_NAMESPACE: &str = "default";

/// One thing to check: an unresolved type spec plus namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub type_spec: String,
    pub namespace: String,
    pub name: String,
}

impl Target {
    pub fn new(type_spec: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { type_spec: type_spec.into(), namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.type_spec, self.namespace, self.name)
    }
}

pub fn parse(s: &str) -> Result<Target, CoreError> {
    let malformed = |reason| CoreError::MalformedIdentifier { input: s.to_string(), reason };
    let parts: Vec<&str> = s.split(':').collect();
    let (type_spec, rest) = match parts.as_slice() {
        [type_spec, rest] => (*type_spec, *rest),
        [_] => return Err(malformed("expected <type>:[<namespace>/]<name>")),
        _ => return Err(malformed("more than one ':' separator")),
    };
    let (namespace, name) = match rest.split_once('/') {
        Some((ns, name)) => (ns, name),
        None => (DEFAULT_NAMESPACE, rest),
    };
    if name.is_empty() {
        return Err(malformed("empty name"));
    }
    Ok(Target::new(type_spec, namespace, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_only_uses_default_namespace() {
        let t = parse("deployments.apps:web").unwrap();
        assert_eq!(t, Target::new("deployments.apps", "default", "web"));
    }

    #[test]
    fn namespace_and_name() {
        let t = parse("deployments.apps:kube-system/coredns").unwrap();
        assert_eq!(t.type_spec, "deployments.apps");
        assert_eq!(t.namespace, "kube-system");
        assert_eq!(t.name, "coredns");
    }

    #[test]
    fn splits_on_first_slash_only() {
        let t = parse("Foo.example.com:ns/a/b").unwrap();
        assert_eq!(t.namespace, "ns");
        assert_eq!(t.name, "a/b");
    }

    #[test]
    fn rejects_missing_separator() {
        for s in ["deployments.apps", "", "coredns", "kube-system/coredns"] {
            assert!(matches!(parse(s), Err(CoreError::MalformedIdentifier { .. })), "{s:?}");
        }
    }

    #[test]
    fn rejects_empty_name_and_extra_colons() {
        assert!(parse("pods:").is_err());
        assert!(parse("pods:ns/").is_err());
        assert!(parse("pods:a:b").is_err());
    }

    #[test]
    fn error_names_the_input() {
        let err = parse("nocolon").unwrap_err();
        assert!(err.to_string().contains("\"nocolon\""));
    }
}
