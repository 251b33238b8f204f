use crate::error::{CstorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GroupVersionKind identifies a custom resource type served by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "cstor.openebs.io")
    pub group: String,
    /// API version (e.g., "v1", "v1alpha1")
    pub version: String,
    /// Resource kind (e.g., "CStorPoolInstance")
    pub kind: String,
    /// Lowercase plural (e.g., "cstorpoolinstances")
    pub plural: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: plural.into(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Workqueue key of a resource: "namespace/name", or "name" when cluster-scoped
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    /// Split a "namespace/name" key
    pub fn parse(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster_scoped(*name)),
            [ns, name] if !name.is_empty() => Ok(Self::new(*ns, *name)),
            _ => Err(CstorError::invalid_key(
                key,
                "expected at most one '/' and a non-empty name",
            )),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_display() {
        let gvk = GroupVersionKind::new(
            "cstor.openebs.io",
            "v1",
            "CStorPoolInstance",
            "cstorpoolinstances",
        );
        assert_eq!(gvk.api_version(), "cstor.openebs.io/v1");
        assert_eq!(gvk.to_string(), "cstor.openebs.io/v1/CStorPoolInstance");

        let events = GroupVersionKind::new("", "v1", "Event", "events");
        assert_eq!(events.api_version(), "v1");
    }

    #[test]
    fn test_resource_key_parse() {
        let key = ResourceKey::parse("openebs/pool-1").unwrap();
        assert_eq!(key.namespace(), Some("openebs"));
        assert_eq!(key.name, "pool-1");
        assert_eq!(key.to_string(), "openebs/pool-1");

        let key = ResourceKey::parse("bd-1").unwrap();
        assert_eq!(key.namespace(), None);
        assert_eq!(key.to_string(), "bd-1");
    }

    #[test]
    fn test_resource_key_rejects_malformed() {
        assert!(ResourceKey::parse("").is_err());
        assert!(ResourceKey::parse("a/b/c").is_err());
        assert!(ResourceKey::parse("ns/").is_err());
    }
}
