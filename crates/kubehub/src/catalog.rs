//! In-memory index of the kinds a server exposes, built once from discovery.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use kawait_core::ResolvedType;

/// One `{group, version, kind, plural}` tuple as reported by discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServedResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ServedResource {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub group: String,
    pub kind: String,
    pub plural: String,
    pub preferred_version: String,
    /// Served versions in discovery order.
    pub versions: SmallVec<[String; 4]>,
    pub namespaced: bool,
}

impl CatalogEntry {
    pub fn has_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    pub fn resolved(&self, version: &str) -> ResolvedType {
        ResolvedType::new(&self.group, version, &self.plural)
    }
}

/// Immutable after [`CatalogBuilder::build`]; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryCatalog {
    entries: Vec<CatalogEntry>,
    by_plural: FxHashMap<String, SmallVec<[usize; 2]>>,
    by_kind: FxHashMap<String, SmallVec<[usize; 2]>>,
}

impl DiscoveryCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Entry whose plural matches `resource` (case-insensitive) in `group`.
    pub fn by_resource(&self, group: &str, resource: &str) -> Option<&CatalogEntry> {
        let idx = self.by_plural.get(&resource.to_ascii_lowercase())?;
        self.pick(idx, group)
    }

    /// Entry whose kind matches exactly in `group`.
    pub fn by_kind(&self, group: &str, kind: &str) -> Option<&CatalogEntry> {
        let idx = self.by_kind.get(kind)?;
        self.pick(idx, group)
    }

    /// Entry backing an already resolved type.
    pub fn entry_for(&self, ty: &ResolvedType) -> Option<&CatalogEntry> {
        self.by_plural
            .get(&ty.resource)?
            .iter()
            .map(|&i| &self.entries[i])
            .find(|e| e.group == ty.group && e.has_version(&ty.version))
    }

    /// Unknown types are treated as namespaced.
    pub fn is_namespaced(&self, ty: &ResolvedType) -> bool {
        self.entry_for(ty).map(|e| e.namespaced).unwrap_or(true)
    }

    // An empty group prefers the core group, then falls back to discovery order.
    fn pick(&self, candidates: &[usize], group: &str) -> Option<&CatalogEntry> {
        let mut entries = candidates.iter().map(|&i| &self.entries[i]);
        if group.is_empty() {
            let first = candidates.first().map(|&i| &self.entries[i]);
            entries.find(|e| e.group.is_empty()).or(first)
        } else {
            entries.find(|e| e.group == group)
        }
    }
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    preferred: FxHashMap<String, String>,
    entries: Vec<CatalogEntry>,
    index: FxHashMap<(String, String), usize>,
}

impl CatalogBuilder {
    /// Record the server's preferred version for a group.
    pub fn prefer(&mut self, group: &str, version: &str) -> &mut Self {
        self.preferred.insert(group.to_string(), version.to_string());
        self
    }

    pub fn push(&mut self, r: ServedResource) -> &mut Self {
        let key = (r.group.clone(), r.kind.clone());
        match self.index.get(&key) {
            Some(&i) => {
                let e = &mut self.entries[i];
                if !e.has_version(&r.version) {
                    e.versions.push(r.version);
                }
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(CatalogEntry {
                    group: r.group,
                    kind: r.kind,
                    plural: r.plural.to_ascii_lowercase(),
                    preferred_version: r.version.clone(),
                    versions: smallvec::smallvec![r.version],
                    namespaced: r.namespaced,
                });
            }
        }
        self
    }

    pub fn build(self) -> DiscoveryCatalog {
        let mut entries = self.entries;
        let mut by_plural: FxHashMap<String, SmallVec<[usize; 2]>> = FxHashMap::default();
        let mut by_kind: FxHashMap<String, SmallVec<[usize; 2]>> = FxHashMap::default();
        for (i, e) in entries.iter_mut().enumerate() {
            // The group's preferred version wins when this kind is served there;
            // otherwise the first version discovery reported stays.
            if let Some(pv) = self.preferred.get(&e.group) {
                if e.has_version(pv) {
                    e.preferred_version = pv.clone();
                }
            }
            by_plural.entry(e.plural.clone()).or_default().push(i);
            by_kind.entry(e.kind.clone()).or_default().push(i);
        }
        DiscoveryCatalog { entries, by_plural, by_kind }
    }
}

impl FromIterator<ServedResource> for DiscoveryCatalog {
    fn from_iter<I: IntoIterator<Item = ServedResource>>(iter: I) -> Self {
        let mut b = CatalogBuilder::default();
        for r in iter {
            b.push(r);
        }
        b.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DiscoveryCatalog {
        let mut b = DiscoveryCatalog::builder();
        b.prefer("", "v1").prefer("apps", "v1").prefer("batch", "v1");
        b.push(ServedResource::new("", "v1", "Pod", "pods", true))
            .push(ServedResource::new("", "v1", "Namespace", "namespaces", false))
            .push(ServedResource::new("apps", "v1beta1", "Deployment", "deployments", true))
            .push(ServedResource::new("apps", "v1", "Deployment", "deployments", true))
            .push(ServedResource::new("extensions", "v1beta1", "Deployment", "deployments", true))
            .push(ServedResource::new("batch", "v1", "Job", "jobs", true));
        b.build()
    }

    #[test]
    fn merges_versions_and_applies_group_preference() {
        let c = catalog();
        let d = c.by_resource("apps", "deployments").unwrap();
        assert_eq!(d.versions.as_slice(), ["v1beta1", "v1"]);
        assert_eq!(d.preferred_version, "v1");
        let ext = c.by_resource("extensions", "deployments").unwrap();
        assert_eq!(ext.preferred_version, "v1beta1");
    }

    #[test]
    fn resource_lookup_is_case_insensitive_kind_lookup_is_not() {
        let c = catalog();
        assert!(c.by_resource("apps", "Deployments").is_some());
        assert!(c.by_kind("apps", "Deployment").is_some());
        assert!(c.by_kind("apps", "deployment").is_none());
    }

    #[test]
    fn empty_group_prefers_core_then_discovery_order() {
        let c = catalog();
        assert_eq!(c.by_resource("", "pods").unwrap().group, "");
        assert_eq!(c.by_resource("", "deployments").unwrap().group, "apps");
        assert!(c.by_resource("batch", "deployments").is_none());
    }

    #[test]
    fn scope_and_entry_for() {
        let c = catalog();
        assert!(!c.is_namespaced(&ResolvedType::new("", "v1", "namespaces")));
        assert!(c.is_namespaced(&ResolvedType::new("batch", "v1", "jobs")));
        assert!(c.entry_for(&ResolvedType::new("batch", "v2", "jobs")).is_none());
        assert_eq!(c.len(), 5);
    }
}
