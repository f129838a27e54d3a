//! Resolve a human-typed type spec (`deployments.apps`, `Deployment.v1.apps`,
//! ...) into a fully-qualified resource type.
//!
//! Argument splitting follows kubectl: with at least two dots the spec is
//! also read as `name.version.group`, and it is always read as `name.group`
//! split at the first dot. Resource-name forms are tried before kind forms.

use tracing::debug;

use kawait_core::ResolvedType;

use crate::catalog::{CatalogEntry, DiscoveryCatalog};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("the server doesn't have a resource type {requested:?}")]
    NoMatchingType { requested: String },
}

/// Which fallback stage produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `resource.version.group`
    ResourceVersion,
    /// `resource.group`, preferred version
    Resource,
    /// `Kind.version.group`
    KindVersion,
    /// `Kind.group`, preferred version
    Kind,
}

#[derive(Debug, Clone, Copy)]
struct FullArg<'a> {
    name: &'a str,
    version: &'a str,
    group: &'a str,
}

#[derive(Debug, Clone, Copy)]
struct GroupArg<'a> {
    name: &'a str,
    group: &'a str,
}

fn split_full(spec: &str) -> Option<FullArg<'_>> {
    let (name, rest) = spec.split_once('.')?;
    let (version, group) = rest.split_once('.')?;
    Some(FullArg { name, version, group })
}

fn split_group(spec: &str) -> GroupArg<'_> {
    match spec.split_once('.') {
        Some((name, group)) => GroupArg { name, group },
        None => GroupArg { name: spec, group: "" },
    }
}

fn versioned<'c>(entry: Option<&'c CatalogEntry>, version: &str) -> Option<(&'c CatalogEntry, String)> {
    entry.filter(|e| e.has_version(version)).map(|e| (e, version.to_string()))
}

fn preferred(entry: Option<&CatalogEntry>) -> Option<(&CatalogEntry, String)> {
    entry.map(|e| (e, e.preferred_version.clone()))
}

pub fn resolve(spec: &str, catalog: &DiscoveryCatalog) -> Result<ResolvedType, ResolveError> {
    resolve_with_stage(spec, catalog).map(|(ty, _)| ty)
}

/// Like [`resolve`], also reporting the stage that matched.
pub fn resolve_with_stage(spec: &str, catalog: &DiscoveryCatalog) -> Result<(ResolvedType, Stage), ResolveError> {
    let full = split_full(spec);
    let short = split_group(spec);

    let found = full
        .and_then(|f| versioned(catalog.by_resource(f.group, f.name), f.version))
        .map(|m| (m, Stage::ResourceVersion))
        .or_else(|| preferred(catalog.by_resource(short.group, short.name)).map(|m| (m, Stage::Resource)))
        .or_else(|| {
            full.and_then(|f| versioned(catalog.by_kind(f.group, f.name), f.version))
                .map(|m| (m, Stage::KindVersion))
        })
        .or_else(|| preferred(catalog.by_kind(short.group, short.name)).map(|m| (m, Stage::Kind)));

    match found {
        Some(((entry, version), stage)) => {
            let ty = entry.resolved(&version);
            debug!(spec, gvr = %ty, ?stage, "resolved type");
            Ok((ty, stage))
        }
        None => Err(ResolveError::NoMatchingType { requested: spec.to_string() }),
    }
}
