//! kawait kubehub: discovery catalog, type resolution and the kube-backed
//! object source.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::{future, stream, StreamExt};
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client,
};
use tracing::{debug, info};

use kawait_core::{conditions_from_status, EventStream, ObjectSource, ResolvedType, SourceEvent, WatchedObject};

pub mod catalog;
pub mod resolve;

pub use catalog::{CatalogBuilder, CatalogEntry, DiscoveryCatalog, ServedResource};
pub use resolve::{resolve, resolve_with_stage, ResolveError, Stage};

/// Client from kubeconfig or the in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("loading kube client config")
}

/// Build the discovery catalog from every group and version the server serves.
pub async fn discover_catalog(client: Client) -> Result<DiscoveryCatalog> {
    let started = std::time::Instant::now();
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut builder = DiscoveryCatalog::builder();
    for group in discovery.groups() {
        builder.prefer(group.name(), group.preferred_version_or_latest());
        for version in group.versions() {
            for (ar, caps) in group.versioned_resources(version) {
                builder.push(ServedResource {
                    group: ar.group.clone(),
                    version: ar.version.clone(),
                    kind: ar.kind.clone(),
                    plural: ar.plural.clone(),
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                });
            }
        }
    }
    let catalog = builder.build();
    metrics::histogram!("discovery_ms", started.elapsed().as_secs_f64() * 1000.0);
    info!(kinds = catalog.len(), "discovery catalog built");
    Ok(catalog)
}

fn to_watched(obj: &DynamicObject) -> Option<WatchedObject> {
    let name = obj.metadata.name.clone()?;
    Some(WatchedObject {
        namespace: obj.metadata.namespace.clone(),
        name,
        resource_version: obj.metadata.resource_version.clone(),
        conditions: conditions_from_status(obj.data.get("status")),
    })
}

fn to_event(ev: Event<DynamicObject>) -> Option<SourceEvent> {
    match ev {
        Event::Applied(o) => to_watched(&o).map(SourceEvent::Applied),
        Event::Deleted(o) => to_watched(&o).map(SourceEvent::Deleted),
        Event::Restarted(list) => {
            debug!(count = list.len(), "watch restart");
            Some(SourceEvent::Restarted(list.iter().filter_map(to_watched).collect()))
        }
    }
}

/// List+watch over the dynamic API for any type in the catalog.
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
    catalog: Arc<DiscoveryCatalog>,
}

impl KubeSource {
    pub fn new(client: Client, catalog: Arc<DiscoveryCatalog>) -> Self {
        Self { client, catalog }
    }

    fn api(&self, ty: &ResolvedType) -> Result<Api<DynamicObject>> {
        let entry = self
            .catalog
            .entry_for(ty)
            .ok_or_else(|| anyhow!("type not in discovery catalog: {}", ty))?;
        let gvk = GroupVersionKind::gvk(&ty.group, &ty.version, &entry.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &ty.resource);
        // All namespaces; lookups narrow by namespace from the cache.
        Ok(Api::all_with(self.client.clone(), &ar))
    }
}

#[async_trait::async_trait]
impl ObjectSource for KubeSource {
    async fn list(&self, ty: &ResolvedType) -> Result<Vec<WatchedObject>> {
        let api = self.api(ty)?;
        let list = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("listing {}", ty))?;
        Ok(list.items.iter().filter_map(to_watched).collect())
    }

    fn watch(&self, ty: &ResolvedType) -> EventStream {
        let api = match self.api(ty) {
            Ok(api) => api,
            Err(e) => return stream::once(future::ready(Err(e))).boxed(),
        };
        let label = ty.to_string();
        info!(gvr = %label, "watcher started");
        // default_backoff keeps the stream alive across disconnects; errors
        // are still surfaced so the store can log them.
        watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .filter_map(move |res| {
                let out = match res {
                    Ok(ev) => to_event(ev).map(Ok),
                    Err(e) => Some(Err(anyhow::Error::new(e).context(format!("watching {}", label)))),
                };
                future::ready(out)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic(v: serde_json::Value) -> DynamicObject {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn dynamic_object_reduces_to_watched() {
        let o = dynamic(serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "migrate", "namespace": "db", "resourceVersion": "7" },
            "status": { "conditions": [ { "type": "Succeeded", "status": "True" } ] }
        }));
        let w = to_watched(&o).unwrap();
        assert_eq!(w.name, "migrate");
        assert_eq!(w.namespace.as_deref(), Some("db"));
        assert_eq!(w.resource_version.as_deref(), Some("7"));
        assert_eq!(kawait_core::evaluate(&w), kawait_core::ReadinessVerdict::Ready);
    }

    #[test]
    fn restarted_drops_nameless_objects() {
        let named = dynamic(serde_json::json!({ "metadata": { "name": "a" } }));
        let nameless = dynamic(serde_json::json!({ "metadata": {} }));
        match to_event(Event::Restarted(vec![named, nameless.clone()])) {
            Some(SourceEvent::Restarted(list)) => assert_eq!(list.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(to_event(Event::Applied(nameless)).is_none());
    }
}
