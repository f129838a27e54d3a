//! Object source seam: list + watch of generic objects for one resolved type.

use futures::stream::BoxStream;

use crate::{ResolvedType, WatchedObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Applied(WatchedObject),
    Deleted(WatchedObject),
    /// Full listing that replaces everything known so far.
    Restarted(Vec<WatchedObject>),
}

pub type EventStream = BoxStream<'static, anyhow::Result<SourceEvent>>;

/// Supplies objects for a resolved type. The watch stream must start with a
/// `Restarted` carrying the initial listing and is expected to recover from
/// disconnects on its own, yielding errors it recovered from as `Err` items.
#[async_trait::async_trait]
pub trait ObjectSource: Send + Sync + 'static {
    /// One full listing, used for periodic resync.
    async fn list(&self, ty: &ResolvedType) -> anyhow::Result<Vec<WatchedObject>>;

    fn watch(&self, ty: &ResolvedType) -> EventStream;
}
