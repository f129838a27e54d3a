//! Channel-backed [`ObjectSource`] for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::anyhow;
use futures::channel::mpsc;
use futures::{stream, StreamExt};
use kawait_core::{EventStream, ObjectSource, ResolvedType, SourceEvent, WatchedObject};
use rustc_hash::FxHashMap;

type Feed = mpsc::UnboundedReceiver<anyhow::Result<SourceEvent>>;

#[derive(Default)]
pub struct MockSource {
    feeds: Mutex<FxHashMap<ResolvedType, VecDeque<Feed>>>,
    lists: Mutex<FxHashMap<ResolvedType, Vec<WatchedObject>>>,
    watch_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a watch stream for `ty`. Each `watch` call takes the oldest one;
    /// with none queued the stream ends immediately.
    pub fn feed(&self, ty: &ResolvedType) -> MockFeed {
        let (tx, rx) = mpsc::unbounded();
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ty.clone())
            .or_default()
            .push_back(rx);
        MockFeed { tx }
    }

    /// Result of the next resync listings for `ty`.
    pub fn set_list(&self, ty: &ResolvedType, list: Vec<WatchedObject>) {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner).insert(ty.clone(), list);
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectSource for MockSource {
    async fn list(&self, ty: &ResolvedType) -> anyhow::Result<Vec<WatchedObject>> {
        self.lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ty)
            .cloned()
            .ok_or_else(|| anyhow!("no listing for {}", ty))
    }

    fn watch(&self, ty: &ResolvedType) -> EventStream {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let feed = self
            .feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(ty)
            .and_then(|q| q.pop_front());
        match feed {
            Some(rx) => rx.boxed(),
            None => stream::empty().boxed(),
        }
    }
}

/// Sending half of one mocked watch stream. Dropping it ends the stream.
#[derive(Clone)]
pub struct MockFeed {
    tx: mpsc::UnboundedSender<anyhow::Result<SourceEvent>>,
}

impl MockFeed {
    pub fn send(&self, ev: SourceEvent) {
        let _ = self.tx.unbounded_send(Ok(ev));
    }

    pub fn restarted(&self, list: Vec<WatchedObject>) {
        self.send(SourceEvent::Restarted(list));
    }

    pub fn applied(&self, o: WatchedObject) {
        self.send(SourceEvent::Applied(o));
    }

    pub fn deleted(&self, o: WatchedObject) {
        self.send(SourceEvent::Deleted(o));
    }

    pub fn error(&self, msg: &str) {
        let _ = self.tx.unbounded_send(Err(anyhow!("{}", msg)));
    }
}
