//! kawait store: one background sync task per resolved type, serving
//! namespace-scoped point lookups from an eventually-consistent cache.

#![forbid(unsafe_code)]

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::stream::ReadyChunks;
use futures::{future, FutureExt, StreamExt};
use kawait_core::{EventStream, ObjectSource, ResolvedType, SourceEvent, WatchedObject};
use metrics::{counter, gauge};
use rustc_hash::FxHashMap;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

pub mod cache;
pub mod mock;

pub use cache::{CacheBuilder, CacheSnapshot};

pub const DEFAULT_RESYNC: Duration = Duration::from_secs(60);
pub const DEFAULT_RECONNECT: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Period of the full re-list that heals missed watch events.
    pub resync: Duration,
    /// Max watch events folded into one snapshot swap.
    pub batch: usize,
    /// First delay before re-opening an ended watch; doubles up to 30s.
    pub reconnect: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { resync: DEFAULT_RESYNC, batch: 256, reconnect: DEFAULT_RECONNECT }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("initial sync of {ty} failed: {reason}")]
    InitialSync { ty: ResolvedType, reason: String },
    #[error("sync task for {0} stopped before its first listing")]
    Stopped(ResolvedType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SyncState {
    Pending,
    Synced,
    Failed(String),
}

struct Informer {
    state_rx: watch::Receiver<SyncState>,
    snap: Arc<ArcSwap<CacheSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl Informer {
    fn lister(&self, ty: &ResolvedType) -> Lister {
        Lister { ty: ty.clone(), snap: Arc::clone(&self.snap), epoch_rx: self.epoch_rx.clone() }
    }
}

/// Read-only view over one type's cache. Cheap to clone.
#[derive(Clone)]
pub struct Lister {
    ty: ResolvedType,
    snap: Arc<ArcSwap<CacheSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl Lister {
    pub fn resolved_type(&self) -> &ResolvedType {
        &self.ty
    }

    pub fn by_namespace<'a>(&'a self, namespace: &'a str) -> NamespaceLister<'a> {
        NamespaceLister { lister: self, namespace: Some(namespace) }
    }

    /// Lookups for cluster-scoped types.
    pub fn cluster(&self) -> NamespaceLister<'_> {
        NamespaceLister { lister: self, namespace: None }
    }

    pub fn current(&self) -> Arc<CacheSnapshot> {
        self.snap.load_full()
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch_rx.borrow()
    }

    /// Notified on every snapshot swap after this call; closed once the sync
    /// task stops.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        let mut rx = self.epoch_rx.clone();
        rx.borrow_and_update();
        rx
    }
}

pub struct NamespaceLister<'a> {
    lister: &'a Lister,
    namespace: Option<&'a str>,
}

impl NamespaceLister<'_> {
    pub fn get(&self, name: &str) -> Option<Arc<WatchedObject>> {
        self.lister.snap.load().get(self.namespace, name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<WatchedObject>> {
        self.lister.snap.load().namespace(self.namespace).cloned().collect()
    }
}

/// Lazily starts one sync task per requested type and hands out listers.
pub struct ResourceStore {
    source: Arc<dyn ObjectSource>,
    config: StoreConfig,
    informers: Mutex<FxHashMap<ResolvedType, Informer>>,
}

impl ResourceStore {
    pub fn new(source: Arc<dyn ObjectSource>) -> Self {
        Self::with_config(source, StoreConfig::default())
    }

    pub fn with_config(source: Arc<dyn ObjectSource>, config: StoreConfig) -> Self {
        Self { source, config, informers: Mutex::new(FxHashMap::default()) }
    }

    /// Resolves once the first full listing for `ty` has been applied, so an
    /// immediate lookup never races an empty startup cache.
    pub async fn get(&self, ty: &ResolvedType) -> Result<Lister, StoreError> {
        let (mut state_rx, lister) = {
            let mut informers = self.informers.lock().await;
            let inf = informers
                .entry(ty.clone())
                .or_insert_with(|| spawn_informer(Arc::clone(&self.source), ty.clone(), self.config.clone()));
            (inf.state_rx.clone(), inf.lister(ty))
        };

        let state = state_rx.wait_for(|s| *s != SyncState::Pending).await.map(|s| (*s).clone());
        match state {
            Ok(SyncState::Failed(reason)) => {
                self.discard_failed(ty).await;
                Err(StoreError::InitialSync { ty: ty.clone(), reason })
            }
            Ok(_) => Ok(lister),
            Err(_) => Err(StoreError::Stopped(ty.clone())),
        }
    }

    // A failed informer is dropped so the next `get` starts over.
    async fn discard_failed(&self, ty: &ResolvedType) {
        let mut informers = self.informers.lock().await;
        let failed = informers
            .get(ty)
            .map(|inf| matches!(*inf.state_rx.borrow(), SyncState::Failed(_)))
            .unwrap_or(false);
        if failed {
            informers.remove(ty);
        }
    }

    /// Number of types with a running (or starting) sync task.
    pub async fn active(&self) -> usize {
        self.informers.lock().await.len()
    }

    pub async fn stop(&self, ty: &ResolvedType) -> bool {
        match self.informers.lock().await.remove(ty) {
            Some(inf) => {
                inf.task.abort();
                info!(gvr = %ty, "sync task stopped");
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let mut informers = self.informers.lock().await;
        for (ty, inf) in informers.drain() {
            inf.task.abort();
            debug!(gvr = %ty, "sync task stopped");
        }
    }
}

impl Drop for ResourceStore {
    fn drop(&mut self) {
        for (_, inf) in self.informers.get_mut().drain() {
            inf.task.abort();
        }
    }
}

fn spawn_informer(source: Arc<dyn ObjectSource>, ty: ResolvedType, config: StoreConfig) -> Informer {
    let (state_tx, state_rx) = watch::channel(SyncState::Pending);
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let snap = Arc::new(ArcSwap::from_pointee(CacheSnapshot::default()));
    let task = SyncTask {
        source,
        ty,
        config,
        builder: CacheBuilder::new(),
        snap: Arc::clone(&snap),
        state_tx,
        epoch_tx,
        synced: false,
    };
    Informer { state_rx, snap, epoch_rx, task: tokio::spawn(run_informer(task)) }
}

fn event_label(ev: &SourceEvent) -> &'static str {
    match ev {
        SourceEvent::Applied(_) => "applied",
        SourceEvent::Deleted(_) => "deleted",
        SourceEvent::Restarted(_) => "restarted",
    }
}

type Chunks = ReadyChunks<EventStream>;
type Chunk = Vec<anyhow::Result<SourceEvent>>;

/// State owned by one type's sync task.
struct SyncTask {
    source: Arc<dyn ObjectSource>,
    ty: ResolvedType,
    config: StoreConfig,
    builder: CacheBuilder,
    snap: Arc<ArcSwap<CacheSnapshot>>,
    state_tx: watch::Sender<SyncState>,
    epoch_tx: watch::Sender<u64>,
    synced: bool,
}

impl SyncTask {
    fn open(&self) -> Chunks {
        self.source.watch(&self.ty).ready_chunks(self.config.batch.max(1))
    }

    fn publish(&self) {
        let next = self.builder.freeze();
        let epoch = next.epoch;
        gauge!("store_objects", next.len() as f64, "gvr" => self.ty.to_string());
        self.snap.store(next);
        let _ = self.epoch_tx.send(epoch);
    }

    /// Applies a chunk in delivery order. An error only fails the task when
    /// no listing has been seen yet, in this chunk or before it.
    fn apply_chunk(&mut self, chunk: Chunk) -> Result<(), String> {
        let mut listed = self.synced;
        let mut batch = Vec::with_capacity(chunk.len());
        for item in chunk {
            match item {
                Ok(ev) => {
                    counter!("store_watch_events_total", 1u64, "event" => event_label(&ev));
                    listed |= matches!(ev, SourceEvent::Restarted(_));
                    batch.push(ev);
                }
                Err(e) if !listed => {
                    let reason = format!("{e:#}");
                    warn!(gvr = %self.ty, error = %reason, "initial listing failed");
                    return Err(reason);
                }
                Err(e) => {
                    // The source reconnects and re-lists on its own.
                    counter!("store_watch_errors_total", 1u64);
                    warn!(gvr = %self.ty, error = %format!("{e:#}"), "watch error; reconnecting");
                }
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.builder.apply(batch);
        self.publish();
        if listed && !self.synced {
            self.synced = true;
            info!(gvr = %self.ty, objects = self.snap.load().len(), "initial sync complete");
            self.state_tx.send_replace(SyncState::Synced);
        }
        Ok(())
    }

    /// Folds in whatever the stream has already buffered so it is not applied
    /// on top of a fresher listing. Returns false once the stream has ended.
    fn drain(&mut self, events: &mut Chunks) -> bool {
        loop {
            match events.next().now_or_never() {
                Some(Some(chunk)) => {
                    // only called once synced, where errors are not fatal
                    let _ = self.apply_chunk(chunk);
                }
                Some(None) => return false,
                None => return true,
            }
        }
    }

    async fn relist(&mut self) {
        match self.source.list(&self.ty).await {
            Ok(list) => {
                counter!("store_relist_total", 1u64, "result" => "ok");
                debug!(gvr = %self.ty, count = list.len(), "resync");
                self.builder.apply(vec![SourceEvent::Restarted(list)]);
                self.publish();
            }
            Err(e) => {
                counter!("store_relist_total", 1u64, "result" => "error");
                warn!(gvr = %self.ty, error = %format!("{e:#}"), "resync failed");
            }
        }
    }
}

async fn next_chunk(events: &mut Option<Chunks>) -> Option<Chunk> {
    match events {
        Some(s) => s.next().await,
        None => future::pending().await,
    }
}

fn schedule_reconnect(ty: &ResolvedType, reconnect: Pin<&mut Sleep>, backoff: &mut Duration) {
    counter!("store_reconnects_total", 1u64);
    warn!(gvr = %ty, delay_ms = backoff.as_millis() as u64, "watch stream ended; reconnecting");
    reconnect.reset(Instant::now() + *backoff);
    *backoff = (*backoff * 2).min(RECONNECT_MAX);
}

/// Runs until aborted by `stop`/`shutdown`, or until the type fails before
/// its first listing.
async fn run_informer(mut task: SyncTask) {
    let mut events = Some(task.open());
    let reconnect = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(reconnect);
    let min_backoff = task.config.reconnect.max(Duration::from_millis(1));
    let mut backoff = min_backoff;
    let period = task.config.resync.max(Duration::from_millis(1));
    let mut resync = tokio::time::interval_at(Instant::now() + period, period);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = next_chunk(&mut events) => match maybe {
                Some(chunk) => {
                    if let Err(reason) = task.apply_chunk(chunk) {
                        task.state_tx.send_replace(SyncState::Failed(reason));
                        return;
                    }
                    backoff = min_backoff;
                }
                None if !task.synced => {
                    warn!(gvr = %task.ty, "watch stream ended before the initial listing");
                    task.state_tx
                        .send_replace(SyncState::Failed("watch stream ended before the initial listing".to_string()));
                    return;
                }
                None => {
                    events = None;
                    schedule_reconnect(&task.ty, reconnect.as_mut(), &mut backoff);
                }
            },
            _ = &mut reconnect, if events.is_none() => {
                events = Some(task.open());
                // catch up on whatever the gap missed
                task.relist().await;
            }
            _ = resync.tick(), if task.synced => {
                if let Some(s) = events.as_mut() {
                    if !task.drain(s) {
                        events = None;
                        schedule_reconnect(&task.ty, reconnect.as_mut(), &mut backoff);
                    }
                }
                task.relist().await;
            }
        }
    }
}
