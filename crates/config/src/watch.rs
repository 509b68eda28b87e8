//! # Resource Watch Layer
//!
//! Keeps a long-lived subscription to a resource store and turns whatever the
//! store delivers into an ordered stream of [`WatchEvent`]s.
//!
//! ```text
//!            +---------- relist + diff ----------+
//!            |                                   |
//!  store --list--> cache --Added/Modified/Deleted--> channel --> reconcile loop
//!  store --watch-> cache -/
//! ```
//!
//! When the live stream breaks the layer re-lists everything, diffs the listing
//! against its cache and emits synthetic events for the drift, so consumers see
//! the same kind of events whether they came from a resync or from the watch.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

use nsgate_model::*;
use tokio::{
    sync::mpsc::{channel, Receiver, Sender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    backoff::Backoff,
    service::{next_event, CreateListener, ListenEvent, Retrieve},
};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Resource(ResourceEvent),
    /// The live stream broke, a full relist follows.
    Disconnected(WatchDisconnectedError),
    /// The cache matches a complete listing of the store.
    Resynced,
}

/// Health of the watch, shared with whoever reports process health.
#[derive(Debug, Clone, Default)]
pub struct WatchHealth {
    degraded: Arc<AtomicBool>,
    consecutive_failures: Arc<AtomicU32>,
}

impl WatchHealth {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
    fn record_failure(&self, threshold: u32) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if failures >= threshold && !self.degraded.swap(true, Ordering::SeqCst) {
            warn!("[NG.Watch] resync failed {failures} times in a row, watch is degraded");
        }
        failures
    }
    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("[NG.Watch] resync recovered");
        }
    }
}

/// Last delivered version of every object in scope.
#[derive(Debug, Default, Clone)]
pub struct ObjectCache {
    objects: BTreeMap<ResourceId, Resource>,
}

fn in_scope(scope: &ControllerScope, resource: &Resource) -> bool {
    match resource {
        Resource::Route(route) => scope.claims(route),
        Resource::Backend(backend) => scope.selects(&backend.meta.namespace),
    }
}

impl ObjectCache {
    pub fn len(&self) -> usize {
        self.objects.len()
    }
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.objects.get(id)
    }

    /// Record an observed object, returning the event downstream should see, if any.
    pub fn apply(&mut self, scope: &ControllerScope, resource: Resource) -> Option<ResourceEvent> {
        let id = resource.id();
        if !in_scope(scope, &resource) {
            // left our scope, e.g. its ingress class changed
            return self.delete(&id);
        }
        match self.objects.get(&id) {
            None => {
                self.objects.insert(id, resource.clone());
                Some(ResourceEvent::added(resource))
            }
            Some(cached) => {
                let changed = if cached.uid() != resource.uid() {
                    true
                } else if resource.generation() < cached.generation() {
                    debug!("[NG.Watch] drop stale {id} generation {} < {}", resource.generation(), cached.generation());
                    false
                } else {
                    resource.generation() > cached.generation() || cached != &resource
                };
                if changed {
                    self.objects.insert(id, resource.clone());
                    Some(ResourceEvent::modified(resource))
                } else {
                    None
                }
            }
        }
    }

    pub fn delete(&mut self, id: &ResourceId) -> Option<ResourceEvent> {
        self.objects.remove(id).map(ResourceEvent::deleted)
    }

    /// Diff a complete listing against the cache. With `kind` or `namespace` set,
    /// only that part of the store was listed.
    pub fn diff(&mut self, scope: &ControllerScope, listed: Vec<Resource>, kind: Option<ResourceKind>, namespace: Option<&str>) -> Vec<ResourceEvent> {
        let listed_part = |id: &ResourceId| kind.map_or(true, |kind| kind == id.kind) && namespace.map_or(true, |ns| ns == id.key.namespace);
        let mut events = Vec::new();
        let mut seen = BTreeSet::new();
        for resource in listed {
            if !listed_part(&resource.id()) {
                continue;
            }
            seen.insert(resource.id());
            events.extend(self.apply(scope, resource));
        }
        let gone = self.objects.keys().filter(|id| listed_part(id) && !seen.contains(*id)).cloned().collect::<Vec<_>>();
        for id in gone {
            events.extend(self.delete(&id));
        }
        events
    }
}

/// Handle on a running watch layer.
pub struct WatchHandle {
    pub events: Receiver<WatchEvent>,
    pub health: WatchHealth,
    pub join: JoinHandle<()>,
}

pub struct WatchLayer<S> {
    store: Arc<S>,
    scope: Arc<ControllerScope>,
    cache: ObjectCache,
    health: WatchHealth,
    tx: Sender<WatchEvent>,
}

enum Follow {
    Stop,
    Disconnected(WatchDisconnectedError),
}

impl<S> WatchLayer<S>
where
    S: Retrieve + CreateListener + 'static,
{
    /// Start watching on a new task.
    pub fn spawn(store: Arc<S>, scope: Arc<ControllerScope>, cancel: CancellationToken) -> WatchHandle {
        Self::spawn_with_capacity(store, scope, cancel, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn spawn_with_capacity(store: Arc<S>, scope: Arc<ControllerScope>, cancel: CancellationToken, capacity: usize) -> WatchHandle {
        let (tx, rx) = channel(capacity.max(1));
        let health = WatchHealth::default();
        let layer = WatchLayer {
            store,
            scope,
            cache: ObjectCache::default(),
            health: health.clone(),
            tx,
        };
        let join = tokio::spawn(layer.run(cancel));
        WatchHandle { events: rx, health, join }
    }

    #[instrument(name = "watch", skip_all, fields(store = S::CONFIG_LISTENER_NAME))]
    async fn run(mut self, cancel: CancellationToken) {
        info!("[NG.Watch] start watching");
        let mut listener_backoff = Backoff::new(&self.scope.backoff);
        loop {
            // subscribe first so nothing between the listing and the watch is lost
            let listener = match self.store.create_listener(&self.scope).await {
                Ok(listener) => listener,
                Err(e) => {
                    let delay = listener_backoff.next_delay();
                    warn!("[NG.Watch] fail to create listener: {e}, retry in {delay:?}");
                    if !self.send(WatchEvent::Disconnected(WatchDisconnectedError { reason: e.to_string() })).await {
                        return;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };
            listener_backoff.reset();
            if !self.resync(&cancel).await {
                return;
            }
            match self.follow(listener, &cancel).await {
                Follow::Stop => return,
                Follow::Disconnected(error) => {
                    warn!("[NG.Watch] {error}, resyncing");
                    if !self.send(WatchEvent::Disconnected(error)).await {
                        return;
                    }
                }
            }
        }
    }

    async fn follow(&mut self, mut listener: S::Listener, cancel: &CancellationToken) -> Follow {
        let mut resync_tick = tokio::time::interval(self.scope.resync_interval());
        // the first tick completes immediately
        resync_tick.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[NG.Watch] watch shutdown");
                    return Follow::Stop;
                }
                _ = resync_tick.tick() => {
                    debug!("[NG.Watch] periodic resync");
                    if !self.resync_once().await.unwrap_or(true) {
                        return Follow::Stop;
                    }
                }
                event = next_event(&mut listener) => {
                    let events = match event {
                        Ok(ListenEvent::Applied(resource)) => self.cache.apply(&self.scope, resource).into_iter().collect(),
                        Ok(ListenEvent::Deleted(id)) => self.cache.delete(&id).into_iter().collect(),
                        Ok(ListenEvent::Restarted { kind, namespace, objects }) => self.cache.diff(&self.scope, objects, Some(kind), namespace.as_deref()),
                        Err(e) => return Follow::Disconnected(WatchDisconnectedError { reason: e.to_string() }),
                    };
                    for event in events {
                        if !self.send(WatchEvent::Resource(event)).await {
                            return Follow::Stop;
                        }
                    }
                }
            }
        }
    }

    /// Relist until it succeeds. Returns false when the layer should stop.
    async fn resync(&mut self, cancel: &CancellationToken) -> bool {
        let mut backoff = Backoff::new(&self.scope.backoff);
        loop {
            match self.resync_once().await {
                Ok(alive) => return alive,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("[NG.Watch] resync failed: {e}, retry in {delay:?}");
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One relist and diff. `Ok(false)` when the receiver is gone.
    async fn resync_once(&mut self) -> Result<bool, BoxError> {
        let listed = match self.store.list_all(&self.scope).await {
            Ok(listed) => listed,
            Err(e) => {
                self.health.record_failure(self.scope.relist_failure_threshold);
                return Err(e);
            }
        };
        self.health.record_success();
        let events = self.cache.diff(&self.scope, listed.into_resources().collect(), None, None);
        debug!("[NG.Watch] resync found {} changes, {} objects cached", events.len(), self.cache.len());
        for event in events {
            if !self.send(WatchEvent::Resource(event)).await {
                return Ok(false);
            }
        }
        Ok(self.send(WatchEvent::Resynced).await)
    }

    async fn send(&self, event: WatchEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}
