//! # Reconciliation Loop
//!
//! Single task owning the object store, the route table builder and the data
//! plane programmer. Nothing else writes the data plane.
//!
//! ```text
//!              Disconnected (from any state)
//!        +-------------------------------------> Resyncing
//!        |                                           |
//!        |                    Resynced               v
//!      Idle ---- event ----> Syncing <---------------+
//!        ^                      |
//!        |      unchanged       | table changed
//!        +----------------------+
//!        |                      v
//!        +------ success --- Applying <---- delay ---- Backoff
//!                               |                         ^
//!                               +-------- failure --------+
//! ```
//!
//! A retry after a failed reload applies the very snapshot that failed, or a
//! newer one once queued events have been synced. Events arriving while
//! backing off wait in the queue.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    sync::Arc,
    time::Duration,
};

use nsgate_config::{
    backoff::Backoff, service::UpdateStatus, watch::WatchEvent, Condition, ControllerScope, ObjectKey, RouteStatus, ValidationError,
};
use nsgate_kernel::{
    dataplane::{ProgramOutcome, Programmer, ProxyEngine},
    RouteTable, RouteTableBuilder, SnapshotCell, Validator,
};
use tokio::{
    sync::{mpsc::Receiver, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{metrics, queue::WorkQueue, status::StatusReporter, store::ObjectStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileState {
    Idle,
    Syncing,
    Applying,
    Backoff,
    /// Waiting for a complete listing, the initial one included.
    #[default]
    Resyncing,
}

impl Display for ReconcileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReconcileState::Idle => "Idle",
            ReconcileState::Syncing => "Syncing",
            ReconcileState::Applying => "Applying",
            ReconcileState::Backoff => "Backoff",
            ReconcileState::Resyncing => "Resyncing",
        };
        f.write_str(name)
    }
}

/// Published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileStatus {
    pub state: ReconcileState,
    /// Version of the last built route table.
    pub table_version: u64,
    pub applied_digest: Option<String>,
    /// Consecutive failed reloads.
    pub reload_failures: u32,
    /// Wait before the next reload attempt, while backing off.
    pub retry_in: Option<Duration>,
}

pub struct Reconciler<S, E> {
    store: Arc<S>,
    objects: ObjectStore,
    queue: WorkQueue,
    validator: Validator,
    builder: RouteTableBuilder,
    programmer: Programmer<E>,
    reporter: StatusReporter,
    snapshot: Arc<SnapshotCell>,
    rejections: BTreeMap<ObjectKey, ValidationError>,
    /// Declarations changed since the last successful reload.
    triggers: BTreeSet<ObjectKey>,
    /// Declarations carrying `ReloadFailed`, with the failure message.
    reload_failed: BTreeMap<ObjectKey, String>,
    /// Latest snapshot not yet programmed.
    pending: Option<Arc<RouteTable>>,
    programmed_version: Option<u64>,
    reported_version: Option<u64>,
    backoff: Backoff,
    retry_delay: Option<Duration>,
    state: ReconcileState,
    status_tx: watch::Sender<ReconcileStatus>,
}

impl<S, E> std::fmt::Debug for Reconciler<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("state", &self.state)
            .field("routes", &self.objects.route_count())
            .field("backends", &self.objects.backend_count())
            .field("queued", &self.queue.len())
            .field("programmed_version", &self.programmed_version)
            .finish_non_exhaustive()
    }
}

impl<S, E> Reconciler<S, E>
where
    S: UpdateStatus + 'static,
    E: ProxyEngine,
{
    pub fn new(store: Arc<S>, scope: &ControllerScope, programmer: Programmer<E>) -> Self {
        let (status_tx, _) = watch::channel(ReconcileStatus::default());
        Self {
            store,
            objects: ObjectStore::new(),
            queue: WorkQueue::new(),
            validator: Validator::new(),
            builder: RouteTableBuilder::new(),
            programmer,
            reporter: StatusReporter::new(),
            snapshot: Arc::new(SnapshotCell::new()),
            rejections: BTreeMap::new(),
            triggers: BTreeSet::new(),
            reload_failed: BTreeMap::new(),
            pending: None,
            programmed_version: None,
            reported_version: None,
            backoff: Backoff::new(&scope.backoff),
            retry_delay: None,
            state: ReconcileState::Resyncing,
            status_tx,
        }
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }
    pub fn subscribe(&self) -> watch::Receiver<ReconcileStatus> {
        self.status_tx.subscribe()
    }
    /// Latest published route table, for concurrent readers.
    pub fn snapshot(&self) -> Arc<SnapshotCell> {
        self.snapshot.clone()
    }
    pub fn programmer(&self) -> &Programmer<E> {
        &self.programmer
    }
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }
    /// Last status written for a declaration.
    pub fn route_status(&self, key: &ObjectKey) -> Option<&RouteStatus> {
        self.reporter.last(key)
    }

    /// Run until `cancel` fires or the watch channel closes.
    ///
    /// An apply already in flight when `cancel` fires completes first.
    #[instrument(name = "reconcile", skip_all)]
    pub async fn run(mut self, mut events: Receiver<WatchEvent>, cancel: CancellationToken) -> Self {
        info!("[NG.Reconcile] start, waiting for the initial listing");
        self.publish();
        loop {
            if cancel.is_cancelled() && self.state != ReconcileState::Applying {
                break;
            }
            let running = match self.state {
                ReconcileState::Idle | ReconcileState::Resyncing => self.wait_event(&mut events, &cancel).await,
                ReconcileState::Syncing => {
                    self.sync().await;
                    true
                }
                ReconcileState::Applying => {
                    self.apply().await;
                    true
                }
                ReconcileState::Backoff => self.wait_retry(&mut events, &cancel).await,
            };
            if !running {
                break;
            }
        }
        info!("[NG.Reconcile] stopped in state {}", self.state);
        self
    }

    fn set_state(&mut self, state: ReconcileState) {
        if self.state != state {
            debug!("[NG.Reconcile] {} -> {state}", self.state);
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(ReconcileStatus {
            state: self.state,
            table_version: self.builder.last().version(),
            applied_digest: self.programmer.last_applied_digest().map(str::to_string),
            reload_failures: self.backoff.attempts(),
            retry_in: self.retry_delay,
        });
    }

    fn on_event(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Resource(event) => {
                self.queue.push(event);
                if self.state == ReconcileState::Idle {
                    self.set_state(ReconcileState::Syncing);
                }
            }
            WatchEvent::Disconnected(error) => {
                warn!("[NG.Reconcile] {error}, waiting for resync");
                metrics::record_watch("disconnected");
                self.set_state(ReconcileState::Resyncing);
            }
            WatchEvent::Resynced => {
                metrics::record_watch("resynced");
                if matches!(self.state, ReconcileState::Idle | ReconcileState::Resyncing) {
                    self.set_state(ReconcileState::Syncing);
                }
            }
        }
    }

    /// Take one event, then whatever else is already there. Returns false to stop.
    async fn wait_event(&mut self, events: &mut Receiver<WatchEvent>, cancel: &CancellationToken) -> bool {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            warn!("[NG.Reconcile] watch channel closed");
            return false;
        };
        self.on_event(event);
        while let Ok(event) = events.try_recv() {
            self.on_event(event);
        }
        true
    }

    /// Sleep out the backoff delay while queueing events. Returns false to stop.
    async fn wait_retry(&mut self, events: &mut Receiver<WatchEvent>, cancel: &CancellationToken) -> bool {
        let delay = self.retry_delay.unwrap_or_default();
        let sleep = tokio::time::sleep_until(Instant::now() + delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = &mut sleep => {
                    self.retry_delay = None;
                    self.set_state(ReconcileState::Applying);
                    return true;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("[NG.Reconcile] watch channel closed");
                        return false;
                    };
                    self.on_event(event);
                    if self.state != ReconcileState::Backoff {
                        return true;
                    }
                }
            }
        }
    }

    #[instrument(skip_all, fields(queued = self.queue.len()))]
    async fn sync(&mut self) {
        let mut dirty = BTreeSet::new();
        for event in self.queue.drain() {
            metrics::record_event(event.object.kind(), event.kind);
            debug!("[NG.Reconcile] {} {} generation {}", event.kind, event.id(), event.object.generation());
            dirty.extend(self.objects.apply(event));
        }
        for key in &dirty {
            self.revalidate(key);
        }
        let table = self.builder.build();
        self.snapshot.publish(table.clone());
        metrics::set_table_entries(table.len());

        let report: Vec<ObjectKey> = if self.reported_version != Some(table.version()) {
            // routing changed, shadowing and tls conflicts may have moved anywhere
            self.objects.route_keys().cloned().collect()
        } else {
            dirty.iter().cloned().collect()
        };
        self.reported_version = Some(table.version());
        self.triggers.extend(dirty.into_iter().filter(|key| self.builder.contains(key)));
        self.reporter.retry_pending(self.store.as_ref()).await;
        self.report_statuses(report).await;

        if self.programmed_version == Some(table.version()) {
            self.pending = None;
            self.set_state(ReconcileState::Idle);
        } else {
            debug!("[NG.Reconcile] table version {} with {} entries ready", table.version(), table.len());
            self.pending = Some(table);
            self.set_state(ReconcileState::Applying);
        }
    }

    fn revalidate(&mut self, key: &ObjectKey) {
        let Some(route) = self.objects.route(key) else {
            self.builder.remove(key);
            self.rejections.remove(key);
            self.reload_failed.remove(key);
            self.triggers.remove(key);
            self.reporter.forget(key);
            return;
        };
        match self.validator.validate(route, &self.objects) {
            Ok(validated) => {
                if self.rejections.remove(key).is_some() {
                    info!("[NG.Reconcile] {key} accepted");
                }
                self.builder.upsert(validated);
            }
            Err(error) => {
                warn!("[NG.Reconcile] {key} rejected: {error}");
                metrics::record_rejection(error.reason());
                self.builder.remove(key);
                self.reload_failed.remove(key);
                self.rejections.insert(key.clone(), error);
            }
        }
    }

    fn compute_status(&self, key: &ObjectKey, table: &RouteTable) -> Option<RouteStatus> {
        let route = self.objects.route(key)?;
        let generation = route.meta.generation;
        if let Some(error) = self.rejections.get(key) {
            return Some(RouteStatus::new([Condition::rejected(error)], generation));
        }
        let mut conditions = vec![Condition::Accepted];
        let paths = table.shadowed_paths(key);
        if !paths.is_empty() {
            conditions.push(Condition::Shadowed { paths });
        }
        let hosts = table.tls_conflicts(key);
        if !hosts.is_empty() {
            conditions.push(Condition::TlsConflict { hosts });
        }
        if let Some(message) = self.reload_failed.get(key) {
            conditions.push(Condition::ReloadFailed { message: message.clone() });
        }
        Some(RouteStatus::new(conditions, generation))
    }

    async fn report_statuses(&mut self, keys: impl IntoIterator<Item = ObjectKey>) {
        let table = self.builder.last().clone();
        for key in keys {
            let Some(status) = self.compute_status(&key, &table) else {
                continue;
            };
            // failures are kept by the reporter and retried on the next sync
            let _ = self.reporter.report(self.store.as_ref(), &key, status).await;
        }
    }

    #[instrument(skip_all, fields(version = self.pending.as_ref().map(|table| table.version())))]
    async fn apply(&mut self) {
        let Some(table) = self.pending.clone() else {
            self.set_state(ReconcileState::Idle);
            return;
        };
        let started = Instant::now();
        let result = self.programmer.program(&table).await;
        let elapsed = started.elapsed();
        match result {
            Ok(outcome) => {
                match &outcome {
                    ProgramOutcome::Applied { digest } => {
                        metrics::record_reload(true, elapsed);
                        info!("[NG.Reconcile] table version {} applied as {digest} in {elapsed:?}", table.version());
                    }
                    ProgramOutcome::Unchanged => debug!("[NG.Reconcile] table version {} renders the active config", table.version()),
                }
                self.programmed_version = Some(table.version());
                self.pending = None;
                self.backoff.reset();
                self.retry_delay = None;
                self.triggers.clear();
                let recovered: Vec<ObjectKey> = std::mem::take(&mut self.reload_failed).into_keys().collect();
                self.report_statuses(recovered).await;
                let next = if self.queue.is_empty() { ReconcileState::Idle } else { ReconcileState::Syncing };
                self.set_state(next);
            }
            Err(error) => {
                metrics::record_reload(false, elapsed);
                let message = error.to_string();
                let failed: Vec<ObjectKey> = self.triggers.iter().filter(|key| self.builder.contains(key)).cloned().collect();
                for key in &failed {
                    self.reload_failed.insert(key.clone(), message.clone());
                }
                let delay = self.backoff.next_delay();
                warn!(
                    "[NG.Reconcile] table version {} not applied ({} failures in a row), keeping {:?}, retry in {delay:?}: {error}",
                    table.version(),
                    self.backoff.attempts(),
                    self.programmer.last_applied_digest()
                );
                self.report_statuses(failed).await;
                self.retry_delay = Some(delay);
                self.set_state(ReconcileState::Backoff);
            }
        }
    }
}
