use std::collections::{BTreeMap, BTreeSet};

use nsgate_config::{BackendTarget, EventKind, ObjectKey, ObjectMeta, Resource, ResourceEvent, RouteDeclaration};
use nsgate_kernel::BackendLookup;
use tracing::debug;

/// The reconcile loop's view of the cluster.
///
/// Owned by the loop, keyed by namespace and name. Keeps a reverse index from
/// each backend to the declarations referencing it, so a backend change only
/// re-validates its dependents.
#[derive(Debug, Default)]
pub struct ObjectStore {
    routes: BTreeMap<ObjectKey, RouteDeclaration>,
    backends: BTreeMap<ObjectKey, BackendTarget>,
    dependents: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
}

/// An event is stale when it carries an older generation of the object we hold.
fn is_stale(current: &ObjectMeta, incoming: &ObjectMeta) -> bool {
    current.uid == incoming.uid && incoming.generation < current.generation
}

fn referenced_backends(route: &RouteDeclaration) -> BTreeSet<ObjectKey> {
    route
        .backend_refs()
        .map(|backend| {
            let reference = backend.resolve(&route.meta.namespace);
            ObjectKey::new(reference.namespace, reference.name)
        })
        .collect()
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, key: &ObjectKey) -> Option<&RouteDeclaration> {
        self.routes.get(key)
    }
    pub fn routes(&self) -> impl Iterator<Item = &RouteDeclaration> {
        self.routes.values()
    }
    pub fn route_keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.routes.keys()
    }
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }
    /// Declarations referencing `backend`.
    pub fn dependents(&self, backend: &ObjectKey) -> impl Iterator<Item = &ObjectKey> {
        self.dependents.get(backend).into_iter().flatten()
    }

    /// Apply an event, returning the declarations that need validating again.
    /// Stale events change nothing and return nothing.
    pub fn apply(&mut self, event: ResourceEvent) -> Vec<ObjectKey> {
        match (event.kind, event.object) {
            (EventKind::Added | EventKind::Modified, Resource::Route(route)) => self.upsert_route(route),
            (EventKind::Added | EventKind::Modified, Resource::Backend(backend)) => self.upsert_backend(backend),
            (EventKind::Deleted, Resource::Route(route)) => self.delete_route(&route.meta),
            (EventKind::Deleted, Resource::Backend(backend)) => self.delete_backend(&backend.meta),
        }
    }

    fn upsert_route(&mut self, route: RouteDeclaration) -> Vec<ObjectKey> {
        let key = route.key();
        if let Some(current) = self.routes.get(&key) {
            if is_stale(&current.meta, &route.meta) {
                debug!("[NG.Reconcile] discard stale route {key} generation {}", route.meta.generation);
                return Vec::new();
            }
        }
        self.unindex(&key);
        for backend in referenced_backends(&route) {
            self.dependents.entry(backend).or_default().insert(key.clone());
        }
        self.routes.insert(key.clone(), route);
        vec![key]
    }

    fn delete_route(&mut self, meta: &ObjectMeta) -> Vec<ObjectKey> {
        let key = meta.key();
        let Some(current) = self.routes.get(&key) else {
            return Vec::new();
        };
        if current.meta.uid != meta.uid || is_stale(&current.meta, meta) {
            debug!("[NG.Reconcile] discard stale delete of route {key}");
            return Vec::new();
        }
        self.unindex(&key);
        self.routes.remove(&key);
        vec![key]
    }

    fn upsert_backend(&mut self, backend: BackendTarget) -> Vec<ObjectKey> {
        let key = backend.key();
        if let Some(current) = self.backends.get(&key) {
            if is_stale(&current.meta, &backend.meta) {
                debug!("[NG.Reconcile] discard stale backend {key} generation {}", backend.meta.generation);
                return Vec::new();
            }
        }
        self.backends.insert(key.clone(), backend);
        self.dependents(&key).cloned().collect()
    }

    fn delete_backend(&mut self, meta: &ObjectMeta) -> Vec<ObjectKey> {
        let key = meta.key();
        let Some(current) = self.backends.get(&key) else {
            return Vec::new();
        };
        if current.meta.uid != meta.uid || is_stale(&current.meta, meta) {
            debug!("[NG.Reconcile] discard stale delete of backend {key}");
            return Vec::new();
        }
        self.backends.remove(&key);
        self.dependents(&key).cloned().collect()
    }

    fn unindex(&mut self, route: &ObjectKey) {
        let Some(current) = self.routes.get(route) else {
            return;
        };
        for backend in referenced_backends(current) {
            if let Some(routes) = self.dependents.get_mut(&backend) {
                routes.remove(route);
                if routes.is_empty() {
                    self.dependents.remove(&backend);
                }
            }
        }
    }
}

impl BackendLookup for ObjectStore {
    fn backend(&self, key: &ObjectKey) -> Option<&BackendTarget> {
        self.backends.get(key)
    }
}
