use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    task::ready,
};

use nsgate_model::*;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{CreateListener, Listen, ListenEvent, Retrieve, UpdateStatus};

type ListenSender = UnboundedSender<Result<ListenEvent, BoxError>>;

/// In-memory resource store.
///
/// Used for static startup and as the cluster API double in tests: mutations
/// are broadcast to every live listener, and watch failures can be injected.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: Mutex<BTreeMap<ResourceId, Resource>>,
    listeners: Mutex<Vec<ListenSender>>,
    statuses: Mutex<BTreeMap<ObjectKey, RouteStatus>>,
    status_writes: AtomicUsize,
    failing_lists: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Memory {
    pub fn new(resources: ResourceList) -> Self {
        let memory = Self::default();
        {
            let mut objects = lock(&memory.inner.objects);
            for resource in resources.into_resources() {
                objects.insert(resource.id(), resource);
            }
        }
        memory
    }

    fn broadcast(&self, event: ListenEvent) {
        lock(&self.inner.listeners).retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    fn put(&self, resource: Resource, notify: bool) {
        lock(&self.inner.objects).insert(resource.id(), resource.clone());
        if notify {
            self.broadcast(ListenEvent::Applied(resource));
        }
    }

    fn remove(&self, id: ResourceId) -> Option<Resource> {
        let removed = lock(&self.inner.objects).remove(&id);
        if removed.is_some() {
            self.broadcast(ListenEvent::Deleted(id));
        }
        removed
    }

    pub fn apply_route(&self, route: RouteDeclaration) {
        self.put(Resource::Route(route), true)
    }
    pub fn apply_backend(&self, backend: BackendTarget) {
        self.put(Resource::Backend(backend), true)
    }
    /// Change the stored object without telling listeners, as if the watch missed the event.
    pub fn apply_silently(&self, resource: Resource) {
        self.put(resource, false)
    }
    pub fn delete_route(&self, key: &ObjectKey) -> Option<Resource> {
        self.remove(ResourceId::route(key.clone()))
    }
    pub fn delete_backend(&self, key: &ObjectKey) -> Option<Resource> {
        self.remove(ResourceId::backend(key.clone()))
    }
    /// Break every live listener.
    pub fn disconnect_watchers(&self) {
        for tx in lock(&self.inner.listeners).drain(..) {
            let _ = tx.send(Err("memory store watch disconnected".into()));
        }
    }
    /// Make the next `count` list calls fail.
    pub fn fail_next_lists(&self, count: u32) {
        self.inner.failing_lists.store(count, Ordering::SeqCst);
    }
    pub fn route_status(&self, key: &ObjectKey) -> Option<RouteStatus> {
        lock(&self.inner.statuses).get(key).cloned()
    }
    pub fn status_writes(&self) -> usize {
        self.inner.status_writes.load(Ordering::SeqCst)
    }
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).iter().filter(|tx| !tx.is_closed()).count()
    }

    fn check_list(&self) -> Result<(), BoxError> {
        let failing = self.inner.failing_lists.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match failing {
            Ok(_) => Err("memory store list failed".into()),
            Err(_) => Ok(()),
        }
    }
}

impl Retrieve for Memory {
    async fn list_routes(&self, scope: &ControllerScope) -> Result<Vec<RouteDeclaration>, BoxError> {
        self.check_list()?;
        Ok(lock(&self.inner.objects)
            .values()
            .filter_map(|resource| match resource {
                Resource::Route(route) if scope.selects(&route.meta.namespace) => Some(route.clone()),
                _ => None,
            })
            .collect())
    }

    async fn list_backends(&self, scope: &ControllerScope) -> Result<Vec<BackendTarget>, BoxError> {
        Ok(lock(&self.inner.objects)
            .values()
            .filter_map(|resource| match resource {
                Resource::Backend(backend) if scope.selects(&backend.meta.namespace) => Some(backend.clone()),
                _ => None,
            })
            .collect())
    }
}

impl UpdateStatus for Memory {
    async fn update_route_status(&self, key: &ObjectKey, status: &RouteStatus) -> Result<(), BoxError> {
        if !lock(&self.inner.objects).contains_key(&ResourceId::route(key.clone())) {
            return Err(format!("route {key} not found").into());
        }
        self.inner.status_writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.statuses).insert(key.clone(), status.clone());
        Ok(())
    }
}

pub struct MemoryListener {
    rx: UnboundedReceiver<Result<ListenEvent, BoxError>>,
}

impl Listen for MemoryListener {
    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<ListenEvent, BoxError>> {
        match ready!(self.rx.poll_recv(cx)) {
            Some(next) => std::task::Poll::Ready(next),
            None => std::task::Poll::Ready(Err("memory store closed".into())),
        }
    }
}

impl CreateListener for Memory {
    const CONFIG_LISTENER_NAME: &'static str = "memory";
    type Listener = MemoryListener;

    async fn create_listener(&self, _scope: &ControllerScope) -> Result<MemoryListener, BoxError> {
        let (tx, rx) = unbounded_channel();
        lock(&self.inner.listeners).push(tx);
        Ok(MemoryListener { rx })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_list_respects_scope() {
        let memory = Memory::default();
        memory.apply_route(RouteDeclaration::new(ObjectMeta::new("production", "web")));
        memory.apply_route(RouteDeclaration::new(ObjectMeta::new("staging", "web")));
        let scope = ControllerScope {
            namespaces: NamespaceSelector::only(["production"]),
            ..Default::default()
        };
        let routes = memory.list_routes(&scope).await.expect("list");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].meta.namespace, "production");
    }

    #[tokio::test]
    async fn test_fail_next_lists() {
        let memory = Memory::default();
        memory.fail_next_lists(2);
        let scope = ControllerScope::default();
        assert!(memory.list_all(&scope).await.is_err());
        assert!(memory.list_all(&scope).await.is_err());
        assert!(memory.list_all(&scope).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect() {
        use crate::service::next_event;
        let memory = Memory::default();
        let mut listener = memory.create_listener(&ControllerScope::default()).await.expect("listener");
        memory.apply_backend(BackendTarget::new(ObjectMeta::new("production", "api-service")).port(80));
        assert!(matches!(next_event(&mut listener).await, Ok(ListenEvent::Applied(Resource::Backend(_)))));
        memory.disconnect_watchers();
        assert!(next_event(&mut listener).await.is_err());
        assert_eq!(memory.listener_count(), 0);
    }
}
