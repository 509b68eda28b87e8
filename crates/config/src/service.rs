/// Config file format
pub mod config_format;
/// File system backend
#[cfg(feature = "fs")]
pub mod fs;
/// Kubernetes backend
#[cfg(feature = "k8s")]
pub mod k8s;
/// In-memory backend
pub mod memory;

use futures_util::Future;
use nsgate_model::*;

/// List the objects a store holds for a scope.
pub trait Retrieve: Sync + Send {
    fn list_routes(&self, scope: &ControllerScope) -> impl Future<Output = Result<Vec<RouteDeclaration>, BoxError>> + Send;
    fn list_backends(&self, scope: &ControllerScope) -> impl Future<Output = Result<Vec<BackendTarget>, BoxError>> + Send;
    fn list_all(&self, scope: &ControllerScope) -> impl Future<Output = Result<ResourceList, BoxError>> + Send {
        async move {
            let routes = self.list_routes(scope).await?;
            let backends = self.list_backends(scope).await?;
            Ok(ResourceList { routes, backends })
        }
    }
}

/// Surface status conditions on the source object.
pub trait UpdateStatus: Sync + Send {
    fn update_route_status(&self, key: &ObjectKey, status: &RouteStatus) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// A raw change notification from a store.
#[derive(Debug, Clone)]
pub enum ListenEvent {
    Applied(Resource),
    Deleted(ResourceId),
    /// The store restarted its own watch and re-listed every object of a kind,
    /// in one namespace or, with `namespace: None`, in every selected namespace.
    Restarted {
        kind: ResourceKind,
        namespace: Option<String>,
        objects: Vec<Resource>,
    },
}

pub trait CreateListener: Sync + Send {
    const CONFIG_LISTENER_NAME: &'static str;
    type Listener: Listen + Send + 'static;
    fn create_listener(&self, scope: &ControllerScope) -> impl Future<Output = Result<Self::Listener, BoxError>> + Send;
}

/// A live change stream. `Err` means the stream broke and the caller must resync.
pub trait Listen: Unpin {
    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<ListenEvent, BoxError>>;
}

pub trait ListenExt: Listen {
    fn join<L1>(self, l1: L1) -> Joint<Self, L1>
    where
        L1: Listen,
        Self: Sized,
    {
        Joint { l0: self, l1 }
    }
}

impl<T: Listen> ListenExt for T {}

/// Wait for the next event of a listener.
pub fn next_event<L: Listen>(listener: &mut L) -> impl Future<Output = Result<ListenEvent, BoxError>> + '_ {
    std::future::poll_fn(move |cx| listener.poll_next(cx))
}

pub struct Joint<L0, L1> {
    l0: L0,
    l1: L1,
}

impl<L0, L1> Listen for Joint<L0, L1>
where
    L0: Listen,
    L1: Listen,
{
    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<ListenEvent, BoxError>> {
        // l0 has higher priority
        let l0 = self.l0.poll_next(cx);
        if l0.is_ready() {
            return l0;
        }
        self.l1.poll_next(cx)
    }
}

impl Listen for tokio::sync::mpsc::Receiver<ListenEvent> {
    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<ListenEvent, BoxError>> {
        self.poll_recv(cx).map(|r| r.ok_or("channel closed".into()))
    }
}

impl Listen for tokio::sync::mpsc::UnboundedReceiver<Result<ListenEvent, BoxError>> {
    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<ListenEvent, BoxError>> {
        self.poll_recv(cx).map(|r| r.unwrap_or_else(|| Err("channel closed".into())))
    }
}

/// Everything the controller needs from a cluster API store.
pub trait ResourceStore: Retrieve + CreateListener + UpdateStatus + 'static {}

impl<T> ResourceStore for T where T: Retrieve + CreateListener + UpdateStatus + 'static {}
