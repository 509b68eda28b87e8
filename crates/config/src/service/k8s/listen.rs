use std::{fmt::Debug, sync::Arc, task::ready};

use futures_util::{pin_mut, TryStreamExt};
use k8s_openapi::{
    api::{core::v1::Service, networking::v1::Ingress},
    NamespaceResourceScope,
};
use kube::{runtime::watcher, Api};
use nsgate_model::{BoxError, ControllerScope, Resource, ResourceKind};
use serde::de::DeserializeOwned;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use super::{
    convert::{IngressConv, ServiceConv},
    K8s,
};
use crate::service::{CreateListener, Listen, ListenEvent};

type EventSender = UnboundedSender<Result<ListenEvent, BoxError>>;

pub struct K8sListener {
    rx: UnboundedReceiver<Result<ListenEvent, BoxError>>,
    watchers: Vec<JoinHandle<()>>,
}

impl Drop for K8sListener {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

impl K8s {
    fn spawn_watcher<K, C>(api: Api<K>, namespace: Option<String>, kind: ResourceKind, scope: Arc<ControllerScope>, evt_tx: EventSender, convert: C) -> JoinHandle<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + 'static,
        C: Fn(&K) -> Option<Resource> + Send + 'static,
    {
        tokio::spawn(async move {
            let selected = move |object: &K| convert(object).filter(|resource| scope.selects(&resource.meta().namespace));
            let ew = watcher::watcher(api, watcher::Config::default());
            pin_mut!(ew);
            loop {
                let event = match ew.try_next().await {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        let _ = evt_tx.send(Err(format!("[NG.Config] {kind} watch ended").into()));
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("[NG.Config] {kind} watch error: {e}");
                        let _ = evt_tx.send(Err(e.into()));
                        return;
                    }
                };
                let event = match event {
                    watcher::Event::Applied(object) => match selected(&object) {
                        Some(resource) => ListenEvent::Applied(resource),
                        None => continue,
                    },
                    watcher::Event::Deleted(object) => match selected(&object) {
                        Some(resource) => ListenEvent::Deleted(resource.id()),
                        None => continue,
                    },
                    watcher::Event::Restarted(objects) => ListenEvent::Restarted {
                        kind,
                        namespace: namespace.clone(),
                        objects: objects.iter().filter_map(&selected).collect(),
                    },
                };
                if evt_tx.send(Ok(event)).is_err() {
                    return;
                }
            }
        })
    }
}

impl CreateListener for K8s {
    const CONFIG_LISTENER_NAME: &'static str = "k8s";
    type Listener = K8sListener;

    async fn create_listener(&self, scope: &ControllerScope) -> Result<K8sListener, BoxError> {
        let (evt_tx, evt_rx) = unbounded_channel();
        let scope = Arc::new(scope.clone());
        let mut watchers = Vec::new();
        for (namespace, api) in self.get_scoped_apis::<Ingress>(&scope) {
            watchers.push(Self::spawn_watcher(api, namespace, ResourceKind::Route, scope.clone(), evt_tx.clone(), |ingress: &Ingress| {
                ingress.to_route_declaration().map(Resource::Route)
            }));
        }
        for (namespace, api) in self.get_scoped_apis::<Service>(&scope) {
            watchers.push(Self::spawn_watcher(api, namespace, ResourceKind::Backend, scope.clone(), evt_tx.clone(), |service: &Service| {
                service.to_backend_target().map(Resource::Backend)
            }));
        }
        tracing::debug!("[NG.Config] {} kubernetes watchers started", watchers.len());
        Ok(K8sListener { rx: evt_rx, watchers })
    }
}

impl Listen for K8sListener {
    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<ListenEvent, BoxError>> {
        match ready!(self.rx.poll_recv(cx)) {
            Some(next) => std::task::Poll::Ready(next),
            None => std::task::Poll::Ready(Err("kubernetes watchers stopped".into())),
        }
    }
}
