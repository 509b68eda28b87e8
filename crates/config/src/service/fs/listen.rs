use std::task::ready;

use notify::{Event, EventKind, Watcher};
use nsgate_model::{BoxError, ControllerScope};

use super::Fs;
use crate::service::{config_format::ConfigFormat, CreateListener, Listen, ListenEvent};

pub struct FsListener {
    // hold the watcher, prevent dropping
    _watcher: notify::RecommendedWatcher,
    rx: tokio::sync::mpsc::UnboundedReceiver<Result<ListenEvent, BoxError>>,
}

impl<F> CreateListener for Fs<F>
where
    F: ConfigFormat + Clone + Send + Sync + 'static,
{
    const CONFIG_LISTENER_NAME: &'static str = "file";
    type Listener = FsListener;

    async fn create_listener(&self, scope: &ControllerScope) -> Result<FsListener, BoxError> {
        FsListener::new(self.clone(), scope.clone())
    }
}

impl FsListener {
    pub fn new<F>(fs: Fs<F>, scope: ControllerScope) -> Result<Self, BoxError>
    where
        F: ConfigFormat + Clone + Send + 'static,
    {
        let (evt_tx, evt_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = {
            let fs = fs.clone();
            notify::RecommendedWatcher::new(
                move |next: notify::Result<Event>| {
                    let evt = match next {
                        Ok(evt) => evt,
                        Err(e) => {
                            let _ = evt_tx.send(Err(e.into()));
                            return;
                        }
                    };
                    if matches!(evt.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in &evt.paths {
                        let Some(id) = fs.extract_resource_id(path) else { continue };
                        if !scope.selects(&id.key.namespace) {
                            continue;
                        }
                        let event = match fs.read_blocking(&id) {
                            Ok(Some(resource)) => ListenEvent::Applied(resource),
                            Ok(None) => ListenEvent::Deleted(id),
                            Err(e) => {
                                tracing::warn!("[NG.Config] fail to read {path:?}: {e}");
                                continue;
                            }
                        };
                        let _ = evt_tx.send(Ok(event));
                    }
                },
                Default::default(),
            )?
        };
        watcher.watch(&fs.dir, notify::RecursiveMode::Recursive)?;
        Ok(Self { _watcher: watcher, rx: evt_rx })
    }
}

impl Listen for FsListener {
    fn poll_next(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<ListenEvent, BoxError>> {
        match ready!(self.rx.poll_recv(cx)) {
            Some(next) => std::task::Poll::Ready(next),
            None => std::task::Poll::Ready(Err("file watcher stopped".into())),
        }
    }
}
