//! **A namespace-scoped ingress controller**
//!
//! Watches route declarations and backend targets across namespaces, keeps
//! every declaration inside its own namespace, merges the accepted ones into a
//! single conflict-resolved route table and programs a reverse proxy with it.
//!
//! ## Special instructions for configuration
//! ### Route priority
//! Within a host, longer paths win over shorter ones and `Exact` wins over
//! `Prefix` at equal length. When two declarations claim the very same path,
//! the one created first wins; the other one is marked `Shadowed`.
//!
//! ### Namespaces
//! A declaration may only reference backends and TLS material of its own
//! namespace. A reference tagged with another namespace rejects the whole
//! declaration with `Rejected:CrossNamespaceReference`.
//!
//! ## startup
//! ### static resources
//! see [`startup_static`]
//! ### by resource directory
//! see [`startup_file`]
//! ### by k8s resource
//! see [`startup_k8s`]
//!
#![warn(clippy::unwrap_used)]

use std::sync::Arc;

pub use nsgate_config as config_service;
pub use nsgate_config::model;
pub use nsgate_config::model::{BoxError, BoxResult};
use nsgate_config::{service::ResourceStore, watch::WatchLayer, ResourceList};
pub use nsgate_kernel as kernel;
use nsgate_kernel::dataplane::{FileEngine, Programmer, ProxyEngine};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub mod config;
pub mod metrics;
pub mod queue;
pub mod reconcile;
pub mod server;
pub mod status;
pub mod store;

pub use config::{ControllerConfig, DataPlaneConfig};
pub use reconcile::{ReconcileState, ReconcileStatus, Reconciler};

#[cfg(feature = "fs")]
/// # Startup the controller on a resource directory
/// The `dir` holds `<namespace>/ingress/*.json` and `<namespace>/service/*.json`.
pub async fn startup_file(dir: impl AsRef<std::path::Path>, config: ControllerConfig) -> Result<(), BoxError> {
    use nsgate_config::service::{config_format::Json, fs::Fs};
    let store = Fs::new(dir, Json::default());
    let engine = FileEngine::new(config.dataplane.engine.clone());
    startup(store, engine, config).await
}

#[cfg(feature = "k8s")]
/// # Startup the controller on a kubernetes cluster
/// Uses the default client configuration (in-cluster or kubeconfig).
pub async fn startup_k8s(config: ControllerConfig) -> Result<(), BoxError> {
    use nsgate_config::service::k8s::K8s;
    let store = K8s::with_default_client().await?;
    let engine = FileEngine::new(config.dataplane.engine.clone());
    startup(store, engine, config).await
}

/// # Startup the controller on a fixed set of resources
pub async fn startup_static(resources: ResourceList, config: ControllerConfig) -> Result<(), BoxError> {
    use nsgate_config::service::memory::Memory;
    let store = Memory::new(resources);
    let engine = FileEngine::new(config.dataplane.engine.clone());
    startup(store, engine, config).await
}

/// # Startup the controller
/// The `store` could be any type that implements [`ResourceStore`], and the
/// `engine` any [`ProxyEngine`]. Stops on ctrl+c.
///
/// ## Errors
/// If the configuration is invalid, or the admin server cannot bind.
#[instrument(fields(store = (S::CONFIG_LISTENER_NAME)), skip_all)]
pub async fn startup<S, E>(store: S, engine: E, config: ControllerConfig) -> Result<(), BoxError>
where
    S: ResourceStore,
    E: ProxyEngine,
{
    info!("nsgate Meta Info: {:?}", Meta::new());
    info!("Starting controller...");
    startup_with_shutdown_signal(store, engine, config, ctrl_c_cancel_token()).await
}

/// Startup the controller with a custom shutdown signal
pub async fn startup_with_shutdown_signal<S, E>(store: S, engine: E, config: ControllerConfig, shutdown_signal: CancellationToken) -> Result<(), BoxError>
where
    S: ResourceStore,
    E: ProxyEngine,
{
    config.validate()?;
    let scope = Arc::new(config.scope.clone());
    let store = Arc::new(store);
    let watch = WatchLayer::spawn(store.clone(), scope.clone(), shutdown_signal.child_token());
    let programmer = Programmer::new(engine, config.dataplane.format, scope.cluster_domain.clone());
    let reconciler = Reconciler::new(store, &scope, programmer);
    let admin = match config.metrics_addr {
        Some(bind) => Some(server::serve(bind, server::HealthState::new(watch.health.clone(), reconciler.subscribe()), shutdown_signal.child_token()).await?),
        None => None,
    };
    reconciler.run(watch.events, shutdown_signal.clone()).await;
    // the loop also stops when the watch dies, make sure everything else does too
    shutdown_signal.cancel();
    if let Err(e) = watch.join.await {
        warn!("[NG.Watch] watch task failed: {e}");
    }
    if let Some(admin) = admin {
        let _ = admin.await;
    }
    info!("Controller shutdown");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct Meta {
    pub version: &'static str,
}

impl Meta {
    const DEFAULT: Meta = Self {
        version: env!("CARGO_PKG_VERSION"),
    };
    pub const fn new() -> Self {
        Self::DEFAULT
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub fn ctrl_c_cancel_token() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received ctrl+c signal, shutting down...");
            cancel_token.cancel();
        });
    }
    cancel_token
}
