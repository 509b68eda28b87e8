//! # Data-Plane Programmer
//!
//! Translates a [`RouteTable`] snapshot into reverse proxy configuration and
//! hands it to a [`ProxyEngine`].
//!
//! ```text
//! RouteTable --from_table--> ProxyConfig --render--> RenderedConfig --apply--> engine
//!                                                          |
//!                                      digest == last applied => no reload
//! ```
use std::{collections::BTreeMap, future::Future, net::SocketAddr};

use nsgate_model::{constants, ObjectKey, PathType, ReloadError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::{
    table::{RouteTable, TableEntry},
    validate::ResolvedBackend,
};

mod file_engine;
mod nginx;
mod recording;
pub use file_engine::{FileEngine, FileEngineConfig};
pub use recording::RecordingEngine;

/// Engine-neutral proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    pub upstreams: Vec<Upstream>,
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    pub name: String,
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<String>,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub path_type: PathType,
    pub upstream: String,
}

/// Namespaces and service names are DNS labels, `.` never occurs inside them.
fn upstream_name(backend: &ResolvedBackend) -> String {
    format!("{}.{}.{}", backend.service.namespace, backend.service.name, backend.port)
}

fn service_dns(service: &ObjectKey, port: u16, cluster_domain: &str) -> String {
    format!("{}.{}.svc.{cluster_domain}:{port}", service.name, service.namespace)
}

impl ProxyConfig {
    /// Describe a table. Upstreams use the backend endpoints when known, the service DNS name otherwise.
    ///
    /// A server also carries the entries of the hosts it falls back to (partial
    /// wildcard, then catch-all) for paths its own entries leave open, as the
    /// proxy never leaves a server once it picked one.
    pub fn from_table(table: &RouteTable, cluster_domain: &str) -> Self {
        let mut upstreams = BTreeMap::new();
        let mut servers = Vec::with_capacity(table.hosts().len());
        for (host, routes) in table.hosts() {
            let mut served: Vec<&TableEntry> = routes.entries.iter().collect();
            for fallback in table.fallbacks(host) {
                for entry in &fallback.entries {
                    if !served.iter().any(|own| own.path.covers(&entry.path)) {
                        served.push(entry);
                    }
                }
            }
            let mut locations = Vec::with_capacity(served.len());
            for entry in served {
                let name = upstream_name(&entry.backend);
                upstreams.entry(name.clone()).or_insert_with(|| {
                    let backend = &entry.backend;
                    if backend.endpoints.is_empty() {
                        vec![service_dns(&backend.service, backend.port, cluster_domain)]
                    } else {
                        backend.endpoints.iter().map(|ip| SocketAddr::new(*ip, backend.port).to_string()).collect()
                    }
                });
                locations.push(Location {
                    path: entry.path.path.clone(),
                    path_type: entry.path.path_type,
                    upstream: name,
                });
            }
            servers.push(Server {
                host: host.clone(),
                tls_secret: routes.tls.as_ref().map(|tls| tls.secret.to_string()),
                locations,
            });
        }
        Self {
            upstreams: upstreams.into_iter().map(|(name, servers)| Upstream { name, servers }).collect(),
            servers,
        }
    }

    pub fn is_catch_all(server: &Server) -> bool {
        server.host == constants::WILDCARD_HOST
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderFormat {
    #[default]
    Nginx,
    Json,
}

/// Rendered configuration bytes with their sha-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub bytes: Vec<u8>,
    pub digest: String,
}

impl RenderedConfig {
    pub fn new(bytes: Vec<u8>) -> Self {
        let digest = format!("{:x}", Sha256::digest(&bytes));
        Self { bytes, digest }
    }
}

impl RenderFormat {
    /// # Errors
    /// Only when the configuration cannot be serialized.
    pub fn render(&self, config: &ProxyConfig) -> Result<RenderedConfig, ReloadError> {
        let bytes = match self {
            RenderFormat::Nginx => nginx::render(config).into_bytes(),
            RenderFormat::Json => serde_json::to_vec_pretty(config).map_err(|e| ReloadError::new(format!("fail to render json: {e}")))?,
        };
        Ok(RenderedConfig::new(bytes))
    }
}

/// A reverse proxy that can take a new configuration.
///
/// Implementations must leave the previous configuration active when `apply` fails.
pub trait ProxyEngine: Send + Sync {
    fn apply(&self, config: &RenderedConfig) -> impl Future<Output = Result<(), ReloadError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramOutcome {
    Applied { digest: String },
    /// Same configuration as the last applied one, the engine was not called.
    Unchanged,
}

/// Single writer of the data plane.
#[derive(Debug)]
pub struct Programmer<E> {
    engine: E,
    format: RenderFormat,
    cluster_domain: String,
    last_good: Option<RenderedConfig>,
}

impl<E> Programmer<E>
where
    E: ProxyEngine,
{
    pub fn new(engine: E, format: RenderFormat, cluster_domain: impl Into<String>) -> Self {
        Self {
            engine,
            format,
            cluster_domain: cluster_domain.into(),
            last_good: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
    pub fn last_good(&self) -> Option<&RenderedConfig> {
        self.last_good.as_ref()
    }
    pub fn last_applied_digest(&self) -> Option<&str> {
        self.last_good.as_ref().map(|config| config.digest.as_str())
    }

    pub fn render(&self, table: &RouteTable) -> Result<RenderedConfig, ReloadError> {
        self.format.render(&ProxyConfig::from_table(table, &self.cluster_domain))
    }

    /// Program the data plane with a table snapshot.
    ///
    /// # Errors
    /// The engine refused the configuration. The last good configuration stays active.
    #[instrument(skip_all, fields(version = table.version()))]
    pub async fn program(&mut self, table: &RouteTable) -> Result<ProgramOutcome, ReloadError> {
        let rendered = self.render(table)?;
        if self.last_applied_digest() == Some(rendered.digest.as_str()) {
            return Ok(ProgramOutcome::Unchanged);
        }
        match self.engine.apply(&rendered).await {
            Ok(()) => {
                info!("[NG.DataPlane] applied configuration {}", &rendered.digest);
                let digest = rendered.digest.clone();
                self.last_good = Some(rendered);
                Ok(ProgramOutcome::Applied { digest })
            }
            Err(e) => {
                warn!("[NG.DataPlane] reload failed, keeping {:?}: {e}", self.last_applied_digest());
                Err(e)
            }
        }
    }
}
