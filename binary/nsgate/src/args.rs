use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use clap::Parser;
use nsgate_shell::{model::NamespaceSelector, BoxError, ControllerConfig};
use serde::{Deserialize, Serialize};

/// Where route declarations and backend targets are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Store {
    #[cfg(feature = "fs")]
    File(PathBuf),
    #[cfg(feature = "k8s")]
    K8s,
    /// A fixed resource listing, empty without a file.
    Memory(Option<PathBuf>),
}

impl FromStr for Store {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((kind, resource)) = s.split_once(':') else {
            return Err("missing store kind".to_string());
        };
        match kind {
            "file" => {
                #[cfg(feature = "fs")]
                {
                    Ok(Store::File(PathBuf::from(resource)))
                }
                #[cfg(not(feature = "fs"))]
                {
                    Err(format!("store kind {kind} not enabled, please select a correct build"))
                }
            }
            "k8s" => {
                #[cfg(feature = "k8s")]
                {
                    Ok(Store::K8s)
                }
                #[cfg(not(feature = "k8s"))]
                {
                    Err(format!("store kind {kind} not enabled, please select a correct build"))
                }
            }
            "memory" => Ok(Store::Memory((!resource.is_empty()).then(|| PathBuf::from(resource)))),
            _ => Err(format!("unknown store kind: {kind}")),
        }
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "fs")]
            Store::File(path) => write!(f, "file:{}", path.display()),
            #[cfg(feature = "k8s")]
            Store::K8s => write!(f, "k8s:"),
            Store::Memory(path) => write!(f, "memory:{}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()),
        }
    }
}

impl Serialize for Store {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Store {
    fn deserialize<D>(deserializer: D) -> Result<Store, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Store::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// nsgate start up arguments
#[derive(Debug, Serialize, Deserialize, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// The resource store
    ///
    /// # Example
    /// ## File
    /// `-s file:/path/to/dir`
    /// ## K8s
    /// `-s k8s:`
    /// ## Memory
    /// `-s memory:/path/to/resources.json`
    #[arg(short, long, env = "NSGATE_STORE")]
    pub store: Store,
    /// Controller config file, `.toml` or `.json`
    #[arg(short, long, env = "NSGATE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Only watch these namespaces, comma separated
    #[arg(long, env = "NSGATE_NAMESPACES", value_delimiter = ',')]
    pub namespaces: Option<Vec<String>>,
    #[arg(long, env = "NSGATE_INGRESS_CLASS")]
    pub ingress_class: Option<String>,
    #[arg(long, env = "NSGATE_RESYNC_INTERVAL_SECS")]
    pub resync_interval_secs: Option<u64>,
    #[arg(long, env = "NSGATE_BACKOFF_CEILING_SECS")]
    pub backoff_ceiling_secs: Option<u64>,
    #[arg(long, env = "NSGATE_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
    /// Render and log configurations without touching the proxy
    #[arg(long, env = "NSGATE_DRY_RUN")]
    pub dry_run: bool,
}

impl Args {
    /// The config file, if any, with the command line overrides on top.
    pub fn controller_config(&self) -> Result<ControllerConfig, BoxError> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)?,
            None => ControllerConfig::default(),
        };
        if let Some(namespaces) = &self.namespaces {
            config.scope.namespaces = NamespaceSelector::only(namespaces.iter().map(|ns| ns.trim()).filter(|ns| !ns.is_empty()));
        }
        if let Some(class) = &self.ingress_class {
            config.scope.ingress_class.clone_from(class);
        }
        if let Some(secs) = self.resync_interval_secs {
            config.scope.resync_interval_secs = secs;
        }
        if let Some(secs) = self.backoff_ceiling_secs {
            config.scope.backoff.ceiling_ms = secs.saturating_mul(1000);
        }
        if self.metrics_addr.is_some() {
            config.metrics_addr = self.metrics_addr;
        }
        Ok(config)
    }
}
