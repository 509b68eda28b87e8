use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
};

use nsgate_config::{constants, BoxError, ControllerScope, FatalConfigurationError};
use nsgate_kernel::dataplane::{FileEngineConfig, RenderFormat};
use serde::{Deserialize, Serialize};

/// Everything the controller reads at startup.
///
/// ```toml
/// metrics_addr = "0.0.0.0:9913"
///
/// [scope]
/// namespaces = { only = ["production", "staging"] }
/// ingress_class = "nsgate"
///
/// [dataplane]
/// format = "nginx"
/// config_path = "/etc/nginx/conf.d/nsgate.conf"
/// test_command = ["nginx", "-t", "-c", "{config}"]
/// reload_command = ["nginx", "-s", "reload"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub scope: ControllerScope,
    pub dataplane: DataPlaneConfig,
    /// Where `/metrics` and `/healthz` are served, `None` to disable.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scope: ControllerScope::default(),
            dataplane: DataPlaneConfig::default(),
            metrics_addr: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), constants::DEFAULT_METRICS_PORT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DataPlaneConfig {
    pub format: RenderFormat,
    #[serde(flatten)]
    pub engine: FileEngineConfig,
}

impl ControllerConfig {
    /// Read a `.json` or `.toml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BoxError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| format!("fail to read {path:?}: {e}"))?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => toml::from_str(&text)?,
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FatalConfigurationError> {
        self.scope.validate()?;
        if self.dataplane.engine.config_path.as_os_str().is_empty() {
            return Err(FatalConfigurationError::Invalid("data plane config path is empty".into()));
        }
        Ok(())
    }
}
