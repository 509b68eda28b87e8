use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use nsgate_model::ReloadError;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ProxyEngine, RenderedConfig};

/// Placeholder replaced with the candidate file path in `test_command`.
pub const CONFIG_PLACEHOLDER: &str = "{config}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileEngineConfig {
    /// File the proxy reads its configuration from.
    pub config_path: PathBuf,
    /// Validates a candidate file before it is activated, e.g. `["nginx", "-t", "-c", "{config}"]`.
    pub test_command: Option<Vec<String>>,
    /// Makes the proxy pick up the active file, e.g. `["nginx", "-s", "reload"]`.
    pub reload_command: Option<Vec<String>>,
    pub command_timeout_ms: u64,
}

impl Default for FileEngineConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/nginx/conf.d/nsgate.conf"),
            test_command: None,
            reload_command: None,
            command_timeout_ms: 10_000,
        }
    }
}

/// Programs a proxy that reads its configuration from a file.
///
/// The candidate is written next to the target, tested, and renamed into place,
/// then the proxy is told to reload. If the reload fails the previous file is put back.
#[derive(Debug, Clone)]
pub struct FileEngine {
    config: FileEngineConfig,
}

impl FileEngine {
    pub fn new(config: FileEngineConfig) -> Self {
        Self { config }
    }

    fn candidate_path(&self) -> PathBuf {
        let mut name = self.config.config_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".next");
        self.config.config_path.with_file_name(name)
    }

    async fn run(&self, command: &[String], candidate: &Path) -> Result<(), ReloadError> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };
        let args = args.iter().map(|arg| arg.replace(CONFIG_PLACEHOLDER, &candidate.to_string_lossy()));
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        debug!("[NG.DataPlane] run {command:?}");
        let timeout = Duration::from_millis(self.config.command_timeout_ms);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| ReloadError::new(format!("`{program}` timed out after {timeout:?}")))?
            .map_err(|e| ReloadError::new(format!("fail to run `{program}`: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ReloadError::new(format!("`{program}` exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim())))
        }
    }

    async fn restore(&self, previous: Option<Vec<u8>>) {
        let path = &self.config.config_path;
        let result = match previous {
            Some(bytes) => tokio::fs::write(path, bytes).await,
            None => tokio::fs::remove_file(path).await,
        };
        if let Err(e) = result {
            warn!("[NG.DataPlane] fail to restore {path:?}: {e}");
        }
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> ReloadError {
    ReloadError::new(format!("fail to {action} {path:?}: {e}"))
}

impl ProxyEngine for FileEngine {
    async fn apply(&self, config: &RenderedConfig) -> Result<(), ReloadError> {
        let target = &self.config.config_path;
        let candidate = self.candidate_path();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error("create", parent, e))?;
        }
        tokio::fs::write(&candidate, &config.bytes).await.map_err(|e| io_error("write", &candidate, e))?;
        if let Some(test) = &self.config.test_command {
            if let Err(e) = self.run(test, &candidate).await {
                let _ = tokio::fs::remove_file(&candidate).await;
                return Err(e);
            }
        }
        let previous = match tokio::fs::read(target).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_error("read", target, e)),
        };
        tokio::fs::rename(&candidate, target).await.map_err(|e| io_error("activate", target, e))?;
        if let Some(reload) = &self.config.reload_command {
            if let Err(e) = self.run(reload, target).await {
                self.restore(previous).await;
                return Err(e);
            }
        }
        Ok(())
    }
}
