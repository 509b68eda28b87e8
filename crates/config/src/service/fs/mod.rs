use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

pub mod model;
use nsgate_model::{BackendTarget, BoxError, BoxResult, ControllerScope, ObjectKey, Resource, ResourceId, ResourceKind, RouteDeclaration};

use crate::service::config_format::ConfigFormat;
use model::{BackendFile, RouteFile};

pub const ROUTE_DIR: &str = "ingress";
pub const BACKEND_DIR: &str = "service";
pub const STATUS_DIR: &str = "status";

/// # Filesystem Resource Store
///
/// ## Structure
/// ``` no_rust
/// |- production/
/// |  |- ingress/
/// |  |  |- api-ingress.json
/// |  |- service/
/// |  |  |- api-service.json
/// |  |- status/
/// |  |  |- api-ingress.json
/// |- staging/
/// |  |- ...
/// ```
///
/// The namespace and name of an object come from its path. `uid`, `generation`
/// and `creation_timestamp` may be written in the file, otherwise they are
/// derived from the path and the modification time.
#[derive(Debug, Clone)]
pub struct Fs<F> {
    pub dir: Arc<Path>,
    pub format: F,
}

impl<F> Fs<F>
where
    F: ConfigFormat,
{
    pub fn new<P: AsRef<Path>>(dir: P, format: F) -> Self {
        Self {
            dir: Arc::from(dir.as_ref().to_owned()),
            format,
        }
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.dir.join(namespace)
    }
    pub fn kind_dir(&self, namespace: &str, kind: ResourceKind) -> PathBuf {
        let sub = match kind {
            ResourceKind::Route => ROUTE_DIR,
            ResourceKind::Backend => BACKEND_DIR,
        };
        self.namespace_dir(namespace).join(sub)
    }
    pub fn resource_path(&self, id: &ResourceId) -> PathBuf {
        self.kind_dir(&id.key.namespace, id.kind).join(&id.key.name).with_extension(self.format.extension())
    }
    pub fn status_path(&self, key: &ObjectKey) -> PathBuf {
        self.namespace_dir(&key.namespace).join(STATUS_DIR).join(&key.name).with_extension(self.format.extension())
    }

    /// Which object a path under the store directory holds, if any.
    pub fn extract_resource_id(&self, path: &Path) -> Option<ResourceId> {
        let relative = path.strip_prefix(&self.dir).ok()?;
        let mut components = relative.iter().map(OsStr::to_str);
        let namespace = components.next()??;
        let kind = match components.next()?? {
            ROUTE_DIR => ResourceKind::Route,
            BACKEND_DIR => ResourceKind::Backend,
            _ => return None,
        };
        let file = Path::new(components.next()??);
        if components.next().is_some() || file.extension()? != self.format.extension() {
            return None;
        }
        let name = file.file_stem()?.to_str()?;
        Some(ResourceId {
            kind,
            key: ObjectKey::new(namespace, name),
        })
    }

    pub fn decode(&self, id: &ResourceId, path: &Path, bytes: &[u8], modified: SystemTime) -> BoxResult<Resource> {
        Ok(match id.kind {
            ResourceKind::Route => Resource::Route(self.format.de::<RouteFile>(bytes)?.into_route(id.key.clone(), path, modified)),
            ResourceKind::Backend => Resource::Backend(self.format.de::<BackendFile>(bytes)?.into_backend(id.key.clone(), path, modified)),
        })
    }

    /// Read one object, `None` when the file does not exist.
    pub fn read_blocking(&self, id: &ResourceId) -> BoxResult<Option<Resource>> {
        let path = self.resource_path(id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = std::fs::metadata(&path)?.modified()?;
        self.decode(id, &path, &bytes, modified).map(Some)
    }

    pub async fn read(&self, id: &ResourceId) -> BoxResult<Option<Resource>> {
        let path = self.resource_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = tokio::fs::metadata(&path).await?.modified()?;
        self.decode(id, &path, &bytes, modified).map(Some)
    }

    /// Namespaces present in the store directory and selected by the scope.
    pub async fn namespaces(&self, scope: &ControllerScope) -> BoxResult<Vec<String>> {
        let mut namespaces = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(namespace) = entry.file_name().into_string() else {
                continue;
            };
            if scope.selects(&namespace) {
                namespaces.push(namespace);
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    pub async fn list_kind(&self, scope: &ControllerScope, kind: ResourceKind) -> BoxResult<Vec<Resource>> {
        let mut resources = Vec::new();
        let ext = self.format.extension();
        for namespace in self.namespaces(scope).await? {
            let dir_path = self.kind_dir(&namespace, kind);
            let mut dir = match tokio::fs::read_dir(&dir_path).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = dir.next_entry().await? {
                let path = entry.path();
                if path.extension() != Some(ext) {
                    continue;
                }
                let Some(id) = self.extract_resource_id(&path) else { continue };
                match self.read(&id).await {
                    Ok(Some(resource)) => resources.push(resource),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("[NG.Config] skip unreadable file {path:?}: {e}"),
                }
            }
        }
        Ok(resources)
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> BoxResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn save_route(&self, route: RouteDeclaration) -> BoxResult<()> {
        let path = self.resource_path(&ResourceId::route(route.key()));
        let bytes = self.format.ser(&RouteFile::from(route))?;
        self.write_atomic(&path, &bytes).await
    }

    pub async fn save_backend(&self, backend: BackendTarget) -> BoxResult<()> {
        let path = self.resource_path(&ResourceId::backend(backend.key()));
        let bytes = self.format.ser(&BackendFile::from(backend))?;
        self.write_atomic(&path, &bytes).await
    }

    pub async fn remove(&self, id: &ResourceId) -> BoxResult<()> {
        tokio::fs::remove_file(self.resource_path(id)).await.map_err(BoxError::from)
    }
}

mod listen;
mod retrieve;
mod update;
pub use listen::FsListener;
