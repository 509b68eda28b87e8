use std::{path::Path, time::SystemTime};

use chrono::{DateTime, Utc};
use nsgate_model::{BackendRef, BackendTarget, ObjectKey, ObjectMeta, RouteDeclaration, RouteRule, ServicePort, TlsRef};
use serde::{Deserialize, Serialize};

/// Metadata a file may carry. Whatever is missing is derived from the file itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl FileMeta {
    fn into_meta(self, key: ObjectKey, path: &Path, modified: SystemTime) -> ObjectMeta {
        let modified = DateTime::<Utc>::from(modified);
        ObjectMeta {
            namespace: key.namespace,
            name: key.name,
            uid: self.uid.unwrap_or_else(|| path.to_string_lossy().into_owned()),
            generation: self.generation.unwrap_or_else(|| modified.timestamp_millis()),
            creation_timestamp: self.creation_timestamp.unwrap_or(modified),
        }
    }
}

/// `<dir>/<namespace>/ingress/<name>.<ext>`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteFile {
    #[serde(flatten)]
    pub meta: FileMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
    pub rules: Vec<RouteRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<BackendRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsRef>,
}

impl RouteFile {
    pub fn into_route(self, key: ObjectKey, path: &Path, modified: SystemTime) -> RouteDeclaration {
        RouteDeclaration {
            meta: self.meta.into_meta(key, path, modified),
            ingress_class: self.ingress_class,
            rules: self.rules,
            default_backend: self.default_backend,
            tls: self.tls,
        }
    }
}

impl From<RouteDeclaration> for RouteFile {
    fn from(route: RouteDeclaration) -> Self {
        RouteFile {
            meta: FileMeta {
                uid: Some(route.meta.uid),
                generation: Some(route.meta.generation),
                creation_timestamp: Some(route.meta.creation_timestamp),
            },
            ingress_class: route.ingress_class,
            rules: route.rules,
            default_backend: route.default_backend,
            tls: route.tls,
        }
    }
}

/// `<dir>/<namespace>/service/<name>.<ext>`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendFile {
    #[serde(flatten)]
    pub meta: FileMeta,
    pub ports: Vec<ServicePort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<std::net::IpAddr>,
}

impl BackendFile {
    pub fn into_backend(self, key: ObjectKey, path: &Path, modified: SystemTime) -> BackendTarget {
        BackendTarget {
            meta: self.meta.into_meta(key, path, modified),
            ports: self.ports,
            endpoints: self.endpoints,
        }
    }
}

impl From<BackendTarget> for BackendFile {
    fn from(backend: BackendTarget) -> Self {
        BackendFile {
            meta: FileMeta {
                uid: Some(backend.meta.uid),
                generation: Some(backend.meta.generation),
                creation_timestamp: Some(backend.meta.creation_timestamp),
            },
            ports: backend.ports,
            endpoints: backend.endpoints,
        }
    }
}
