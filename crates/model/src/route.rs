use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{ObjectKey, ObjectMeta, ObjectRef, RefKind};

/// A namespace-scoped set of routing rules (host/path → backend).
///
/// Reference: [Kubernetes Ingress](https://kubernetes.io/docs/reference/kubernetes-api/service-resources/ingress-v1/)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDeclaration {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    /// Ingress class selector, `None` for a classless declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
    #[serde(default)]
    pub rules: Vec<RouteRule>,
    /// Catch-all backend, equivalent to a wildcard-host rule with `Prefix /`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<BackendRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsRef>,
}

impl RouteDeclaration {
    pub fn new(meta: ObjectMeta) -> Self {
        Self {
            meta,
            ingress_class: None,
            rules: Vec::new(),
            default_backend: None,
            tls: Vec::new(),
        }
    }
    pub fn key(&self) -> ObjectKey {
        self.meta.key()
    }
    pub fn rule(mut self, rule: RouteRule) -> Self {
        self.rules.push(rule);
        self
    }
    pub fn tls(mut self, tls: TlsRef) -> Self {
        self.tls.push(tls);
        self
    }
    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.ingress_class = Some(class.into());
        self
    }
    /// Every backend reference in declaration order, the default backend last.
    pub fn backend_refs(&self) -> impl Iterator<Item = &BackendRef> {
        self.rules.iter().flat_map(|rule| rule.paths.iter().map(|p| &p.backend)).chain(self.default_backend.iter())
    }
}

/// Paths matched for one host; `host: None` matches every host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RouteRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub paths: Vec<HttpPath>,
}

impl RouteRule {
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            paths: Vec::new(),
        }
    }
    pub fn any_host() -> Self {
        Self::default()
    }
    pub fn path(mut self, path: HttpPath) -> Self {
        self.paths.push(path);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpPath {
    pub path: String,
    #[serde(default)]
    pub path_type: PathType,
    pub backend: BackendRef,
}

impl HttpPath {
    pub fn prefix(path: impl Into<String>, backend: BackendRef) -> Self {
        Self {
            path: path.into(),
            path_type: PathType::Prefix,
            backend,
        }
    }
    pub fn exact(path: impl Into<String>, backend: BackendRef) -> Self {
        Self {
            path: path.into(),
            path_type: PathType::Exact,
            backend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum PathType {
    Exact,
    #[default]
    Prefix,
}

impl Display for PathType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathType::Exact => write!(f, "Exact"),
            PathType::Prefix => write!(f, "Prefix"),
        }
    }
}

/// Reference to a backend target.
///
/// `namespace` is `None` for a plain, implicitly local reference. A reference
/// explicitly tagged with another namespace is a cross-namespace reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub port: PortRef,
}

impl BackendRef {
    pub fn new(name: impl Into<String>, port: impl Into<PortRef>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            port: port.into(),
        }
    }
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
    /// Resolve against the namespace of the owning declaration.
    pub fn resolve(&self, owner_namespace: &str) -> ObjectRef {
        ObjectRef {
            kind: RefKind::Backend,
            namespace: self.namespace.clone().unwrap_or_else(|| owner_namespace.to_string()),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

impl From<u16> for PortRef {
    fn from(value: u16) -> Self {
        PortRef::Number(value)
    }
}

impl From<&str> for PortRef {
    fn from(value: &str) -> Self {
        PortRef::Name(value.to_string())
    }
}

impl Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRef::Number(port) => write!(f, "{port}"),
            PortRef::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Reference to TLS material. Empty `hosts` means every host of the declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TlsRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

impl TlsRef {
    pub fn new(secret_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            secret_name: secret_name.into(),
            hosts: Vec::new(),
        }
    }
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
    pub fn for_host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }
    pub fn resolve(&self, owner_namespace: &str) -> ObjectRef {
        ObjectRef {
            kind: RefKind::TlsSecret,
            namespace: self.namespace.clone().unwrap_or_else(|| owner_namespace.to_string()),
            name: self.secret_name.clone(),
        }
    }
}
