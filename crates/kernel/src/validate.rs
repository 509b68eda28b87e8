//! # Namespace-Scoped Validation
//!
//! A declaration may only reach objects of its own namespace. References are
//! checked before anything else about the declaration is looked at, so a
//! declaration pointing into another namespace never gets as far as a backend
//! lookup there.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    net::IpAddr,
};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use nsgate_model::{constants, is_dns_label, BackendRef, BackendTarget, ObjectKey, PathType, RouteDeclaration, StructuralError, ValidationError};
use regex::Regex;

lazy_static! {
    static ref DNS_1123_SUBDOMAIN: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("invalid dns subdomain regex");
    /// RFC 3986 path characters without `;` and `$`, which the proxy configuration gives a meaning.
    static ref PATH_CHARS: Regex = Regex::new(r"^/([A-Za-z0-9\-._~!&'()*+,=:@/]|%[0-9A-Fa-f]{2})*$").expect("invalid path regex");
}

/// Backends visible to the validator.
pub trait BackendLookup {
    fn backend(&self, key: &ObjectKey) -> Option<&BackendTarget>;
}

impl BackendLookup for BTreeMap<ObjectKey, BackendTarget> {
    fn backend(&self, key: &ObjectKey) -> Option<&BackendTarget> {
        self.get(key)
    }
}

impl BackendLookup for HashMap<ObjectKey, BackendTarget> {
    fn backend(&self, key: &ObjectKey) -> Option<&BackendTarget> {
        self.get(key)
    }
}

impl BackendLookup for [BackendTarget] {
    fn backend(&self, key: &ObjectKey) -> Option<&BackendTarget> {
        self.iter().find(|backend| &backend.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathMatch {
    pub path: String,
    pub path_type: PathType,
}

impl PathMatch {
    /// Exact compares the whole path. Prefix matches whole path segments,
    /// so `/v1` matches `/v1` and `/v1/users` but not `/v10`.
    pub fn matches(&self, path: &str) -> bool {
        match self.path_type {
            PathType::Exact => self.path == path,
            PathType::Prefix => {
                let prefix = self.path.trim_end_matches('/');
                prefix.is_empty() || path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
    /// Length used to rank entries, longer is more specific.
    pub fn specificity(&self) -> usize {
        self.path.len()
    }
    /// Every request `other` matches is matched by `self` too.
    pub fn covers(&self, other: &PathMatch) -> bool {
        match self.path_type {
            PathType::Exact => other.path_type == PathType::Exact && self.path == other.path,
            PathType::Prefix => self.matches(&other.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub service: ObjectKey,
    pub port: u16,
    pub endpoints: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Lower-cased host, `*` for every host.
    pub host: String,
    pub path: PathMatch,
    pub backend: ResolvedBackend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTls {
    pub secret: ObjectKey,
    pub hosts: Vec<String>,
}

/// A declaration that passed validation, with every reference resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRoute {
    pub key: ObjectKey,
    pub uid: String,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<RouteEntry>,
    pub tls: Vec<ResolvedTls>,
}

impl ValidatedRoute {
    /// Every host this declaration contributes to, through entries or TLS.
    pub fn hosts(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.host.as_str()).chain(self.tls.iter().flat_map(|t| t.hosts.iter().map(String::as_str))).collect()
    }
    pub fn backends(&self) -> BTreeSet<&ObjectKey> {
        self.entries.iter().map(|e| &e.backend.service).collect()
    }
    pub fn tls_secret_for(&self, host: &str) -> Option<&ObjectKey> {
        self.tls.iter().find(|tls| tls.hosts.iter().any(|h| h == host)).map(|tls| &tls.secret)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a declaration against the backends of its namespace.
    ///
    /// # Errors
    /// [`ValidationError::CrossNamespaceReference`] for the first reference
    /// leaving the declaration's namespace, otherwise the first structural defect.
    pub fn validate<L>(&self, route: &RouteDeclaration, backends: &L) -> Result<ValidatedRoute, ValidationError>
    where
        L: BackendLookup + ?Sized,
    {
        check_references(route)?;
        let namespace = &route.meta.namespace;
        if !is_dns_label(namespace) {
            return Err(StructuralError::InvalidName {
                kind: "namespace",
                name: namespace.clone(),
            }
            .into());
        }
        let mut entries = Vec::new();
        let mut seen = BTreeSet::new();
        let default_rule = route.default_backend.as_ref().map(|backend| (None, constants::DEFAULT_PATH, PathType::Prefix, backend));
        let paths = route.rules.iter().flat_map(|rule| rule.paths.iter().map(move |p| (rule.host.as_deref(), p.path.as_str(), p.path_type, &p.backend))).chain(default_rule);
        for (host, path, path_type, backend) in paths {
            let host = normalize_host(host)?;
            check_path(path)?;
            let path = normalize_path(path, path_type);
            if !seen.insert((host.clone(), path.clone(), path_type)) {
                return Err(StructuralError::OverlappingPaths { host, path, path_type }.into());
            }
            entries.push(RouteEntry {
                host,
                path: PathMatch { path, path_type },
                backend: resolve_backend(namespace, backend, backends)?,
            });
        }
        if entries.is_empty() {
            return Err(StructuralError::NoRules.into());
        }
        let declared_hosts: Vec<String> = entries.iter().map(|e| e.host.clone()).filter(|h| h != constants::WILDCARD_HOST).collect::<BTreeSet<_>>().into_iter().collect();
        let mut tls = Vec::new();
        for tls_ref in &route.tls {
            if tls_ref.secret_name.len() > 253 || !DNS_1123_SUBDOMAIN.is_match(&tls_ref.secret_name) {
                return Err(StructuralError::InvalidName {
                    kind: "secret",
                    name: tls_ref.secret_name.clone(),
                }
                .into());
            }
            let hosts = if tls_ref.hosts.is_empty() {
                declared_hosts.clone()
            } else {
                tls_ref.hosts.iter().map(|h| normalize_host(Some(h.as_str()))).collect::<Result<Vec<_>, _>>()?
            };
            tls.push(ResolvedTls {
                secret: ObjectKey::new(namespace.clone(), tls_ref.secret_name.clone()),
                hosts,
            });
        }
        Ok(ValidatedRoute {
            key: route.key(),
            uid: route.meta.uid.clone(),
            generation: route.meta.generation,
            created_at: route.meta.creation_timestamp,
            entries,
            tls,
        })
    }
}

fn check_references(route: &RouteDeclaration) -> Result<(), ValidationError> {
    let namespace = &route.meta.namespace;
    let references = route.backend_refs().map(|backend| backend.resolve(namespace)).chain(route.tls.iter().map(|tls| tls.resolve(namespace)));
    for reference in references {
        if &reference.namespace != namespace {
            return Err(ValidationError::CrossNamespaceReference { owner: route.key(), reference });
        }
    }
    Ok(())
}

fn normalize_host(host: Option<&str>) -> Result<String, StructuralError> {
    let Some(host) = host else {
        return Ok(constants::WILDCARD_HOST.to_string());
    };
    if host.is_empty() {
        return Err(StructuralError::EmptyHost);
    }
    let host = host.to_ascii_lowercase();
    let name = host.strip_prefix("*.").unwrap_or(&host);
    if host == constants::WILDCARD_HOST || (name.len() <= 253 && DNS_1123_SUBDOMAIN.is_match(name)) {
        Ok(host)
    } else {
        Err(StructuralError::InvalidHost(host))
    }
}

fn check_path(path: &str) -> Result<(), StructuralError> {
    let invalid = |reason| StructuralError::InvalidPath { path: path.to_string(), reason };
    if !path.starts_with('/') {
        return Err(invalid("must start with `/`"));
    }
    if path.contains("//") {
        return Err(invalid("must not contain `//`"));
    }
    if !PATH_CHARS.is_match(path) {
        return Err(invalid("only unreserved, percent-encoded and `!&'()*+,=:@` characters are allowed"));
    }
    Ok(())
}

/// `/v1/` and `/v1` match the same requests as a prefix, keep the latter.
fn normalize_path(path: &str, path_type: PathType) -> String {
    match path_type {
        PathType::Exact => path.to_string(),
        PathType::Prefix => match path.trim_end_matches('/') {
            "" => constants::DEFAULT_PATH.to_string(),
            trimmed => trimmed.to_string(),
        },
    }
}

fn resolve_backend<L>(namespace: &str, backend: &BackendRef, backends: &L) -> Result<ResolvedBackend, StructuralError>
where
    L: BackendLookup + ?Sized,
{
    if backend.name.is_empty() {
        return Err(StructuralError::MissingServiceName);
    }
    if !is_dns_label(&backend.name) {
        return Err(StructuralError::InvalidName {
            kind: "service",
            name: backend.name.clone(),
        });
    }
    let key = ObjectKey::new(namespace, backend.name.clone());
    let target = backends.backend(&key).ok_or_else(|| StructuralError::BackendNotFound(key.clone()))?;
    let port = target.resolve_port(&backend.port).ok_or_else(|| StructuralError::InvalidPort {
        backend: key.clone(),
        port: backend.port.to_string(),
    })?;
    Ok(ResolvedBackend {
        service: key,
        port,
        endpoints: target.endpoints.clone(),
    })
}
