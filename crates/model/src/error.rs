//! Error taxonomy of the controller.
//!
//! | Error                        | Scope  | Handling                                    |
//! |:-----------------------------|:-------|:--------------------------------------------|
//! | [`ValidationError`]          | object | declaration excluded, status condition set  |
//! | [`ReloadError`]              | system | last good config kept, backoff and retry    |
//! | [`WatchDisconnectedError`]   | system | full relist and diff                        |
//! | [`FatalConfigurationError`]  | start  | process refuses to start                    |
use thiserror::Error;

use crate::{ObjectKey, ObjectRef, PathType, RejectReason};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{owner} references {reference} outside its own namespace")]
    CrossNamespaceReference { owner: ObjectKey, reference: ObjectRef },
    #[error(transparent)]
    Structural(#[from] StructuralError),
}

impl ValidationError {
    pub fn reason(&self) -> RejectReason {
        match self {
            ValidationError::CrossNamespaceReference { .. } => RejectReason::CrossNamespaceReference,
            ValidationError::Structural(_) => RejectReason::StructuralValidation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("host must not be empty, use `*` to match every host")]
    EmptyHost,
    #[error("invalid host `{0}`")]
    InvalidHost(String),
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("{path_type} path `{path}` is declared more than once for host `{host}`")]
    OverlappingPaths { host: String, path: String, path_type: PathType },
    #[error("declaration has no paths")]
    NoRules,
    #[error("backend reference has no service name")]
    MissingServiceName,
    #[error("invalid {kind} name `{name}`")]
    InvalidName { kind: &'static str, name: String },
    #[error("backend `{0}` not found")]
    BackendNotFound(ObjectKey),
    #[error("backend `{backend}` has no port `{port}`")]
    InvalidPort { backend: ObjectKey, port: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("data plane reload failed: {reason}")]
pub struct ReloadError {
    pub reason: String,
}

impl ReloadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("watch disconnected: {reason}")]
pub struct WatchDisconnectedError {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalConfigurationError {
    #[error("namespace allow-list is empty")]
    EmptyNamespaceAllowList,
    #[error("`{0}` is not a valid namespace name")]
    InvalidNamespace(String),
    #[error("ingress class must not be empty")]
    EmptyIngressClass,
    #[error("resync interval must be greater than zero")]
    ZeroResyncInterval,
    #[error("invalid backoff: initial {initial_ms}ms, ceiling {ceiling_ms}ms, multiplier {multiplier}")]
    InvalidBackoff { initial_ms: u64, ceiling_ms: u64, multiplier: f64 },
    #[error("relist failure threshold must be greater than zero")]
    ZeroRelistFailureThreshold,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
