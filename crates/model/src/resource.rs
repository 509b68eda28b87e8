use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{BackendTarget, ObjectKey, ObjectMeta, RouteDeclaration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Route,
    Backend,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Route, ResourceKind::Backend];
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Route => "route",
            ResourceKind::Backend => "backend",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub key: ObjectKey,
}

impl ResourceId {
    pub fn route(key: ObjectKey) -> Self {
        Self { kind: ResourceKind::Route, key }
    }
    pub fn backend(key: ObjectKey) -> Self {
        Self { kind: ResourceKind::Backend, key }
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "object")]
pub enum Resource {
    Route(RouteDeclaration),
    Backend(BackendTarget),
}

impl Resource {
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Resource::Route(route) => &route.meta,
            Resource::Backend(backend) => &backend.meta,
        }
    }
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Route(_) => ResourceKind::Route,
            Resource::Backend(_) => ResourceKind::Backend,
        }
    }
    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.kind(),
            key: self.meta().key(),
        }
    }
    pub fn generation(&self) -> i64 {
        self.meta().generation
    }
    pub fn uid(&self) -> &str {
        &self.meta().uid
    }
    /// Same object at the same version.
    pub fn same_version(&self, other: &Resource) -> bool {
        self.kind() == other.kind() && self.uid() == other.uid() && self.generation() == other.generation()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change of one watched object, always carrying the full object.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    pub object: Resource,
}

impl ResourceEvent {
    pub fn added(object: Resource) -> Self {
        Self { kind: EventKind::Added, object }
    }
    pub fn modified(object: Resource) -> Self {
        Self { kind: EventKind::Modified, object }
    }
    pub fn deleted(object: Resource) -> Self {
        Self { kind: EventKind::Deleted, object }
    }
    pub fn id(&self) -> ResourceId {
        self.object.id()
    }
}
