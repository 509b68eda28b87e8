use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{ObjectKey, ObjectMeta, PortRef};

/// A namespace-scoped logical service: a port set and the endpoints currently
/// reachable behind it. Endpoint membership is owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendTarget {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
}

impl BackendTarget {
    pub fn new(meta: ObjectMeta) -> Self {
        Self {
            meta,
            ports: Vec::new(),
            endpoints: Vec::new(),
        }
    }
    pub fn key(&self) -> ObjectKey {
        self.meta.key()
    }
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(ServicePort { name: None, port });
        self
    }
    pub fn named_port(mut self, name: impl Into<String>, port: u16) -> Self {
        self.ports.push(ServicePort { name: Some(name.into()), port });
        self
    }
    pub fn endpoint(mut self, ip: IpAddr) -> Self {
        self.endpoints.push(ip);
        self
    }
    /// Find the port number a [`PortRef`] designates.
    pub fn resolve_port(&self, port: &PortRef) -> Option<u16> {
        match port {
            PortRef::Number(number) => self.ports.iter().find(|p| p.port == *number).map(|p| p.port),
            PortRef::Name(name) => self.ports.iter().find(|p| p.name.as_deref() == Some(name.as_str())).map(|p| p.port),
        }
    }
}
