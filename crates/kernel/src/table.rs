//! # Route Table
//!
//! An immutable snapshot of every accepted route, grouped per host.
//!
//! ## Entry order within a host
//!
//! | Priority | Rule                                  |
//! |:--------:|:--------------------------------------|
//! |  0       | longer literal path                   |
//! |  1       | `Exact` before `Prefix`               |
//! |  2       | earlier declaration creation time     |
//! |  3       | declaration namespace and name        |
//!
//! Two entries with the same path and path type never coexist: the first one
//! in this order wins and the other is recorded as shadowed.
use std::{collections::BTreeMap, sync::Arc};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use nsgate_model::{constants, ObjectKey};

use crate::{
    hostname::HostnameTree,
    validate::{PathMatch, ResolvedBackend},
};

mod builder;
pub use builder::RouteTableBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub path: PathMatch,
    pub backend: ResolvedBackend,
    pub owner: ObjectKey,
    pub owner_created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedEntry {
    pub path: PathMatch,
    pub owner: ObjectKey,
    pub winner: ObjectKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsBinding {
    pub secret: ObjectKey,
    pub owner: ObjectKey,
}

/// Routing of one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRoutes {
    pub host: String,
    /// Ordered, the first matching entry wins.
    pub entries: Vec<TableEntry>,
    pub shadowed: Vec<ShadowedEntry>,
    pub tls: Option<TlsBinding>,
    /// Declarations whose TLS material for this host lost.
    pub tls_conflicts: Vec<ObjectKey>,
}

impl HostRoutes {
    pub fn find(&self, path: &str) -> Option<&TableEntry> {
        self.entries.iter().find(|entry| entry.path.matches(path))
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    version: u64,
    hosts: BTreeMap<String, Arc<HostRoutes>>,
    tree: HostnameTree<Arc<HostRoutes>>,
}

impl RouteTable {
    pub(crate) fn new(version: u64, hosts: BTreeMap<String, Arc<HostRoutes>>) -> Self {
        let mut tree = HostnameTree::new();
        for (host, routes) in &hosts {
            tree.set(host, routes.clone());
        }
        Self { version, hosts, tree }
    }
    /// Bumped whenever a build produced different routing.
    pub fn version(&self) -> u64 {
        self.version
    }
    pub fn hosts(&self) -> &BTreeMap<String, Arc<HostRoutes>> {
        &self.hosts
    }
    pub fn host(&self, host: &str) -> Option<&Arc<HostRoutes>> {
        self.hosts.get(host)
    }
    /// Route a request: the exact host first, then partial wildcards, then the catch-all host.
    pub fn lookup(&self, host: &str, path: &str) -> Option<&TableEntry> {
        self.tree.candidates(host).into_iter().find_map(|routes| routes.find(path))
    }
    /// Host routes a request host falls back to, most specific first, the host itself excluded.
    pub fn fallbacks<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a Arc<HostRoutes>> + 'a {
        self.tree.candidates(host).into_iter().filter(move |routes| routes.host != host)
    }
    /// Every `(host, entry)` in host order, entries in match order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &TableEntry)> {
        self.hosts.iter().flat_map(|(host, routes)| routes.entries.iter().map(move |entry| (host.as_str(), entry)))
    }
    pub fn len(&self) -> usize {
        self.hosts.values().map(|routes| routes.entries.len()).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// `host` + `path` of every entry of `owner` that lost to another declaration.
    pub fn shadowed_paths(&self, owner: &ObjectKey) -> Vec<String> {
        self.hosts
            .values()
            .flat_map(|routes| routes.shadowed.iter().filter(|s| &s.owner == owner).map(|s| format_host_path(&routes.host, &s.path.path)))
            .collect()
    }
    /// Hosts where the TLS material of `owner` lost to another declaration.
    pub fn tls_conflicts(&self, owner: &ObjectKey) -> Vec<String> {
        self.hosts.values().filter(|routes| routes.tls_conflicts.contains(owner)).map(|routes| routes.host.clone()).collect()
    }
    /// Declarations that own at least one entry.
    pub fn owners(&self) -> std::collections::BTreeSet<&ObjectKey> {
        self.entries().map(|(_, entry)| &entry.owner).collect()
    }
}

fn format_host_path(host: &str, path: &str) -> String {
    if host == constants::WILDCARD_HOST {
        path.to_string()
    } else {
        format!("{host}{path}")
    }
}

/// Latest published snapshot, readable from any thread without blocking the writer.
#[derive(Debug)]
pub struct SnapshotCell {
    inner: ArcSwap<RouteTable>,
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self {
            inner: ArcSwap::from_pointee(RouteTable::default()),
        }
    }
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn load(&self) -> Arc<RouteTable> {
        self.inner.load_full()
    }
    pub fn publish(&self, table: Arc<RouteTable>) {
        self.inner.store(table);
    }
}
