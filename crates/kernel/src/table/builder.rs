use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use nsgate_model::{constants, ObjectKey, PathType};
use tracing::debug;

use super::{HostRoutes, RouteTable, ShadowedEntry, TableEntry, TlsBinding};
use crate::validate::ValidatedRoute;

/// Owns the accepted routes and produces [`RouteTable`] snapshots.
///
/// Only hosts touched since the last build are recomputed, other hosts are
/// shared with the previous snapshot. A touched wildcard host recomputes everything.
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: BTreeMap<ObjectKey, Arc<ValidatedRoute>>,
    host_index: BTreeMap<String, BTreeSet<ObjectKey>>,
    dirty: BTreeSet<String>,
    last: Arc<RouteTable>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&Arc<ValidatedRoute>> {
        self.routes.get(key)
    }
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.routes.contains_key(key)
    }
    pub fn last(&self) -> &Arc<RouteTable> {
        &self.last
    }

    pub fn upsert(&mut self, route: ValidatedRoute) {
        let key = route.key.clone();
        self.remove(&key);
        for host in route.hosts() {
            self.host_index.entry(host.to_string()).or_default().insert(key.clone());
            self.dirty.insert(host.to_string());
        }
        self.routes.insert(key, Arc::new(route));
    }

    pub fn remove(&mut self, key: &ObjectKey) -> Option<Arc<ValidatedRoute>> {
        let removed = self.routes.remove(key)?;
        for host in removed.hosts() {
            if let Some(owners) = self.host_index.get_mut(host) {
                owners.remove(key);
                if owners.is_empty() {
                    self.host_index.remove(host);
                }
            }
            self.dirty.insert(host.to_string());
        }
        Some(removed)
    }

    /// Build a snapshot. Returns the previous snapshot unchanged when routing did not change.
    pub fn build(&mut self) -> Arc<RouteTable> {
        if self.dirty.is_empty() {
            return self.last.clone();
        }
        let dirty = std::mem::take(&mut self.dirty);
        let full = dirty.iter().any(|host| host.starts_with('*'));
        let recompute: BTreeSet<String> = if full {
            self.host_index.keys().chain(self.last.hosts().keys()).cloned().collect()
        } else {
            dirty
        };
        let mut hosts = self.last.hosts().clone();
        let mut changed = false;
        for host in &recompute {
            match self.compute_host(host) {
                Some(routes) => {
                    if hosts.get(host).map(|old| old.as_ref()) != Some(&routes) {
                        hosts.insert(host.clone(), Arc::new(routes));
                        changed = true;
                    }
                }
                None => changed |= hosts.remove(host).is_some(),
            }
        }
        if !changed {
            debug!("[NG.Table] {} hosts recomputed, routing unchanged", recompute.len());
            return self.last.clone();
        }
        let version = self.last.version().wrapping_add(1);
        debug!("[NG.Table] build version {version}, {} hosts recomputed{}", recompute.len(), if full { " (full)" } else { "" });
        self.last = Arc::new(RouteTable::new(version, hosts));
        self.last.clone()
    }

    fn compute_host(&self, host: &str) -> Option<HostRoutes> {
        let owners = self.host_index.get(host)?;
        let routes: Vec<&Arc<ValidatedRoute>> = owners.iter().filter_map(|key| self.routes.get(key)).collect();
        let mut candidates: Vec<TableEntry> = routes
            .iter()
            .flat_map(|route| {
                route.entries.iter().filter(move |entry| entry.host == host).map(move |entry| TableEntry {
                    path: entry.path.clone(),
                    backend: entry.backend.clone(),
                    owner: route.key.clone(),
                    owner_created_at: route.created_at,
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.path
                .specificity()
                .cmp(&a.path.specificity())
                .then_with(|| path_type_rank(a.path.path_type).cmp(&path_type_rank(b.path.path_type)))
                .then_with(|| a.owner_created_at.cmp(&b.owner_created_at))
                .then_with(|| a.owner.cmp(&b.owner))
                .then_with(|| a.path.cmp(&b.path))
        });
        let mut entries: Vec<TableEntry> = Vec::with_capacity(candidates.len());
        let mut shadowed = Vec::new();
        for candidate in candidates {
            match entries.iter().find(|winner| winner.path == candidate.path) {
                Some(winner) => shadowed.push(ShadowedEntry {
                    path: candidate.path,
                    owner: candidate.owner,
                    winner: winner.owner.clone(),
                }),
                None => entries.push(candidate),
            }
        }
        let (tls, tls_conflicts) = select_tls(host, &routes, &entries);
        if entries.is_empty() && tls.is_none() {
            return None;
        }
        Some(HostRoutes {
            host: host.to_string(),
            entries,
            shadowed,
            tls,
            tls_conflicts,
        })
    }
}

fn path_type_rank(path_type: PathType) -> u8 {
    match path_type {
        PathType::Exact => 0,
        PathType::Prefix => 1,
    }
}

/// The declaration owning the host's default path supplies TLS if it can,
/// otherwise the earliest created supplier does. Suppliers of other secrets conflict.
fn select_tls(host: &str, routes: &[&Arc<ValidatedRoute>], entries: &[TableEntry]) -> (Option<TlsBinding>, Vec<ObjectKey>) {
    let mut suppliers: Vec<(&Arc<ValidatedRoute>, &ObjectKey)> = routes.iter().filter_map(|route| Some((*route, route.tls_secret_for(host)?))).collect();
    if suppliers.is_empty() {
        return (None, Vec::new());
    }
    suppliers.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
    let default_owner = entries.iter().find(|entry| entry.path.path == constants::DEFAULT_PATH && entry.path.path_type == PathType::Prefix).map(|entry| &entry.owner);
    let winner = default_owner.and_then(|owner| suppliers.iter().find(|(route, _)| &route.key == owner)).or_else(|| suppliers.first());
    let Some((winner, secret)) = winner else {
        return (None, Vec::new());
    };
    let conflicts = suppliers.iter().filter(|(route, other)| route.key != winner.key && other != secret).map(|(route, _)| route.key.clone()).collect();
    (
        Some(TlsBinding {
            secret: (*secret).clone(),
            owner: winner.key.clone(),
        }),
        conflicts,
    )
}
