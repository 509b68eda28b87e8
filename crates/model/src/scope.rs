use std::{collections::BTreeSet, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{constants, FatalConfigurationError, RouteDeclaration};

lazy_static! {
    static ref DNS_1123_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("invalid dns label regex");
}

/// Whether `value` is a valid DNS-1123 label (namespace names, service names).
pub fn is_dns_label(value: &str) -> bool {
    DNS_1123_LABEL.is_match(value)
}

/// Which namespaces are watched.
///
/// ```toml
/// namespaces = "all"
/// # or
/// namespaces = { only = ["production", "staging"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceSelector {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl NamespaceSelector {
    pub fn only<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(namespaces.into_iter().map(Into::into).collect())
    }
    pub fn matches(&self, namespace: &str) -> bool {
        match self {
            NamespaceSelector::All => true,
            NamespaceSelector::Only(allowed) => allowed.contains(namespace),
        }
    }
}

/// Exponential backoff parameters, all delays in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub ceiling_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: constants::DEFAULT_BACKOFF_INITIAL_MS,
            ceiling_ms: constants::DEFAULT_BACKOFF_CEILING_MS,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }
}

/// Process-wide controller scope. Set at startup, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerScope {
    pub namespaces: NamespaceSelector,
    /// Declarations selecting another class are not ours.
    pub ingress_class: String,
    /// Whether declarations without a class are claimed.
    pub watch_classless: bool,
    pub resync_interval_secs: u64,
    pub backoff: BackoffConfig,
    /// Consecutive relist failures before the watch is reported degraded.
    pub relist_failure_threshold: u32,
    pub cluster_domain: String,
}

impl Default for ControllerScope {
    fn default() -> Self {
        Self {
            namespaces: NamespaceSelector::All,
            ingress_class: constants::DEFAULT_INGRESS_CLASS.to_string(),
            watch_classless: true,
            resync_interval_secs: constants::DEFAULT_RESYNC_INTERVAL_SECS,
            backoff: BackoffConfig::default(),
            relist_failure_threshold: 3,
            cluster_domain: constants::DEFAULT_CLUSTER_DOMAIN.to_string(),
        }
    }
}

impl ControllerScope {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
    /// Evaluated once per event.
    pub fn selects(&self, namespace: &str) -> bool {
        self.namespaces.matches(namespace)
    }
    /// Whether this controller is responsible for the declaration.
    pub fn claims(&self, route: &RouteDeclaration) -> bool {
        if !self.selects(&route.meta.namespace) {
            return false;
        }
        match &route.ingress_class {
            Some(class) => class == &self.ingress_class,
            None => self.watch_classless,
        }
    }
    pub fn validate(&self) -> Result<(), FatalConfigurationError> {
        if let NamespaceSelector::Only(allowed) = &self.namespaces {
            if allowed.is_empty() {
                return Err(FatalConfigurationError::EmptyNamespaceAllowList);
            }
            if let Some(invalid) = allowed.iter().find(|ns| !is_dns_label(ns)) {
                return Err(FatalConfigurationError::InvalidNamespace(invalid.clone()));
            }
        }
        if self.ingress_class.trim().is_empty() {
            return Err(FatalConfigurationError::EmptyIngressClass);
        }
        if self.resync_interval_secs == 0 {
            return Err(FatalConfigurationError::ZeroResyncInterval);
        }
        if self.backoff.initial_ms == 0 || self.backoff.ceiling_ms < self.backoff.initial_ms || !(1.0..=constants::MAX_BACKOFF_MULTIPLIER).contains(&self.backoff.multiplier)
        {
            return Err(FatalConfigurationError::InvalidBackoff {
                initial_ms: self.backoff.initial_ms,
                ceiling_ms: self.backoff.ceiling_ms,
                multiplier: self.backoff.multiplier,
            });
        }
        if self.relist_failure_threshold == 0 {
            return Err(FatalConfigurationError::ZeroRelistFailureThreshold);
        }
        Ok(())
    }
}
