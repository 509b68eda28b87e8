use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    CrossNamespaceReference,
    StructuralValidation,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::CrossNamespaceReference => "CrossNamespaceReference",
            RejectReason::StructuralValidation => "StructuralValidation",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status condition attached to a route declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
    Accepted,
    Rejected { reason: RejectReason, message: String },
    /// Paths of this declaration that lost a tie to another declaration.
    Shadowed { paths: Vec<String> },
    /// Hosts where this declaration's TLS material lost to another declaration.
    #[serde(rename = "TLSConflict")]
    TlsConflict { hosts: Vec<String> },
    ReloadFailed { message: String },
}

impl Condition {
    pub fn rejected(error: &ValidationError) -> Self {
        Condition::Rejected {
            reason: error.reason(),
            message: error.to_string(),
        }
    }
    pub fn is_rejected(&self) -> bool {
        matches!(self, Condition::Rejected { .. })
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Accepted => write!(f, "Accepted"),
            Condition::Rejected { reason, .. } => write!(f, "Rejected:{reason}"),
            Condition::Shadowed { .. } => write!(f, "Shadowed"),
            Condition::TlsConflict { .. } => write!(f, "TLSConflict"),
            Condition::ReloadFailed { .. } => write!(f, "ReloadFailed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCondition {
    #[serde(flatten)]
    pub condition: Condition,
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

/// Conditions of one route declaration, in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouteStatus {
    pub conditions: Vec<StatusCondition>,
}

impl RouteStatus {
    pub fn new(conditions: impl IntoIterator<Item = Condition>, observed_generation: i64) -> Self {
        let now = Utc::now();
        Self {
            conditions: conditions
                .into_iter()
                .map(|condition| StatusCondition {
                    condition,
                    observed_generation,
                    last_transition_time: now,
                })
                .collect(),
        }
    }
    /// Same conditions for the same generation, transition times ignored.
    pub fn equivalent(&self, other: &RouteStatus) -> bool {
        self.conditions.len() == other.conditions.len()
            && self.conditions.iter().zip(other.conditions.iter()).all(|(a, b)| a.condition == b.condition && a.observed_generation == b.observed_generation)
    }
    /// Keep transition times of conditions that did not change.
    pub fn carry_transition_times(&mut self, previous: &RouteStatus) {
        for condition in self.conditions.iter_mut() {
            if let Some(prev) = previous.conditions.iter().find(|p| p.condition == condition.condition) {
                condition.last_transition_time = prev.last_transition_time;
            }
        }
    }
    pub fn has(&self, predicate: impl Fn(&Condition) -> bool) -> bool {
        self.conditions.iter().any(|c| predicate(&c.condition))
    }
    pub fn condition_names(&self) -> Vec<String> {
        self.conditions.iter().map(|c| c.condition.to_string()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_condition_display() {
        let rejected = Condition::Rejected {
            reason: RejectReason::CrossNamespaceReference,
            message: "".into(),
        };
        assert_eq!(rejected.to_string(), "Rejected:CrossNamespaceReference");
        assert_eq!(Condition::TlsConflict { hosts: vec![] }.to_string(), "TLSConflict");
    }

    #[test]
    fn test_equivalent_ignores_time() {
        let a = RouteStatus::new([Condition::Accepted], 3);
        let mut b = RouteStatus::new([Condition::Accepted], 3);
        b.conditions[0].last_transition_time = DateTime::<Utc>::default();
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&RouteStatus::new([Condition::Accepted], 4)));
    }

    #[test]
    fn test_status_serde() {
        let status = RouteStatus::new(
            [
                Condition::Accepted,
                Condition::Shadowed {
                    paths: vec!["api.example.com/".into()],
                },
            ],
            1,
        );
        let json = serde_json::to_string(&status).expect("serialize");
        assert!(json.contains(r#""type":"Shadowed""#));
        let back: RouteStatus = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, status);
    }
}
