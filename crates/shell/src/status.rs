use std::collections::BTreeMap;

use nsgate_config::{service::UpdateStatus, BoxError, ObjectKey, RouteStatus};
use tracing::{debug, warn};

/// Writes route statuses back to the store, only when they changed.
///
/// A failed write is kept and tried again by [`StatusReporter::retry_pending`].
#[derive(Debug, Default)]
pub struct StatusReporter {
    reported: BTreeMap<ObjectKey, RouteStatus>,
    pending: BTreeMap<ObjectKey, RouteStatus>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last status successfully written for `key`.
    pub fn last(&self, key: &ObjectKey) -> Option<&RouteStatus> {
        self.reported.get(key)
    }

    pub fn pending(&self) -> impl Iterator<Item = &ObjectKey> {
        self.pending.keys()
    }

    /// The declaration is gone, nothing to write anymore.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.reported.remove(key);
        self.pending.remove(key);
    }

    /// Returns whether a write happened.
    pub async fn report<U>(&mut self, store: &U, key: &ObjectKey, mut status: RouteStatus) -> Result<bool, BoxError>
    where
        U: UpdateStatus,
    {
        if let Some(previous) = self.reported.get(key) {
            if previous.equivalent(&status) {
                self.pending.remove(key);
                return Ok(false);
            }
            status.carry_transition_times(previous);
        }
        match store.update_route_status(key, &status).await {
            Ok(()) => {
                debug!("[NG.Reconcile] status of {key}: {:?}", status.condition_names());
                self.pending.remove(key);
                self.reported.insert(key.clone(), status);
                Ok(true)
            }
            Err(e) => {
                warn!("[NG.Reconcile] fail to write status of {key}: {e}");
                self.pending.insert(key.clone(), status);
                Err(e)
            }
        }
    }

    /// Write again every status whose last write failed.
    pub async fn retry_pending<U>(&mut self, store: &U)
    where
        U: UpdateStatus,
    {
        let pending = std::mem::take(&mut self.pending);
        for (key, status) in pending {
            let _ = self.report(store, &key, status).await;
        }
    }
}

#[cfg(test)]
mod test {
    use nsgate_config::{service::memory::Memory, Condition, ObjectMeta, RouteDeclaration};

    use super::*;

    #[tokio::test]
    async fn test_write_only_on_change() {
        let memory = Memory::default();
        memory.apply_route(RouteDeclaration::new(ObjectMeta::new("production", "api-ingress")));
        let key = ObjectKey::new("production", "api-ingress");
        let mut reporter = StatusReporter::new();

        assert!(reporter.report(&memory, &key, RouteStatus::new([Condition::Accepted], 1)).await.expect("write"));
        let first = memory.route_status(&key).expect("status");
        assert!(!reporter.report(&memory, &key, RouteStatus::new([Condition::Accepted], 1)).await.expect("write"));
        assert_eq!(memory.status_writes(), 1);

        let shadowed = Condition::Shadowed {
            paths: vec!["api.example.com/v1".into()],
        };
        assert!(reporter.report(&memory, &key, RouteStatus::new([Condition::Accepted, shadowed], 1)).await.expect("write"));
        let second = memory.route_status(&key).expect("status");
        // unchanged conditions keep their transition time
        assert_eq!(second.conditions[0].last_transition_time, first.conditions[0].last_transition_time);
        assert_eq!(memory.status_writes(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let memory = Memory::default();
        let key = ObjectKey::new("production", "api-ingress");
        let mut reporter = StatusReporter::new();
        // the object is not in the store yet, so the write fails
        assert!(reporter.report(&memory, &key, RouteStatus::new([Condition::Accepted], 1)).await.is_err());
        assert_eq!(reporter.pending().count(), 1);

        memory.apply_route(RouteDeclaration::new(ObjectMeta::new("production", "api-ingress")));
        reporter.retry_pending(&memory).await;
        assert_eq!(reporter.pending().count(), 0);
        assert!(memory.route_status(&key).is_some_and(|status| status.has(|c| c == &Condition::Accepted)));
    }
}
