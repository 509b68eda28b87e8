use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use nsgate_model::ReloadError;

use super::{ProxyEngine, RenderedConfig};

/// In-memory engine. Keeps every configuration it was asked to apply and can be
/// told to refuse the next reloads.
#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    inner: Arc<RecordingInner>,
}

#[derive(Debug, Default)]
struct RecordingInner {
    applied: Mutex<Vec<RenderedConfig>>,
    attempts: AtomicU32,
    failing: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }
    /// Refuse the next `count` reloads.
    pub fn fail_next(&self, count: u32) {
        self.inner.failing.store(count, Ordering::SeqCst);
    }
    /// Successfully applied configurations, oldest first.
    pub fn applied(&self) -> Vec<RenderedConfig> {
        lock(&self.inner.applied).clone()
    }
    /// The configuration currently serving traffic.
    pub fn active(&self) -> Option<RenderedConfig> {
        lock(&self.inner.applied).last().cloned()
    }
    /// Reload attempts, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

impl ProxyEngine for RecordingEngine {
    async fn apply(&self, config: &RenderedConfig) -> Result<(), ReloadError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.failing.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(ReloadError::new("reload refused by recording engine"));
        }
        lock(&self.inner.applied).push(config.clone());
        Ok(())
    }
}
