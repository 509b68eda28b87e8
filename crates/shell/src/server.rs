//! Admin http server: `/metrics` and `/healthz`.
use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use nsgate_config::watch::WatchHealth;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{metrics, reconcile::ReconcileStatus};

/// What `/healthz` looks at.
#[derive(Debug, Clone)]
pub struct HealthState {
    watch: WatchHealth,
    reconcile: watch::Receiver<ReconcileStatus>,
}

impl HealthState {
    pub fn new(watch: WatchHealth, reconcile: watch::Receiver<ReconcileStatus>) -> Self {
        Self { watch, reconcile }
    }

    /// # Errors
    /// A description of every failing condition.
    pub fn check(&self) -> Result<(), String> {
        let mut problems = Vec::new();
        if self.watch.is_degraded() {
            problems.push(format!("watch degraded after {} failed resyncs", self.watch.consecutive_failures()));
        }
        let status = self.reconcile.borrow();
        if status.reload_failures > 0 {
            problems.push(format!("last {} data plane reloads failed", status.reload_failures));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

pub async fn healthz(State(health): State<HealthState>) -> (StatusCode, String) {
    match health.check() {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(reason) => (StatusCode::SERVICE_UNAVAILABLE, reason),
    }
}

pub async fn metrics_text() -> (StatusCode, String) {
    match metrics::gather() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub fn router(health: HealthState) -> Router {
    Router::new().route("/metrics", get(metrics_text)).route("/healthz", get(healthz)).with_state(health)
}

/// Bind and serve the admin router until `cancel` fires.
pub async fn serve(bind: SocketAddr, health: HealthState, cancel: CancellationToken) -> Result<JoinHandle<()>, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("[NG.Server] admin server listening on {bind}");
    let router = router(health);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(cancel.cancelled_owned()).await {
            warn!("[NG.Server] admin server error: {e}");
        }
        info!("[NG.Server] admin server stopped");
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_healthz() {
        let (tx, rx) = watch::channel(ReconcileStatus::default());
        let health = HealthState::new(WatchHealth::default(), rx);
        assert_eq!(healthz(State(health.clone())).await.0, StatusCode::OK);

        tx.send_modify(|status| status.reload_failures = 2);
        let (code, reason) = healthz(State(health)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(reason.contains("reloads failed"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        metrics::set_table_entries(1);
        let (code, text) = metrics_text().await;
        assert_eq!(code, StatusCode::OK);
        assert!(text.contains("nsgate_routing_table_entries"));
    }
}
