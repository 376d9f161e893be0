//! Readiness tracking and the HTTP health endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use curfew_api::HealthStatus;
use curfew_core::CurfewEngine;
use curfew_ipc::BridgePlatform;
use curfew_platform_api::Platform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Ready means: a bridge is attached, recovery ran since it attached, and the
/// store answers.
pub struct Readiness {
    engine: Arc<CurfewEngine>,
    bridge: Arc<BridgePlatform>,
    recovered: AtomicBool,
}

impl Readiness {
    pub fn new(engine: Arc<CurfewEngine>, bridge: Arc<BridgePlatform>) -> Self {
        Self {
            engine,
            bridge,
            recovered: AtomicBool::new(false),
        }
    }

    pub fn set_recovered(&self, recovered: bool) {
        self.recovered.store(recovered, Ordering::SeqCst);
    }

    pub fn status(&self) -> HealthStatus {
        let bridge_connected = self.bridge.is_connected();
        let recovered = self.recovered.load(Ordering::SeqCst);
        let store_ok = self.engine.store_healthy();

        HealthStatus {
            live: true,
            ready: bridge_connected && recovered && store_ok,
            bridge_connected,
            recovered,
            store_ok,
            scheduled_timers: self.engine.timers().scheduled_count(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status().ready
    }
}

async fn health_handler(State(readiness): State<Arc<Readiness>>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
    }
}

pub fn router(readiness: Arc<Readiness>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(readiness)
}

/// Serve `GET /health` until the task is aborted
pub async fn serve(host: &str, port: u16, readiness: Arc<Readiness>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "Health endpoint listening");
    axum::serve(listener, router(readiness)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::US::Pacific;
    use curfew_config::EngineConfig;
    use curfew_core::NarrativeClient;
    use curfew_store::SqliteStore;
    use curfew_util::{ClientId, SubjectId};
    use tokio::sync::broadcast;

    fn readiness() -> Arc<Readiness> {
        let (events, _) = broadcast::channel(8);
        let bridge = Arc::new(BridgePlatform::new(events));
        let engine = Arc::new(CurfewEngine::new(
            EngineConfig::default(),
            Arc::new(SqliteStore::in_memory(Pacific).unwrap()),
            bridge.clone(),
            Arc::new(NarrativeClient::disabled()),
        ));
        Arc::new(Readiness::new(engine, bridge))
    }

    #[tokio::test]
    async fn test_not_ready_until_bridge_and_recovery() {
        let readiness = readiness();
        let (status, body) = health_handler(State(readiness.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Not ready");

        readiness.bridge.attach(ClientId::new(), Vec::<SubjectId>::new());
        assert!(!readiness.is_ready());

        readiness.set_recovered(true);
        let (status, body) = health_handler(State(readiness.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_status_reports_components() {
        let readiness = readiness();
        readiness.set_recovered(true);

        let status = readiness.status();
        assert!(status.live);
        assert!(status.store_ok);
        assert!(status.recovered);
        assert!(!status.bridge_connected);
        assert!(!status.ready);
        assert_eq!(status.scheduled_timers, 0);
    }
}
