//! Admin API.
//!
//! # Responsibilities
//! - Report proxy version and liveness
//! - Expose the latest engine statistics snapshot as JSON
//!
//! # Design Decisions
//! - Runs on its own listener, separate from proxied traffic
//! - Reads stats from a `watch` channel; never touches the engine directly
//! - Every route sits behind bearer-key authentication

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::lifecycle::Shutdown;
use crate::proxy::EngineStats;

use self::auth::admin_auth_middleware;
use self::handlers::{get_stats, get_status};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub stats: watch::Receiver<EngineStats>,
}

impl AdminState {
    pub fn new(api_key: impl Into<Arc<str>>, stats: watch::Receiver<EngineStats>) -> Self {
        Self {
            api_key: api_key.into(),
            stats,
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown is triggered.
pub async fn serve(listener: TcpListener, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(shutdown.signalled())
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_admin(stats: EngineStats) -> (String, Shutdown) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (_tx, rx) = watch::channel(stats);
        let shutdown = Shutdown::new();
        tokio::spawn(serve(listener, AdminState::new("secret", rx), shutdown.clone()));
        (base, shutdown)
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let (base, shutdown) = spawn_admin(EngineStats::default()).await;
        let client = reqwest::Client::new();

        let missing = client.get(format!("{base}/admin/status")).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::UNAUTHORIZED);

        let wrong = client
            .get(format!("{base}/admin/status"))
            .bearer_auth("nope")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

        shutdown.trigger();
    }

    #[tokio::test]
    async fn serves_stats_snapshot() {
        let stats = EngineStats {
            pending_requests: 2,
            idle_connections: 3,
            max_concurrent_connections: 5,
            ..EngineStats::default()
        };
        let (base, shutdown) = spawn_admin(stats.clone()).await;

        let response = reqwest::Client::new()
            .get(format!("{base}/admin/stats"))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: EngineStats = response.json().await.unwrap();
        assert_eq!(body, stats);

        shutdown.trigger();
    }
}
