//! Application startup and lifecycle management.

use crate::config::MatchingConfig;
use crate::handlers;
use crate::services::metrics::init_metrics;
use crate::services::Database;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MatchingConfig,
    pub db: Arc<Database>,
    /// Cancelled on shutdown; in-flight auto-match runs observe it between
    /// receipts and report partial results.
    pub shutdown: CancellationToken,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: MatchingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: MatchingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: MatchingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let state = AppState {
            config: config.clone(),
            db: Arc::new(db),
            shutdown: CancellationToken::new(),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind TCP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Matching service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Token that cancels in-flight auto-match runs on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_handler))
            .route("/receipts/unmatched", get(handlers::list_unmatched_receipts))
            .route("/receipts/:id/candidates", get(handlers::list_candidates))
            .route("/receipts/:id", delete(handlers::delete_receipt))
            .route(
                "/transactions/unmatched",
                get(handlers::list_unmatched_transactions),
            )
            .route("/aliases", get(handlers::list_vendor_aliases))
            .route("/matches/proposals", get(handlers::list_proposals))
            .route("/matches/stats", get(handlers::matching_stats))
            .route("/matches/auto-run", post(handlers::run_auto_match))
            .route("/matches/manual", post(handlers::manual_match))
            .route("/matches/batch-approve", post(handlers::batch_approve))
            .route("/matches/:id", get(handlers::get_match))
            .route("/matches/:id/confirm", post(handlers::confirm_match))
            .route("/matches/:id/reject", post(handlers::reject_match))
            .route("/matches/:id/unmatch", post(handlers::unmatch_match))
            .route("/groups", post(handlers::create_group))
            .route("/groups/:id", delete(handlers::dissolve_group))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.state.clone());

        tracing::info!(
            service = "matching-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
