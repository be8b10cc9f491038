//! Estimation Controller
//!
//! Stateful session broadcast engine for real-time collaborative
//! estimation.
//!
//! # Servers
//!
//! The Estimation Controller runs one HTTP server for operational
//! endpoints (default: 0.0.0.0:8081): liveness, readiness, and
//! Prometheus metrics. Transports hand participant connections to the
//! actor system through [`estimation_controller::actors`].
//!
//! # Architecture
//!
//! Uses an actor model hierarchy:
//! - `SessionRegistryActor` (singleton): Supervises sessions
//! - `SessionActor` (per session): Owns roster and round state
//! - `ConnectionActor` (per connection): Forwards views to one transport
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Initialize actor system (`SessionRegistryActorHandle`)
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use estimation_controller::actors::{ActorMetrics, SessionRegistryActorHandle};
use estimation_controller::config::Config;
use estimation_controller::observability::{health_router, init_metrics_recorder, HealthState};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "estimation_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Estimation Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        ec_id = %config.ec_id,
        health_bind_address = %config.health_bind_address,
        session_idle_timeout_seconds = config.session_idle_timeout_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();

    let registry_handle = SessionRegistryActorHandle::new(
        config.ec_id.clone(),
        config.idle_timeout(),
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    // Create shutdown token as child of the registry's token
    // This ensures background tasks stop when the registry shuts down
    let shutdown_token = registry_handle.child_token();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    // This provides liveness/readiness probes and Prometheus /metrics endpoint
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let health_router = health_router(Arc::clone(&health_state));

    // Add /metrics endpoint served by Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = health_router
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    // Spawn health server task
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // No external registration step - the controller is ready as soon as
    // the actor system and health server are up
    health_state.set_ready();

    // Wait for shutdown signal
    info!("Estimation Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    // Trigger graceful shutdown via cancellation token
    // This propagates to the health server task
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    shutdown_token.cancel();

    // Give tasks time to shut down
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Shutdown actor system (also cancels via its token)
    if let Err(e) = registry_handle.shutdown(Duration::from_secs(30)).await {
        warn!(error = %e, "Actor system shutdown error");
    }

    info!("Estimation Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
