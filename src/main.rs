//! # Voice Pairing Backend - Main Application Entry Point
//!
//! Anonymous one-to-one voice pairing service. Participants connect over a
//! WebSocket, get paired with whoever has been waiting longest, and exchange
//! session-negotiation messages (offer / answer / candidate) through this server.
//! Audio itself flows peer-to-peer and never touches it.
//!
//! ## Application Architecture:
//! - **matching**: waiting queue, pairing registry and the coordinator on top
//! - **signaling**: wire protocol, relay rules and the matchmaking actor
//! - **websocket**: one actor per client connection
//! - **config**: application configuration (TOML files + environment variables)
//! - **state**: shared configuration and metrics
//! - **health / handlers**: HTTP endpoints for monitoring and runtime config
//! - **middleware**: per-endpoint request metrics
//! - **error**: HTTP error types

mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod matching;    // Pairing state and rules (matching/ directory)
mod middleware;  // Custom middleware (middleware/ directory)
mod signaling;   // Protocol, relay and matchmaking actor (signaling/ directory)
mod state;       // Application state management (state.rs)
mod websocket;   // WebSocket transport (websocket.rs)

use actix::Actor;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::signaling::MatchmakingServer;
use crate::state::AppState;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // .ok() means "ignore errors" - it's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting voice-pairing-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (max_connections={}, requeue_delay_ms={})",
        config.server.host,
        config.server.port,
        config.performance.max_connections,
        config.matching.requeue_delay_ms
    );

    let app_state = AppState::new(config.clone());
    // One matchmaking actor for the whole process; every socket talks to it
    let matchmaker = MatchmakingServer::new(app_state.clone()).start();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(matchmaker.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/ws", web::get().to(websocket::signaling_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/stats", web::get().to(handlers::get_stats))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
            )
            .route("/health", web::get().to(health::health_check))
            .default_service(web::to(not_found))
    })
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            // Open sockets are closed, which ends every pairing
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

async fn not_found(req: actix_web::HttpRequest) -> error::AppResult<actix_web::HttpResponse> {
    Err(error::AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "voice_pairing_backend=trace")
/// - If not set, defaults to "voice_pairing_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_pairing_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
