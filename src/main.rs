//! # Audio Merge Service - Main Application Entry Point
//!
//! A small Actix-web server that concatenates uploaded audio files with
//! ffmpeg and streams the result back. Built to sit next to n8n workflows
//! that produce podcast segments as `audio_0`, `audio_1`, ... and need one
//! file out of them.
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Shared handles (scratch dir, ffmpeg) and metrics
//! - **merge**: The upload → order → manifest → ffmpeg → stream pipeline
//! - **handlers**: HTTP request handlers for API endpoints
//! - **health**: Health check and metrics endpoints
//! - **middleware**: Custom request processing logic (logging, metrics)
//! - **error**: Custom error types and HTTP error responses

// Module declarations - These tell Rust about our other source files
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod merge;       // Merge pipeline (merge/ directory)
mod middleware;  // Custom middleware (middleware/ directory)
mod state;       // Application state management (state.rs)

use actix_cors::Cors;  // Cross-Origin Resource Sharing support
use actix_web::{middleware::Logger, web, App, HttpServer};  // Web framework
use anyhow::{Context, Result};    // Better error handling with context
use crate::config::AppConfig; // Our custom configuration struct
use crate::merge::ScratchDir;
use crate::state::AppState;   // Our custom application state
use std::sync::atomic::{AtomicBool, Ordering};  // Thread-safe boolean for shutdown
use tracing::{error, info, warn};  // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup

/// Global shutdown signal set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates the scratch directory** merge requests work in
/// 4. **Checks that ffmpeg can be started** (a warning only, not fatal)
/// 5. **Configures the HTTP server** with middleware and routes
/// 6. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audio-merge-service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let scratch = ScratchDir::create(&config.storage.scratch_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create scratch directory {}",
                config.storage.scratch_dir.display()
            )
        })?;
    info!(path = %scratch.root().display(), "Scratch directory ready");

    let app_state = AppState::new(config.clone(), scratch);

    match app_state.ffmpeg.probe().await {
        Some(version) => info!(binary = %app_state.ffmpeg.binary().display(), %version, "ffmpeg available"),
        None => warn!(
            binary = %app_state.ffmpeg.binary().display(),
            "ffmpeg could not be started; merge requests will fail until it is installed"
        ),
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Set up signal handlers for graceful shutdown (Ctrl+C, SIGTERM, etc.)
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Configure CORS (Cross-Origin Resource Sharing) to allow web browsers to connect
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(["content-disposition", middleware::logging::REQUEST_ID_HEADER])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Add middleware in order (they execute in reverse order for responses)
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(routes)
    })
    .bind(&bind_addr)?
    .run();

    // Get a handle to control the server and spawn it in a separate task
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;  // Let in-flight merges finish streaming
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Route table, shared by the server and the tests.
///
/// `/health` and `/merge` stay at the root because that is where existing
/// workflows call them; `/api/v1` carries the same plus metrics.
fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/merge", web::post().to(handlers::merge_audio)),
    )
    .route("/health", web::get().to(health::health_check))
    .route("/merge", web::post().to(handlers::merge_audio));
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "audio_merge_service=trace")
/// - If not set, defaults to "audio_merge_service=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_merge_service=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// - Listens for SIGTERM (termination signal from system, e.g. `docker stop`)
/// - Listens for SIGINT (interrupt signal, usually Ctrl+C)
/// - When either signal is received, sets the global shutdown flag
#[cfg(unix)]
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

#[cfg(not(unix))]
fn setup_signal_handlers() {
    tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });
}

/// Wait for the shutdown signal to be set.
///
/// Polls the flag every 100ms; simple and cheap enough for a signal that
/// arrives once per process lifetime.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
