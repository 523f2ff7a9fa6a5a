//! Scheme Registry API
//!
//! Operators author vendor workflow schemes as JSON definitions; the registry
//! validates, compiles and publishes them, and gates vendor access through
//! an approval workflow.
//!
//! - Import: validate a definition and store it (draft -> imported)
//! - Compile: fold the sections index into an artifact (-> compiled)
//! - Publish: stamp sections published and recompile (-> published)
//! - Activation: vendors request access, approvers decide, grants result

mod activation;
mod actor;
mod audit;
mod config;
mod error;
mod models;
mod pipeline;
mod routes;
mod scheme;
mod state;
mod storage;

use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting Scheme Registry...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let data_dir = &settings.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    info!("💾 Data directory: {}", data_dir.display());

    if settings.pipeline.template_sets.is_empty() {
        warn!("⚠️  TEMPLATE_SETS is empty; sections referencing a template set will not compile");
    }

    let state = Arc::new(AppState::new(&settings));
    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Schemes ───");
    info!("   POST /api/schemes                          - Create scheme shell");
    info!("   POST /api/schemes/validate                 - Dry-run validate a definition");
    info!("   POST /api/schemes/{{id}}/definition          - Import definition");
    info!("   PUT  /api/schemes/{{id}}/sections            - Write sections index");
    info!("   POST /api/schemes/{{id}}/compile             - Compile / recompile");
    info!("   POST /api/schemes/{{id}}/publish             - Publish");
    info!("");
    info!("   ─── Activation ───");
    info!("   POST /api/activations                      - Vendor requests access");
    info!("   GET  /api/activations/pending              - Pending requests");
    info!("   POST /api/activations/{{id}}/decision        - Approve or reject");
    info!("   GET  /api/grants/{{yojId}}                   - Vendor grants");
    info!("");
    info!("   GET  /api/audit                            - Recent audit entries");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scheme_registry=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
