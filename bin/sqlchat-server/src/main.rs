//! sqlchat-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the MySQL connection pool.
//! 4. Build the reasoning-model client.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod db;
mod error;
mod llm;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::MySqlDatabase;
use crate::llm::OpenAiChatModel;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: SQLCHAT_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "sqlchat-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let db = Arc::new(MySqlDatabase::connect(&cfg.database_url, cfg.db_max_connections).await?);
    info!("database ready");

    // ── 4. Reasoning model ─────────────────────────────────────────────────────
    if cfg.llm_api_key.is_none() {
        warn!("SQLCHAT_LLM_API_KEY is not set; requests are sent without credentials");
    }
    let model = OpenAiChatModel::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.llm_model.clone(),
    )?;
    info!(base_url = %cfg.llm_base_url, model = %cfg.llm_model, "model client ready");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let state = Arc::new(AppState::new(cfg, Arc::new(model), db.clone()));
    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.pool().close().await;
    info!("sqlchat-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
