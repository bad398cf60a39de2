//! Mnemograph server binary
//!
//! Boot order: CLI flags, logging, configuration, graph schema, engine,
//! reaper, HTTP listener. Shutdown closes the background pool before the
//! listener drains.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use mnemograph_core::{Config, Engine};
use mnemograph_server::{AppState, router};

#[derive(Debug, Parser)]
#[command(name = "mnemograph", version, about = "Per-user long-term memory server")]
struct Args {
    /// Address to bind the HTTP listener to
    #[arg(long, default_value = "127.0.0.1:8765")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(false)
        .init();

    info!("mnemograph v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("invalid configuration")?;
    let engine = Arc::new(
        Engine::connect(&config)
            .await
            .context("failed to connect to the graph store")?,
    );
    let reaper = engine.start_reaper();

    let state = AppState::new(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    engine.shutdown();
    reaper.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
}
