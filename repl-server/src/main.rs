use std::sync::Arc;

use clap::Parser;
use repl_core::ReplConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use repl_server::{server, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "repl.toml")]
    config: String,

    /// Check that the config loads and the artifact cache opens, then exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience - production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match ReplConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let default_level = config
        .service
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    let state = Arc::new(AppState::new(config));

    if args.health {
        match state.storage.open_store(&state.config.cache.name).await {
            Ok(store) => println!("✅ Artifact cache '{}' available", store.name()),
            Err(e) => {
                println!("❌ Artifact cache unavailable: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Public origin: {}", state.public_origin());
        match &state.config.http.upstream {
            Some(upstream) => println!("✅ Upstream pass-through: {}", upstream),
            None => println!("✅ Upstream pass-through: disabled"),
        }
        println!("✅ REPL relay health check passed");
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if state.config.http.enabled {
        let http_state = state.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = repl_server::http::start_http_server(http_state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = state.config.service.socket_path.clone();
    server::run_unix_server(&socket_path, state, tx.subscribe()).await?;

    Ok(())
}
