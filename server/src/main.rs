// Copyright (c) 2026 LifeTap Health. MIT License.
// See LICENSE for details.

//! # LifeTap Flow Endpoint Server
//!
//! Entry point for the `lifeline-server` binary. Parses CLI arguments,
//! initializes logging and metrics, loads the endpoint's RSA private key,
//! and serves the encrypted flow endpoint.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — serve the flow endpoint
//! - `keygen`  — generate an RSA endpoint keypair
//! - `version` — print build version information

mod api;
mod cli;
mod dispatch;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use lifeline_flow::config::{SWEEP_INTERVAL, TERMINAL_SESSION_TTL};
use lifeline_flow::crypto::EndpointKey;
use lifeline_flow::session::{spawn_sweeper, SessionStore, StoreConfig};

use cli::{Commands, LifelineCli};
use dispatch::DispatchClient;
use logging::LogFormat;
use metrics::FlowMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LifelineCli::parse();

    match cli.command {
        Commands::Run(args) => run_server(args).await,
        Commands::Keygen(args) => keygen(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the endpoint: flow + health routes on the main port, Prometheus
/// on the metrics port, and the session sweep in the background.
async fn run_server(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "lifeline_server=info,lifeline_flow=info,tower_http=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        private_key = %args.private_key.display(),
        session_ttl_secs = args.session_ttl_secs,
        "starting lifeline-server"
    );

    // --- Endpoint key (fatal if missing or unparseable) ---
    let endpoint_key = Arc::new(EndpointKey::load(&args.private_key).with_context(|| {
        format!(
            "failed to load RSA private key from {} — run `lifeline-server keygen` first",
            args.private_key.display()
        )
    })?);
    tracing::info!("endpoint private key loaded");

    // --- Session store + sweep ---
    let sessions = Arc::new(SessionStore::new(StoreConfig {
        ttl: Duration::from_secs(args.session_ttl_secs),
        terminal_ttl: TERMINAL_SESSION_TTL,
        capacity: args.session_capacity,
    }));
    let sweeper = spawn_sweeper(Arc::clone(&sessions), SWEEP_INTERVAL);

    // --- Metrics ---
    let node_metrics = Arc::new(FlowMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoint_key,
        sessions,
        sink: Arc::new(DispatchClient::new()),
        downstream_timeout: Duration::from_millis(args.downstream_timeout_ms),
        metrics: Arc::clone(&node_metrics),
    };

    // --- Flow endpoint server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind flow listener on {}", api_addr))?;
    tracing::info!("flow endpoint listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("flow endpoint server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    sweeper.abort();
    tracing::info!("lifeline-server stopped");
    Ok(())
}

/// Generates an RSA endpoint keypair and writes both PEM halves.
fn keygen(args: cli::KeygenArgs) -> Result<()> {
    logging::init_logging("lifeline_server=info", LogFormat::Pretty);

    let private_path = args.out_dir.join("private.pem");
    let public_path = args.out_dir.join("public.pem");

    if private_path.exists() && !args.force {
        bail!(
            "{} already exists — the provider holds its public half; pass --force to replace it",
            private_path.display()
        );
    }

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create key directory: {}", args.out_dir.display()))?;

    tracing::info!("generating RSA keypair (this takes a moment)");
    let key = EndpointKey::generate().context("RSA key generation failed")?;

    let private_pem = key.private_key_pem().context("failed to encode private key")?;
    std::fs::write(&private_path, private_pem.as_bytes())
        .with_context(|| format!("failed to write {}", private_path.display()))?;

    // The private half is for this process only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&private_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let public_pem = key.public_key_pem().context("failed to encode public key")?;
    std::fs::write(&public_path, public_pem.as_bytes())
        .with_context(|| format!("failed to write {}", public_path.display()))?;

    println!("Endpoint keypair generated.");
    println!("  Private key : {}", private_path.display());
    println!("  Public key  : {}", public_path.display());
    println!();
    println!("Upload the PUBLIC key to the messaging provider's flow");
    println!("configuration, then start the server with:");
    println!("  lifeline-server run --private-key {}", private_path.display());

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("lifeline-server {}", env!("CARGO_PKG_VERSION"));
    println!("data api        {}", lifeline_flow::config::FLOW_API_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
