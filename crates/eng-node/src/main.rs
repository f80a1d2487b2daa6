//! eng Node - version control and live collaboration for engineering files.

use anyhow::Context;
use clap::Parser;
use eng_node::api::{create_router, AppState};
use eng_node::config::{CliOverrides, NodeConfig};
use eng_node::events::spawn_background;
use eng_node::observability::{init_logging, LogFormat};
use eng_node::projects::ProjectRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;

/// eng Node - version control and live collaboration for engineering files
#[derive(Parser, Debug)]
#[command(name = "eng-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API listen address
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = NodeConfig::load(args.config.as_deref())
        .and_then(|c| {
            c.apply_overrides(CliOverrides {
                api_addr: args.api_addr,
                data_dir: args.data_dir,
                log_level: args.log_level,
                log_format: args.log_format,
            })
        })
        .context("failed to load configuration")?;

    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    init_logging(&config.log_level, config.log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting eng node");
    tracing::info!(
        api_addr = %config.api_addr,
        data_dir = %config.data_dir.display(),
        storage = ?config.storage_backend,
        merge_strategy = ?config.merge_strategy,
        "Node configuration"
    );

    let projects =
        ProjectRegistry::for_backend(config.storage_backend, &config.data_dir, config.merge_strategy)
            .context("failed to open project registry")?;
    let state = AppState::new(projects, &config.realtime);
    spawn_background(&state);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(config.api_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.api_addr))?;

    tracing::info!(addr = %config.api_addr, "Node is ready. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("eng node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
