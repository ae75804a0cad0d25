//! Solid pod command-line client
//!
//! Single binary that:
//! 1. Loads proof keys and the stored credential for one account
//! 2. Exchanges or refreshes tokens as needed, persisting each rotation
//! 3. Runs one resource operation against the pod

mod cli;
mod commands;
mod config;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `download` can stream the resource to stdout
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let invocation = cli::Invocation::parse();

    // Install before any pod request so every exchange is recorded
    let prometheus = if invocation.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(invocation.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let login = commands::login_parameters(&invocation.command)?;
    let result = async {
        let pod = commands::open(&config, login).await?;
        commands::run(&pod, invocation.command).await
    }
    .await;

    if let Err(e) = &result {
        error!(error = %e, "command failed");
    }
    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }
    result
}
