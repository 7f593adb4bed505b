//! Content pipeline service entry point

use clap::{Parser, Subcommand};
use content_pipeline::api;
use content_pipeline::app::{build_provider, build_state, seed_configs};
use content_pipeline::config::{ServiceConfig, DEFAULT_CONFIG_PATHS};
use content_pipeline::observability::LogSettings;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, Level};

/// Four-stage AI content generation service
#[derive(Parser)]
#[command(name = "content-pipeline")]
#[command(about = "Four-stage AI content generation pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_settings = LogSettings::from_env();
    match cli.verbose {
        0 => {}
        1 => log_settings.level = Level::DEBUG,
        _ => {
            log_settings.level = Level::TRACE;
            log_settings.include_spans = true;
        }
    }
    log_settings.init();

    info!("Starting content pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&PathBuf>,
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => ServiceConfig::find_default_file().ok_or_else(|| {
            format!(
                "No configuration file found. Provide one with -c/--config or create one of {}",
                DEFAULT_CONFIG_PATHS.join(", ")
            )
        })?,
    };

    info!("Loading configuration from: {}", path.display());
    Ok(ServiceConfig::load_from_file(&path)?)
}

async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(service_id = %config.service.id, "Bootstrapping service");

    let provider = build_provider(&config)?;
    let state = build_state(&config, provider);
    let seeded = seed_configs(&state.resolver, &config.seed_configs).await?;
    info!(seeded, "Seed agent configs loaded");

    let addr = config.socket_addr()?;
    api::serve(state, addr, shutdown_signal()).await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

fn handle_config_command(
    config: &ServiceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
