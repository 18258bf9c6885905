mod cli;
mod error;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;

use hearth_api::HassClient;
use hearth_core::{Controller, CoreError, SystemClock};

use crate::cli::{Cli, Command};
use crate::error::AppError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Setup tracing: explicit RUST_LOG wins, then `-v` flags, then the
/// config file's log level.
fn init_tracing(verbosity: u8, config_level: &str) {
    let fallback = match verbosity {
        0 => config_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let path = hearth_config::find_config_file(cli.config.as_deref());
    let settings = hearth_config::load_settings(&path)?;

    match cli.command {
        Some(Command::Validate) => validate(&path, &settings),
        Some(Command::Run) | None => {
            init_tracing(cli.verbose, &settings.app.log_level);
            info!(config = %path.display(), "configuration loaded");
            serve(&settings).await
        }
    }
}

/// Validate the configuration, print a summary, and exit.
fn validate(path: &std::path::Path, settings: &hearth_config::Settings) -> Result<(), AppError> {
    hearth_config::validate(settings)?;
    let hvac = hearth_config::hvac_config(settings)?;

    println!("configuration OK: {}", path.display());
    println!("  temperature sensor: {}", hvac.temp_sensor);
    println!("  outdoor sensor:     {}", hvac.outdoor_sensor);
    println!("  system mode:        {}", hvac.system_mode);
    println!(
        "  entities:           {} ({} enabled)",
        hvac.entities.len(),
        hvac.entities.iter().filter(|e| e.enabled).count()
    );
    println!(
        "  defrost:            {}",
        if hvac.heating.defrost.is_some() {
            "configured"
        } else {
            "disabled"
        }
    );
    Ok(())
}

/// Run the controller until a shutdown signal arrives.
async fn serve(settings: &hearth_config::Settings) -> Result<(), AppError> {
    let hub = hearth_config::hub_options(settings)?;
    let hvac = hearth_config::hvac_config(settings)?;

    let client = HassClient::new(hub).map_err(CoreError::from)?;
    let controller = Controller::new(client, hvac, Arc::new(SystemClock));

    controller.start().await?;
    info!("hearth is running; Ctrl-C to stop");

    shutdown_signal().await;
    info!("shutdown signal received");

    controller.stop().await;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
