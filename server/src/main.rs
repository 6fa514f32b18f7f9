//! stormd - Entry Point
//!
//! Control plane that turns uploaded executables into running cluster
//! services.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use storm::app::run::run;
use storm::config::settings::DEFAULT_SETTINGS_FILE;
use storm::config::Settings;
use storm::logs::init_logging;
use storm::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let config_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

    // Write a fresh config and exit
    if cli_args.contains_key("init") {
        return match Settings::write_default(&config_path).await {
            Ok(_) => {
                println!("Wrote default configuration to {}", config_path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Unable to write configuration: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let settings = match Settings::load(&config_path).await {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("Unable to read configuration: {}", e);
            eprintln!("Run: stormd --init [--config=<path>]");
            return ExitCode::FAILURE;
        }
    };

    // Keep the guard alive so file logs are flushed on exit
    let _log_guard = match init_logging(&settings.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    info!(
        version = %version.version,
        git_hash = %version.git_hash,
        config = %config_path.display(),
        "Running stormd"
    );
    match run(settings, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run stormd: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
