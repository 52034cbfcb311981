//! Venuescout - resilient venue recommendation orchestrator

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use venuescout::{
    cli::{Cli, Command},
    config::Config,
    gateway, setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckConfig) => run_check_config(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = &cli.host {
        config.server.host.clone_from(host);
    }
    Ok(config)
}

fn run_check_config(cli: &Cli) -> ExitCode {
    match load_config(cli).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => {
            info!(
                host = %config.server.host,
                port = config.server.port,
                "Configuration is valid"
            );
            // Print the effective config with secrets masked
            let mut printable = config.clone();
            for key in [
                &mut printable.providers.foursquare.api_key,
                &mut printable.providers.inference.api_key,
            ] {
                if !key.is_empty() {
                    "<redacted>".clone_into(key);
                }
            }
            match serde_yaml::to_string(&printable) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => error!("Failed to render effective config: {e}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Configuration error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: Cli) -> ExitCode {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match gateway::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}
