//! Resync CLI - runs one re-synchronisation of a hosted survey.

use anyhow::{Context, Result};
use clap::Parser;
use inquire::validator::Validation;
use inquire::{CustomUserError, Password, PasswordDisplayMode};
use resync::prelude::*;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

/// Incrementally copy a hosted survey into a reprojected destination store.
#[derive(Debug, Parser)]
#[command(name = "resync", version, about)]
struct Cli {
    /// JSON configuration file holding the run parameters
    #[arg(short, long, env = "RESYNC_CONFIG_FILE")]
    config_file: PathBuf,

    /// Named section of the configuration file to run
    #[arg(short, long, env = "RESYNC_SECTION")]
    section: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    /// Log output format (text or json)
    #[arg(long, env = "RESYNC_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The run does not depend on logging, so carry on without it.
    if let Err(e) = init_logging(cli.verbose, cli.log_format) {
        eprintln!("Warning: logging not initialised: {e}");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "resync");

    match run(&cli).await {
        Ok(report) => info!(%report, "Finished"),
        Err(e) => {
            let code = e
                .downcast_ref::<TerminalError>()
                .map_or(1, TerminalError::exit_code);
            error!(error = %e, "Run failed");
            eprintln!("Error: {e:#}");
            process::exit(code);
        }
    }
}

async fn run(cli: &Cli) -> Result<RunReport> {
    let mut parameters = load_parameters(&cli.config_file, cli.section.as_deref())?
        .validate()
        .with_context(|| format!("Invalid configuration in {}", cli.config_file.display()))?;

    if parameters.needs_password() {
        let username = parameters.username.clone().unwrap_or_default();
        parameters = parameters.with_password(prompt_password(&username)?);
    }
    info!(?parameters, "Parameters supplied");

    let reprojector = SurveyReprojector::standard(
        parameters,
        StorePorts::default(),
        Arc::new(StandaloneHost),
        Arc::new(Messenger::new()),
    )?;
    Ok(reprojector.run().await?)
}

fn password_validator(password: &str) -> Result<Validation, CustomUserError> {
    if password.is_empty() {
        return Ok(Validation::Invalid("Password cannot be empty".into()));
    }
    Ok(Validation::Valid)
}

fn prompt_password(username: &str) -> Result<String> {
    Password::new(&format!("Portal password for {username}:"))
        .with_display_mode(PasswordDisplayMode::Hidden)
        .with_validator(password_validator)
        .without_confirmation()
        .prompt()
        .context("Failed to read the portal password")
}
