//! sm - ShellMaster command-line client
//!
//! Parses arguments, loads configuration, dispatches one command and
//! appends one line to the invocation log.

pub mod cli;
pub mod commands;
pub mod display;
pub mod errors;
pub mod logging;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;

use shellmaster_common::config::ConfigError;
use shellmaster_common::ShellmasterConfig;

use cli::{Cli, Commands, IndexCommands};
use commands::Report;
use display::Ui;
use errors::EXIT_GENERAL_ERROR;
use logging::{ErrorDetails, InvocationLog};

/// Run one invocation and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let started = Instant::now();
    let debug = cli.debug();

    let loaded = load_config(cli.config.as_ref());
    let level = loaded
        .as_ref()
        .map(|c| c.log.level.clone())
        .unwrap_or_else(|_| "warn".to_string());
    logging::init_tracing(&level, debug);

    let report = match loaded.context("Failed to load configuration") {
        Ok(config) => dispatch(&cli, &config).await,
        Err(e) => Err(e),
    };

    let report = report.unwrap_or_else(|e| {
        if debug {
            eprintln!("Error: {:#}", e);
            for cause in e.chain().skip(1) {
                tracing::debug!("caused by: {}", cause);
            }
        } else {
            eprintln!("Error: {}", e);
        }
        Report {
            exit_code: EXIT_GENERAL_ERROR,
            outcome: "error".to_string(),
            request_id: None,
            error: Some(ErrorDetails {
                code: "error".to_string(),
                message: format!("{:#}", e),
            }),
        }
    });

    InvocationLog {
        ts: InvocationLog::now(),
        request_id: report
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        command: cli.command_name().to_string(),
        args: redacted_args(std::env::args().skip(1)),
        outcome: report.outcome.clone(),
        exit_code: report.exit_code,
        duration_ms: started.elapsed().as_millis() as u64,
        ok: report.is_ok(),
        error: report.error.clone(),
    }
    .write();

    report.exit_code
}

async fn dispatch(cli: &Cli, config: &ShellmasterConfig) -> Result<Report> {
    let ui = Ui::detect();
    match &cli.command {
        None => commands::ask::run(&cli.ask, config, &ui).await,
        Some(Commands::Ask(args)) => commands::ask::run(args, config, &ui).await,
        Some(Commands::Check {
            command,
            explain,
            json,
            ..
        }) => commands::check::run(command, *explain, *json, config, &ui),
        Some(Commands::Rules { file, json }) => commands::rules::run(file.as_deref(), *json, config),
        Some(Commands::Config { show, path, set }) => {
            let file = config_file(cli.config.as_ref());
            commands::config_cmd::run(*show, *path, set.as_deref(), &file, config)
        }
        Some(Commands::Index { action }) => match action {
            IndexCommands::Build {
                nl,
                cm,
                out,
                batch_size,
                embedding,
            } => {
                let args = commands::index::BuildArgs {
                    nl,
                    cm,
                    out: out.as_deref(),
                    batch_size: *batch_size,
                    embedding: embedding.as_deref(),
                };
                commands::index::build(args, config, &ui).await
            }
            IndexCommands::Info { file } => commands::index::info(file.as_deref(), config),
        },
    }
}

fn config_file(explicit: Option<&PathBuf>) -> PathBuf {
    explicit
        .cloned()
        .unwrap_or_else(ShellmasterConfig::config_path)
}

/// `--config` replaces the file location; environment overrides apply either way.
pub fn load_config(explicit: Option<&PathBuf>) -> Result<ShellmasterConfig, ConfigError> {
    match explicit {
        Some(path) => {
            let mut config = ShellmasterConfig::load_from_path(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => ShellmasterConfig::load(),
    }
}

/// Arguments for the invocation log, with API keys removed.
pub fn redacted_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| {
            if arg.contains("api_key") {
                "<redacted>".to_string()
            } else {
                arg
            }
        })
        .collect()
}
