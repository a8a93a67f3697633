//! sm ask - natural language to one checked command

use anyhow::{Context, Result};
use serde_json::json;
use std::io::{self, Write};
use tracing::info;

use shellmaster_common::pipeline::{Accepted, Rejection};
use shellmaster_common::{Decision, Outcome, Pipeline, Request, ShellmasterConfig};

use super::Report;
use crate::cli::AskArgs;
use crate::display::Ui;
use crate::errors::{exit_code_for, EXIT_GENERAL_ERROR, EXIT_SUCCESS, EXIT_USAGE};

pub async fn run(args: &AskArgs, config: &ShellmasterConfig, ui: &Ui) -> Result<Report> {
    let text = args.text();
    if text.is_empty() {
        eprintln!("Nothing to do. Try: sm show disk usage");
        return Ok(Report::success("empty_request").with_exit_code(EXIT_USAGE));
    }

    let pipeline = Pipeline::from_config(config).context("Failed to set up the pipeline")?;
    let request = Request::new(text)
        .with_locale(args.locale)
        .with_debug(args.debug);
    let request_id = request.request_id.clone();

    let spinner = ui.spinner("thinking...");
    let result = pipeline.run_until(&request, ctrl_c()).await;
    spinner.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(Report::failed(exit_code_for(&e), &e).with_request_id(request_id));
        }
    };

    if args.json {
        println!("{}", outcome_json(&outcome)?);
    } else {
        match &outcome {
            Outcome::Accepted(accepted) => ui.print_accepted(accepted),
            Outcome::Rejected(rejection) => ui.print_rejected(rejection),
        }
        if args.debug {
            if let Some(trace) = outcome.trace() {
                ui.print_trace(trace);
            }
        }
    }

    let report = match &outcome {
        Outcome::Accepted(accepted) if args.run => {
            let (exit_code, label) = confirm_and_run(accepted).await?;
            Report::success(label).with_exit_code(exit_code)
        }
        Outcome::Accepted(_) => Report::success(outcome.label()),
        Outcome::Rejected(rejection) => Report::failed(exit_code_for(&rejection.error), &rejection.error),
    };
    Ok(report.with_request_id(request_id))
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn outcome_json(outcome: &Outcome) -> Result<String> {
    let value = match outcome {
        Outcome::Accepted(accepted) => accepted_json(accepted)?,
        Outcome::Rejected(rejection) => rejected_json(rejection),
    };
    serde_json::to_string_pretty(&value).context("Failed to encode outcome")
}

fn accepted_json(accepted: &Accepted) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(accepted).context("Failed to encode outcome")?;
    if let Some(map) = value.as_object_mut() {
        map.insert("outcome".to_string(), json!("accepted"));
    }
    Ok(value)
}

fn rejected_json(rejection: &Rejection) -> serde_json::Value {
    json!({
        "outcome": "rejected",
        "error": rejection.error.code(),
        "reason": rejection.reason,
        "matched_rule": rejection.matched_rule,
        "attempts": rejection.attempts,
        "trace": rejection.trace,
    })
}

/// `y`/`yes` confirms an allowed command; a warned command needs the
/// literal word `yes`.
pub fn confirmation_accepted(decision: Decision, answer: &str) -> bool {
    let answer = answer.trim();
    match decision {
        Decision::Allow => matches!(answer.to_lowercase().as_str(), "y" | "yes"),
        Decision::Warn => answer == "yes",
        Decision::Block => false,
    }
}

async fn confirm_and_run(accepted: &Accepted) -> Result<(i32, &'static str)> {
    let decision = accepted.verdict.decision;
    if decision == Decision::Warn {
        eprint!("Type `yes` to run this command anyway: ");
    } else {
        eprint!("Run it? [y/N] ");
    }
    io::stderr().flush().ok();

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;

    if !confirmation_accepted(decision, &answer) {
        eprintln!("Not run.");
        return Ok((EXIT_SUCCESS, "declined"));
    }

    info!(command = %accepted.candidate.text, "running accepted command");
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&accepted.candidate.text)
        .status()
        .await
        .context("Failed to start sh")?;
    Ok((status.code().unwrap_or(EXIT_GENERAL_ERROR), "executed"))
}
