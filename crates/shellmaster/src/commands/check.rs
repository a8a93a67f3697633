//! sm check - run a command line through the safety gate

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;

use shellmaster_common::safety::RuleSet;
use shellmaster_common::{PipelineError, SafetyGate, ShellmasterConfig};

use super::Report;
use crate::display::Ui;
use crate::errors::exit_code_for_decision;

pub fn run(
    words: &[String],
    explain: bool,
    json_output: bool,
    config: &ShellmasterConfig,
    ui: &Ui,
) -> Result<Report> {
    let text = join_words(words);
    let rules = RuleSet::load(config.safety.rules_path.as_deref())
        .context("Failed to load safety rules")?;
    let gate = SafetyGate::new(Arc::new(rules));

    let verdict = if json_output || explain {
        let evaluation = gate.explain(&text);
        if json_output {
            let value = json!({
                "command": text,
                "verdict": evaluation.verdict,
                "matches": evaluation.matches,
                "parseable": evaluation.analysis.is_parseable(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("Failed to encode verdict")?
            );
        } else {
            ui.print_evaluation(&evaluation);
        }
        evaluation.verdict
    } else {
        let verdict = gate.evaluate_text(&text);
        ui.print_verdict(&verdict);
        verdict
    };

    let exit_code = exit_code_for_decision(verdict.decision);
    let outcome = verdict.decision.as_str();
    Ok(if verdict.is_block() {
        Report::failed(exit_code, &PipelineError::SafetyBlocked(verdict))
    } else {
        Report::success(outcome)
    })
}

/// Rebuild a command line from shell-split words. A single word is taken
/// verbatim; otherwise words that need it are single-quoted again.
pub fn join_words(words: &[String]) -> String {
    if let [single] = words {
        return single.trim().to_string();
    }
    words
        .iter()
        .map(|word| {
            let plain = !word.is_empty()
                && word
                    .chars()
                    .all(|c| c.is_alphanumeric() || "-_./~=:,+@%^*".contains(c));
            if plain {
                word.clone()
            } else {
                format!("'{}'", word.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
