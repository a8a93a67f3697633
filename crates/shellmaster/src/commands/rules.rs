//! sm rules - list the active safety rules

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::Path;

use shellmaster_common::safety::{Rule, RuleKind, RuleSet};
use shellmaster_common::ShellmasterConfig;

use super::Report;

pub fn run(file: Option<&Path>, json_output: bool, config: &ShellmasterConfig) -> Result<Report> {
    let path = file.or(config.safety.rules_path.as_deref());
    let rules = RuleSet::load(path).context("Failed to load safety rules")?;

    if json_output {
        let value = json!({
            "version": rules.version(),
            "source": path.map(|p| p.display().to_string()).unwrap_or_else(|| "built-in".to_string()),
            "rules": rules.rules().iter().map(rule_json).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to encode rules")?
        );
        return Ok(Report::success("listed"));
    }

    match path {
        Some(path) => println!("Rules from {} (version {})", path.display(), rules.version()),
        None => println!("Built-in rules (version {})", rules.version()),
    }
    for (kind, title) in [(RuleKind::Deny, "Deny (block)"), (RuleKind::Risky, "Risky (warn)")] {
        println!();
        println!("{}", title.bold());
        let mut any = false;
        for rule in rules.of_kind(kind) {
            any = true;
            println!(
                "  {:<28} {:<14} {}",
                rule.id.as_str(),
                rule.spec.type_name(),
                rule.reason
            );
        }
        if !any {
            println!("  none");
        }
    }
    Ok(Report::success("listed"))
}

fn rule_json(rule: &Rule) -> serde_json::Value {
    json!({
        "id": rule.id,
        "kind": rule.kind,
        "reason": rule.reason,
        "match": rule.spec,
    })
}
