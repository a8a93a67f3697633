//! sm config - show or change configuration

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use shellmaster_common::ShellmasterConfig;

use super::Report;

const MASK: &str = "********";

pub fn run(
    show: bool,
    print_path: bool,
    set: Option<&str>,
    config_file: &Path,
    effective: &ShellmasterConfig,
) -> Result<Report> {
    if print_path {
        println!("{}", config_file.display());
        if !show && set.is_none() {
            return Ok(Report::success("path"));
        }
    }

    if let Some(assignment) = set {
        let (key, value) = parse_assignment(assignment)?;
        // Only the file's own values are written back, never env overrides.
        let mut on_disk = ShellmasterConfig::load_from_path(config_file)
            .with_context(|| format!("Failed to read {}", config_file.display()))?;
        on_disk
            .set(key, value)
            .with_context(|| format!("Cannot set {}", key))?;
        on_disk
            .save_to_path(config_file)
            .context("Failed to save config")?;
        println!("Set {} = {} in {}", key, display_value(key, value), config_file.display());
        if !show {
            return Ok(Report::success("set"));
        }
    }

    print!("{}", render(effective)?);
    Ok(Report::success("shown"))
}

/// Split `key=value`; the key must be non-empty.
pub fn parse_assignment(assignment: &str) -> Result<(&str, &str)> {
    let (key, value) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got `{}`", assignment))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Expected KEY=VALUE, got `{}`", assignment));
    }
    Ok((key, value.trim()))
}

/// Effective configuration as TOML with the API key masked.
pub fn render(config: &ShellmasterConfig) -> Result<String> {
    let mut shown = config.clone();
    shown.backend.api_key = mask(&shown.backend.api_key);
    toml::to_string_pretty(&shown).context("Failed to render config")
}

fn mask(api_key: &str) -> String {
    if api_key.is_empty() || api_key == "EMPTY" {
        api_key.to_string()
    } else {
        MASK.to_string()
    }
}

fn display_value(key: &str, value: &str) -> String {
    if key == "backend.api_key" {
        mask(value)
    } else {
        value.to_string()
    }
}
