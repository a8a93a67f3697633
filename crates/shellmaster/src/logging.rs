//! Logging for sm invocations
//!
//! Two sinks: a `tracing` fmt subscriber on stderr for diagnostics, and one
//! JSONL line per invocation appended to the state directory.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Log entry for each sm invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationLog {
    /// ISO 8601 timestamp
    pub ts: String,

    pub request_id: String,

    /// Command name (ask, check, rules, config, index)
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Outcome label, e.g. `accepted` or `retry_budget_exceeded`
    pub outcome: String,

    pub exit_code: i32,

    pub duration_ms: u64,

    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl InvocationLog {
    /// Discover log file path with fallback chain
    ///
    /// Priority:
    /// 1. $SHELLMASTER_LOG_FILE (explicit override)
    /// 2. $XDG_STATE_HOME/shellmaster/sm.jsonl
    /// 3. ~/.local/state/shellmaster/sm.jsonl
    pub fn discover_log_path<F>(lookup: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty("SHELLMASTER_LOG_FILE") {
            return Some(PathBuf::from(path));
        }
        if let Some(state) = non_empty("XDG_STATE_HOME") {
            return Some(Path::new(&state).join("shellmaster").join("sm.jsonl"));
        }
        non_empty("HOME").map(|home| {
            Path::new(&home)
                .join(".local/state")
                .join("shellmaster")
                .join("sm.jsonl")
        })
    }

    /// Append to the discovered log file. Failures are ignored.
    pub fn write(&self) {
        if let Some(path) = Self::discover_log_path(|key| std::env::var(key).ok()) {
            if let Err(e) = self.write_to_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "invocation log not written");
            }
        }
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    pub fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `--debug`, which wins
/// over `log.level`.
pub fn init_tracing(level: &str, debug: bool) {
    let fallback = if debug { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_path_fallback_chain() {
        assert_eq!(
            InvocationLog::discover_log_path(env(&[
                ("SHELLMASTER_LOG_FILE", "/tmp/sm.log"),
                ("XDG_STATE_HOME", "/state"),
            ])),
            Some(PathBuf::from("/tmp/sm.log"))
        );
        assert_eq!(
            InvocationLog::discover_log_path(env(&[("XDG_STATE_HOME", "/state"), ("HOME", "/home/u")])),
            Some(PathBuf::from("/state/shellmaster/sm.jsonl"))
        );
        assert_eq!(
            InvocationLog::discover_log_path(env(&[("XDG_STATE_HOME", ""), ("HOME", "/home/u")])),
            Some(PathBuf::from("/home/u/.local/state/shellmaster/sm.jsonl"))
        );
        assert_eq!(InvocationLog::discover_log_path(env(&[])), None);
    }
}
