//! Candidate commands and backend response parsing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::text::{cached_regex, strip_code_fences};

/// Which pipeline stage produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStage {
    Generate,
    Retry,
    FastPath,
}

impl SourceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStage::Generate => "generate",
            SourceStage::Retry => "retry",
            SourceStage::FastPath => "fast_path",
        }
    }
}

impl fmt::Display for SourceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCommand {
    pub text: String,
    pub rationale: String,
    pub source_stage: SourceStage,
}

impl CandidateCommand {
    pub fn new(text: impl Into<String>, rationale: impl Into<String>, source_stage: SourceStage) -> Self {
        Self {
            text: text.into().trim().to_string(),
            rationale: rationale.into().trim().to_string(),
            source_stage,
        }
    }
}

static OBJECT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TRAILING_COMMA_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Parse a raw backend response into a candidate.
///
/// Accepts `{"command": ..., "rationale": ...}` (optionally fenced, with
/// trailing commas or single quotes), else takes the first non-empty,
/// non-comment line as the command. Returns `None` when no command text
/// remains.
pub fn parse_response(raw: &str, stage: SourceStage) -> Option<CandidateCommand> {
    let body = strip_code_fences(raw);

    if let Some((command, rationale)) = parse_json_object(body) {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        return Some(CandidateCommand::new(command, rationale, stage));
    }

    let line = body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?;
    let line = line.strip_prefix("$ ").unwrap_or(line).trim();
    if line.is_empty() {
        return None;
    }
    Some(CandidateCommand::new(line, "", stage))
}

fn parse_json_object(body: &str) -> Option<(String, String)> {
    let object = cached_regex(&OBJECT_RE, r"(?s)\{.*\}")?.find(body)?.as_str();

    let value: serde_json::Value = serde_json::from_str(object)
        .ok()
        .or_else(|| {
            let repaired = cached_regex(&TRAILING_COMMA_RE, r",\s*([}\]])")?
                .replace_all(object, "$1")
                .into_owned();
            serde_json::from_str(&repaired)
                .ok()
                .or_else(|| serde_json::from_str(&repaired.replace('\'', "\"")).ok())
        })?;

    let command = value.get("command")?.as_str()?.to_string();
    let rationale = value
        .get("rationale")
        .or_else(|| value.get("explanation"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some((command, rationale))
}
