//! Generation prompt building.
//!
//! The user prompt carries the request, the host fact sheet and the
//! reference commands. When retrieval came back empty the prompt says so and
//! says why, so the backend never assumes references it was not given.

use serde::{Deserialize, Serialize};

use crate::candidate::CandidateCommand;
use crate::knowledge::RetrievalResult;
use crate::request::Locale;
use crate::safety::Verdict;
use crate::scout::HostProfile;
use crate::text::truncate_chars;

/// Upper bound on the user prompt, in characters
pub const MAX_PROMPT_CHARS: usize = 8_000;

/// Reference descriptions and commands are cut to this many characters
const MAX_REFERENCE_CHARS: usize = 300;

const SYSTEM_PROMPT: &str = r#"You translate a request into ONE shell command for the Linux host described below.

Rules:
1. Use only tools listed as installed. Never use a tool listed as NOT installed.
2. Use the real paths and mount points from the host facts. Do not invent paths.
3. Prefer the reference commands when they fit the request; adapt their arguments.
4. Never produce destructive commands (recursive deletion of system paths, formatting disks, writing to block devices).
5. Output a single command line. Chain with && or | if needed, but no scripts.

Reply with JSON only:
{"command": "<the shell command>", "rationale": "<one sentence>"}"#;

/// A complete prompt for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// A blocked earlier attempt, fed back on RETRY.
#[derive(Debug, Clone)]
pub struct RetryFeedback<'a> {
    pub previous: Option<&'a CandidateCommand>,
    /// Block verdict, or `None` when the previous attempt produced nothing usable
    pub verdict: Option<&'a Verdict>,
    pub failure: Option<&'a str>,
}

fn locale_instruction(locale: Locale) -> &'static str {
    match locale {
        Locale::Zh => "Write the rationale in Simplified Chinese.",
        Locale::En | Locale::Auto => "Write the rationale in English.",
    }
}

fn references_section(retrieval: &RetrievalResult) -> String {
    if let Some(reason) = retrieval.empty_reason().filter(|_| retrieval.is_empty()) {
        return format!(
            "=== REFERENCE COMMANDS ===\nNo reference commands available: {}.\nRely on the host facts only.",
            reason
        );
    }

    let mut section = String::from("=== REFERENCE COMMANDS (most similar first) ===");
    for (i, scored) in retrieval.entries.iter().enumerate() {
        section.push_str(&format!(
            "\n{}. [{:.2}] {}\n   $ {}",
            i + 1,
            scored.similarity,
            truncate_chars(&scored.entry.description, MAX_REFERENCE_CHARS),
            truncate_chars(&scored.entry.command_template, MAX_REFERENCE_CHARS),
        ));
    }
    section
}

fn retry_section(feedback: &RetryFeedback<'_>) -> String {
    let mut section = String::from("=== PREVIOUS ATTEMPT REJECTED ===");
    if let Some(previous) = feedback.previous {
        section.push_str(&format!("\nPrevious command: {}", previous.text));
    }
    if let Some(verdict) = feedback.verdict {
        section.push_str(&format!("\nBlocked because: {}", verdict.reason));
        if let Some(rule) = &verdict.matched_rule {
            section.push_str(&format!(" (rule {})", rule));
        }
    }
    if let Some(failure) = feedback.failure {
        section.push_str(&format!("\nThe previous attempt failed: {}", failure));
    }
    section.push_str("\nProduce a different, safe command that still fulfils the request.");
    section
}

/// Build the prompt for one attempt. `retry` is set on every attempt after the first.
pub fn build_prompt(
    request_text: &str,
    locale: Locale,
    profile: &HostProfile,
    retrieval: &RetrievalResult,
    retry: Option<&RetryFeedback<'_>>,
) -> Prompt {
    let head = format!("=== REQUEST ===\n{}", request_text.trim());
    let facts = format!("=== HOST FACTS ===\n{}", profile.summary());
    let mut tail = String::new();
    if let Some(feedback) = retry {
        tail.push_str("\n\n");
        tail.push_str(&retry_section(feedback));
    }
    tail.push_str("\n\n");
    tail.push_str(locale_instruction(locale));

    // References are the part that gets cut when the prompt is too long
    let fixed = head.chars().count() + facts.chars().count() + tail.chars().count() + 4;
    let budget = MAX_PROMPT_CHARS.saturating_sub(fixed);
    let references = truncate_chars(&references_section(retrieval), budget);

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user: format!("{}\n\n{}\n\n{}{}", head, facts, references, tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::SourceStage;
    use crate::knowledge::{KnowledgeEntry, RetrievalStatus, ScoredEntry};
    use crate::safety::{Decision, RuleId};

    fn retrieval_with(command: &str) -> RetrievalResult {
        RetrievalResult {
            entries: vec![ScoredEntry {
                entry: KnowledgeEntry {
                    id: "nl2bash-1".to_string(),
                    description: "show disk usage of mounted drives".to_string(),
                    command_template: command.to_string(),
                },
                similarity: 0.82,
            }],
            status: RetrievalStatus::Ok,
        }
    }

    #[test]
    fn test_prompt_lists_references() {
        let prompt = build_prompt(
            "show free space on disk named LENOVO",
            Locale::En,
            &HostProfile::default(),
            &retrieval_with("df -h /media/$USER/LABEL"),
            None,
        );
        assert!(prompt.system.contains("\"command\""));
        assert!(prompt.user.contains("df -h /media/$USER/LABEL"));
        assert!(prompt.user.contains("[0.82]"));
        assert!(!prompt.user.contains("No reference commands"));
    }

    #[test]
    fn test_empty_retrieval_is_stated_with_reason() {
        let prompt = build_prompt(
            "list files",
            Locale::En,
            &HostProfile::default(),
            &RetrievalResult::degraded("embedding backend unreachable"),
            None,
        );
        assert!(prompt
            .user
            .contains("No reference commands available: embedding backend unreachable."));
    }

    #[test]
    fn test_retry_carries_previous_candidate_and_reason() {
        let previous = CandidateCommand::new("rm -rf /", "", SourceStage::Generate);
        let verdict = Verdict {
            decision: Decision::Block,
            reason: "Recursive deletion of the root filesystem".to_string(),
            matched_rule: Some(RuleId::new("rm-recursive-root")),
        };
        let feedback = RetryFeedback {
            previous: Some(&previous),
            verdict: Some(&verdict),
            failure: None,
        };
        let prompt = build_prompt(
            "delete everything in /",
            Locale::Zh,
            &HostProfile::default(),
            &RetrievalResult::empty("corpus not loaded"),
            Some(&feedback),
        );
        assert!(prompt.user.contains("Previous command: rm -rf /"));
        assert!(prompt.user.contains("rule rm-recursive-root"));
        assert!(prompt.user.contains("Simplified Chinese"));
    }

    #[test]
    fn test_prompt_respects_size_cap() {
        let mut retrieval = retrieval_with("x");
        let long = "a".repeat(5_000);
        for _ in 0..20 {
            retrieval.entries.push(ScoredEntry {
                entry: KnowledgeEntry {
                    id: "long".to_string(),
                    description: long.clone(),
                    command_template: long.clone(),
                },
                similarity: 0.5,
            });
        }
        let prompt = build_prompt("q", Locale::En, &HostProfile::default(), &retrieval, None);
        assert!(prompt.user.chars().count() <= MAX_PROMPT_CHARS + 8);
    }
}
