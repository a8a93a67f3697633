//! The Safety Gate: classifies a candidate as allow, warn or block.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::analysis::{analyze, Analysis};
use super::rules::{RuleId, RuleKind, RuleMatch, RuleSet, RulesError};
use crate::candidate::CandidateCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Warn,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Warn => "warn",
            Decision::Block => "block",
        }
    }

    pub fn indicator(&self) -> &'static str {
        match self {
            Decision::Allow => "[OK]",
            Decision::Warn => "[!]",
            Decision::Block => "[X]",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The gate's decision for exactly one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<RuleId>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: "No safety rule matched".to_string(),
            matched_rule: None,
        }
    }

    pub fn is_allow(&self) -> bool {
        self.decision == Decision::Allow
    }

    pub fn is_warn(&self) -> bool {
        self.decision == Decision::Warn
    }

    pub fn is_block(&self) -> bool {
        self.decision == Decision::Block
    }
}

/// Full evaluation, for `sm check` and the debug trace.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub analysis: Analysis,
    /// Every rule that matched, deny rules first
    pub matches: Vec<RuleMatch>,
}

/// Stateless evaluator over a shared, immutable rule set.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    rules: Arc<RuleSet>,
}

impl SafetyGate {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn builtin() -> Result<Self, RulesError> {
        Ok(Self::new(Arc::new(RuleSet::builtin()?)))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn evaluate(&self, candidate: &CandidateCommand) -> Verdict {
        self.evaluate_text(&candidate.text)
    }

    /// Deny rules in file order, then risky rules in file order; first hit wins.
    pub fn evaluate_text(&self, text: &str) -> Verdict {
        let text = text.trim();
        if text.is_empty() {
            return Verdict {
                decision: Decision::Block,
                reason: "Empty command".to_string(),
                matched_rule: None,
            };
        }

        let analysis = analyze(text);
        for kind in [RuleKind::Deny, RuleKind::Risky] {
            for rule in self.rules.of_kind(kind) {
                if let Some(hit) = rule.check(text, &analysis) {
                    debug!(rule = %hit.rule, detail = %hit.detail, "safety rule matched");
                    return verdict_for(kind, &rule.reason, hit.rule);
                }
            }
        }
        Verdict::allow()
    }

    /// Like `evaluate_text`, but reports every matching rule and the analysis.
    pub fn explain(&self, text: &str) -> Evaluation {
        let verdict = self.evaluate_text(text);
        let text = text.trim();
        let analysis = analyze(text);
        let matches = [RuleKind::Deny, RuleKind::Risky]
            .into_iter()
            .flat_map(|kind| self.rules.of_kind(kind))
            .filter_map(|rule| rule.check(text, &analysis))
            .collect();
        Evaluation {
            verdict,
            analysis,
            matches,
        }
    }
}

fn verdict_for(kind: RuleKind, reason: &str, rule: RuleId) -> Verdict {
    Verdict {
        decision: match kind {
            RuleKind::Deny => Decision::Block,
            RuleKind::Risky => Decision::Warn,
        },
        reason: reason.to_string(),
        matched_rule: Some(rule),
    }
}
