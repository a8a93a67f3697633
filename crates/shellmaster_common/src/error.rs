//! Error types for ShellMaster.
//!
//! `PipelineError` is the pipeline-level taxonomy. Stage-local errors
//! (backend transport, corpus parsing, rule compilation) are translated into
//! it at the stage boundary so callers never see raw transport errors.

use thiserror::Error;

use crate::safety::Verdict;

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// A single Scout fact could not be determined. Never fatal.
    #[error("Probe '{probe}' degraded: {reason}")]
    ProbeDegraded { probe: String, reason: String },

    /// The embedding backend could not be reached. Retrieval degrades to empty.
    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation backend failed for one attempt.
    #[error("Generation backend unavailable: {0}")]
    GenerationUnavailable(String),

    /// The candidate was blocked by the safety gate.
    #[error("Blocked by safety rule: {}", .0.reason)]
    SafetyBlocked(Verdict),

    /// Every attempt was blocked; carries the last block verdict.
    #[error("Retry budget of {attempts} attempt(s) exhausted; last block: {}", .last.reason)]
    RetryBudgetExceeded { attempts: u32, last: Verdict },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Rules error: {0}")]
    Rules(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable machine-readable code, used in the invocation log.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::ProbeDegraded { .. } => "probe_degraded",
            PipelineError::EmbeddingUnavailable(_) => "embedding_unavailable",
            PipelineError::GenerationUnavailable(_) => "generation_unavailable",
            PipelineError::SafetyBlocked(_) => "safety_blocked",
            PipelineError::RetryBudgetExceeded { .. } => "retry_budget_exceeded",
            PipelineError::Config(_) => "config",
            PipelineError::Corpus(_) => "corpus",
            PipelineError::Rules(_) => "rules",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// Whether this error ends the request in a safety rejection.
    pub fn is_safety_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::SafetyBlocked(_) | PipelineError::RetryBudgetExceeded { .. }
        )
    }

    /// Whether this error means a backend could not be reached.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            PipelineError::GenerationUnavailable(_) | PipelineError::EmbeddingUnavailable(_)
        )
    }
}
