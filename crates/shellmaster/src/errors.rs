//! Exit codes for sm

use shellmaster_common::{Decision, PipelineError};

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for general errors (config, corpus, I/O)
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Exit code clap uses for usage errors
pub const EXIT_USAGE: i32 = 2;

/// Exit code when the safety gate rejected the request or command
pub const EXIT_BLOCKED: i32 = 64;

/// Exit code when a backend is unavailable/unreachable
pub const EXIT_BACKEND_UNAVAILABLE: i32 = 70;

/// Exit code after Ctrl-C
pub const EXIT_CANCELLED: i32 = 130;

pub fn exit_code_for(error: &PipelineError) -> i32 {
    match error {
        PipelineError::SafetyBlocked(_) | PipelineError::RetryBudgetExceeded { .. } => EXIT_BLOCKED,
        PipelineError::GenerationUnavailable(_) | PipelineError::EmbeddingUnavailable(_) => {
            EXIT_BACKEND_UNAVAILABLE
        }
        PipelineError::Cancelled => EXIT_CANCELLED,
        PipelineError::ProbeDegraded { .. }
        | PipelineError::Config(_)
        | PipelineError::Corpus(_)
        | PipelineError::Rules(_) => EXIT_GENERAL_ERROR,
    }
}

/// Exit code of `sm check`: only a block fails.
pub fn exit_code_for_decision(decision: Decision) -> i32 {
    match decision {
        Decision::Allow | Decision::Warn => EXIT_SUCCESS,
        Decision::Block => EXIT_BLOCKED,
    }
}
