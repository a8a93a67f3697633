//! Command handlers for sm

pub mod ask;
pub mod check;
pub mod config_cmd;
pub mod index;
pub mod rules;

use shellmaster_common::PipelineError;

use crate::errors::EXIT_SUCCESS;
use crate::logging::ErrorDetails;

/// What a command did, for the exit status and the invocation log
#[derive(Debug, Clone)]
pub struct Report {
    pub exit_code: i32,
    pub outcome: String,
    pub request_id: Option<String>,
    pub error: Option<ErrorDetails>,
}

impl Report {
    pub fn success(outcome: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_SUCCESS,
            outcome: outcome.into(),
            request_id: None,
            error: None,
        }
    }

    pub fn failed(exit_code: i32, error: &PipelineError) -> Self {
        Self {
            exit_code,
            outcome: error.code().to_string(),
            request_id: None,
            error: Some(ErrorDetails {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}
