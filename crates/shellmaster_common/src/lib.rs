//! ShellMaster Common - natural language to one safe shell command.
//!
//! Scout grounds generation in host facts, the Knowledge Store anchors it to
//! known-good commands, and the Safety Gate stands between the backend and
//! the user.

pub mod candidate;
pub mod config;
pub mod error;
pub mod fast_path;
pub mod knowledge;
pub mod llm_client;
pub mod pipeline;
pub mod prompts;
pub mod request;
pub mod safety;
pub mod scout;
pub mod text;
pub mod trace;

pub use candidate::{CandidateCommand, SourceStage};
pub use config::ShellmasterConfig;
pub use error::PipelineError;
pub use pipeline::{Accepted, Outcome, Pipeline, PipelineOptions, Rejection};
pub use request::{Locale, Request};
pub use safety::{Decision, SafetyGate, Verdict};
pub use scout::{HostProfile, Scout};
pub use trace::{Stage, Trace};
