//! Safety Gate.
//!
//! Every candidate command passes through here before it is shown to the
//! user. The gate parses the command structurally (see `analysis`), runs the
//! ordered rule list (see `rules`) and returns a `Verdict`. A `block`
//! verdict means the candidate text is never surfaced as a suggestion.

pub mod analysis;
pub mod gate;
pub mod lexer;
pub mod rules;

pub use analysis::{analyze, Analysis, SimpleCommand};
pub use gate::{Decision, Evaluation, SafetyGate, Verdict};
pub use rules::{MatchSpec, Rule, RuleId, RuleKind, RuleMatch, RuleSet, RulesError};
