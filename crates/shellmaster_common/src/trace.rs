//! Debug trace of a pipeline run.
//!
//! Append-only. Records the full input and output of every stage so a run
//! can be audited after the fact. Only built when the request asks for
//! debug output, and never read by the pipeline itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pipeline stage that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Scout,
    Retrieve,
    Generate,
    SafetyCheck,
    Retry,
    Accept,
    Reject,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Scout => "scout",
            Stage::Retrieve => "retrieve",
            Stage::Generate => "generate",
            Stage::SafetyCheck => "safety_check",
            Stage::Retry => "retry",
            Stage::Accept => "accept",
            Stage::Reject => "reject",
        }
    }

    /// Whether the run ends in this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Accept | Stage::Reject)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Position in the trace, starting at 0
    pub seq: u32,
    pub stage: Stage,
    pub input: Value,
    pub output: Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    records: Vec<TraceRecord>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage, input: Value, output: Value) {
        self.push_at(stage, input, output, Utc::now());
    }

    /// Append a record for a stage that finished at `at`, earlier than now.
    pub fn push_at(&mut self, stage: Stage, input: Value, output: Value, at: DateTime<Utc>) {
        let seq = self.records.len() as u32;
        self.records.push(TraceRecord {
            seq,
            stage,
            input,
            output,
            at,
        });
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stage of every record, in order
    pub fn stages(&self) -> Vec<Stage> {
        self.records.iter().map(|r| r.stage).collect()
    }

    /// Records of one stage, in order
    pub fn of_stage(&self, stage: Stage) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter().filter(move |r| r.stage == stage)
    }

    /// Stage, input and output of every record; timestamps dropped.
    /// Two runs over the same inputs have equal fingerprints.
    pub fn fingerprint(&self) -> Vec<(Stage, Value, Value)> {
        self.records
            .iter()
            .map(|r| (r.stage, r.input.clone(), r.output.clone()))
            .collect()
    }
}

impl std::fmt::Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for record in &self.records {
            writeln!(f, "[{:>2}] {} {}", record.seq, record.at.format("%H:%M:%S%.3f"), record.stage)?;
            writeln!(f, "     in:  {}", record.input)?;
            writeln!(f, "     out: {}", record.output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_assigns_sequence() {
        let mut trace = Trace::new();
        trace.push(Stage::Start, json!({"text": "pwd"}), Value::Null);
        trace.push(Stage::Scout, Value::Null, json!({"os_family": "debian"}));
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.records()[1].seq, 1);
        assert_eq!(trace.stages(), vec![Stage::Start, Stage::Scout]);
    }

    #[test]
    fn test_fingerprint_ignores_time() {
        let mut a = Trace::new();
        let mut b = Trace::new();
        a.push(Stage::Accept, json!(1), json!(2));
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.push(Stage::Accept, json!(1), json!(2));
        assert_ne!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(serde_json::to_string(&Stage::SafetyCheck).unwrap(), "\"safety_check\"");
        assert!(Stage::Reject.is_terminal());
        assert!(!Stage::Retry.is_terminal());
    }
}
