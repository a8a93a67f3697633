//! Orchestration pipeline.
//!
//! START -> SCOUT || RETRIEVE -> GENERATE -> SAFETY_CHECK -> ACCEPT | RETRY | REJECT
//!
//! SCOUT and RETRIEVE run concurrently. Every candidate is checked by the
//! safety gate. A block, a backend failure or an empty response consumes one
//! unit of the retry budget; a warning never does. The debug trace is
//! written alongside and never read back.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::candidate::{parse_response, CandidateCommand, SourceStage};
use crate::config::ShellmasterConfig;
use crate::error::PipelineError;
use crate::fast_path;
use crate::knowledge::{embedder_from_config, KnowledgeStore, RetrievalResult};
use crate::llm_client::{GenerationBackend, HttpLlmClient};
use crate::prompts::{build_prompt, RetryFeedback};
use crate::request::{Locale, Request};
use crate::safety::{RuleId, RuleSet, SafetyGate, Verdict};
use crate::scout::{HostProfile, RequestHint, Scout};
use crate::trace::{Stage, Trace};

/// Tunables for one pipeline instance
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Extra attempts after the first
    pub retry_budget: u32,
    pub top_k: usize,
    pub fast_path: bool,
    pub generation_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retry_budget: 1,
            top_k: 5,
            fast_path: true,
            generation_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &ShellmasterConfig) -> Self {
        Self {
            retry_budget: config.pipeline.effective_retry_budget(),
            top_k: config.retrieval.effective_top_k(),
            fast_path: config.pipeline.fast_path,
            generation_timeout: config.pipeline.generation_timeout(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        1 + self.retry_budget
    }
}

/// A command the caller may show (and, after confirmation, run).
#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub candidate: CandidateCommand,
    /// `allow` or `warn`; never `block`
    pub verdict: Verdict,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
}

/// The request ended without a usable command. Holds an explanation only:
/// a blocked command's text is never part of it.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: String,
    pub matched_rule: Option<RuleId>,
    pub error: PipelineError,
    pub attempts: u32,
    pub trace: Option<Trace>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Accepted(Accepted),
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    pub fn trace(&self) -> Option<&Trace> {
        match self {
            Outcome::Accepted(a) => a.trace.as_ref(),
            Outcome::Rejected(r) => r.trace.as_ref(),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Accepted(a) => a.attempts,
            Outcome::Rejected(r) => r.attempts,
        }
    }

    /// Short outcome label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Accepted(a) if a.verdict.is_warn() => "accepted_with_warning",
            Outcome::Accepted(_) => "accepted",
            Outcome::Rejected(r) => r.error.code(),
        }
    }
}

/// Why the previous attempt did not produce an accepted command
enum LastFailure {
    Blocked {
        candidate: CandidateCommand,
        verdict: Verdict,
    },
    Failed(String),
}

impl LastFailure {
    fn feedback(&self) -> RetryFeedback<'_> {
        match self {
            LastFailure::Blocked { candidate, verdict } => RetryFeedback {
                previous: Some(candidate),
                verdict: Some(verdict),
                failure: None,
            },
            LastFailure::Failed(reason) => RetryFeedback {
                previous: None,
                verdict: None,
                failure: Some(reason),
            },
        }
    }
}

fn record(trace: &mut Option<Trace>, stage: Stage, input: Value, output: Value) {
    if let Some(trace) = trace.as_mut() {
        trace.push(stage, input, output);
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// One pipeline per process; every request gets its own run.
pub struct Pipeline {
    backend: Arc<dyn GenerationBackend>,
    store: Arc<KnowledgeStore>,
    scout: Scout,
    gate: SafetyGate,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        store: Arc<KnowledgeStore>,
        scout: Scout,
        gate: SafetyGate,
        options: PipelineOptions,
    ) -> Self {
        Self {
            backend,
            store,
            scout,
            gate,
            options,
        }
    }

    /// Wire up the HTTP backends, corpus, probes and rules from config.
    pub fn from_config(config: &ShellmasterConfig) -> Result<Self, PipelineError> {
        let options = PipelineOptions::from_config(config);
        let backend = HttpLlmClient::new(&config.backend, options.generation_timeout)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let embedder = embedder_from_config(config).map_err(|e| PipelineError::Config(e.to_string()))?;
        let store = KnowledgeStore::load(
            &config.retrieval.corpus_path,
            embedder,
            config.retrieval.effective_min_similarity(),
        )
        .map_err(|e| PipelineError::Corpus(e.to_string()))?;
        let rules = RuleSet::load(config.safety.rules_path.as_deref())
            .map_err(|e| PipelineError::Rules(e.to_string()))?;

        Ok(Self::new(
            Arc::new(backend),
            Arc::new(store),
            Scout::builtin(config.scout.probe_timeout()),
            SafetyGate::new(Arc::new(rules)),
            options,
        ))
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Run a request to completion.
    pub async fn run(&self, request: &Request) -> Outcome {
        let span = info_span!("pipeline", request_id = %request.request_id);
        self.run_inner(request).instrument(span).await
    }

    /// Run a request until it completes or `signal` resolves, whichever is
    /// first. On cancellation the in-flight backend call is dropped.
    pub async fn run_until<F>(&self, request: &Request, signal: F) -> Result<Outcome, PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            outcome = self.run(request) => Ok(outcome),
            _ = signal => {
                warn!(request_id = %request.request_id, "Request cancelled");
                Err(PipelineError::Cancelled)
            }
        }
    }

    async fn run_inner(&self, request: &Request) -> Outcome {
        let mut trace = request.debug.then(Trace::new);
        let locale = request.effective_locale();
        info!(locale = %locale, "pipeline start");

        record(
            &mut trace,
            Stage::Start,
            json!({ "text": request.text, "locale": request.locale, "debug": request.debug }),
            json!({ "request_id": request.request_id, "locale": locale }),
        );

        let (profile, retrieval) = self.gather(request, &mut trace).await;

        let fast = if self.options.fast_path {
            fast_path::lookup(&request.text)
        } else {
            None
        };

        let max_attempts = self.options.max_attempts();
        let mut last: Option<LastFailure> = None;

        for attempt in 1..=max_attempts {
            let stage = if attempt == 1 {
                SourceStage::Generate
            } else {
                SourceStage::Retry
            };

            let generated = match (attempt, &fast) {
                (1, Some(candidate)) => {
                    debug!(command = %candidate.text, "fast path");
                    record(
                        &mut trace,
                        Stage::Generate,
                        json!({ "attempt": attempt, "source_stage": SourceStage::FastPath }),
                        json!({ "candidate": candidate }),
                    );
                    Ok(candidate.clone())
                }
                _ => {
                    self.generate(request, locale, &profile, &retrieval, attempt, stage, last.as_ref(), &mut trace)
                        .await
                }
            };

            let candidate = match generated {
                Ok(candidate) => candidate,
                Err(reason) => {
                    warn!(attempt, "Generation attempt failed: {}", reason);
                    if attempt < max_attempts {
                        record(
                            &mut trace,
                            Stage::Retry,
                            json!({ "attempt": attempt }),
                            json!({ "cause": "generation_failed", "reason": reason }),
                        );
                        last = Some(LastFailure::Failed(reason));
                        continue;
                    }
                    return self.reject(PipelineError::GenerationUnavailable(reason), attempt, trace);
                }
            };

            let verdict = self.gate.evaluate(&candidate);
            record(
                &mut trace,
                Stage::SafetyCheck,
                json!({ "command": candidate.text }),
                to_value(&verdict),
            );

            if !verdict.is_block() {
                info!(decision = %verdict.decision, attempts = attempt, "candidate accepted");
                record(
                    &mut trace,
                    Stage::Accept,
                    json!({ "attempt": attempt }),
                    json!({ "candidate": candidate, "verdict": verdict }),
                );
                return Outcome::Accepted(Accepted {
                    candidate,
                    verdict,
                    attempts: attempt,
                    trace,
                });
            }

            warn!(attempt, rule = ?verdict.matched_rule, "Candidate blocked: {}", verdict.reason);
            if attempt < max_attempts {
                record(
                    &mut trace,
                    Stage::Retry,
                    json!({ "attempt": attempt }),
                    json!({ "cause": "blocked", "verdict": verdict }),
                );
                last = Some(LastFailure::Blocked { candidate, verdict });
                continue;
            }
            return self.reject(
                PipelineError::RetryBudgetExceeded {
                    attempts: attempt,
                    last: verdict,
                },
                attempt,
                trace,
            );
        }

        // max_attempts >= 1, so the loop always returns
        self.reject(
            PipelineError::GenerationUnavailable("no generation attempt was made".to_string()),
            0,
            trace,
        )
    }

    /// SCOUT and RETRIEVE side by side. Records go into the trace in
    /// completion order.
    async fn gather(&self, request: &Request, trace: &mut Option<Trace>) -> (HostProfile, RetrievalResult) {
        let hint = RequestHint::from_text(&request.text);
        let finished = AtomicUsize::new(0);
        let k = self.options.top_k;

        let scout = async {
            let profile = self.scout.probe(&hint).await;
            (profile, finished.fetch_add(1, Ordering::SeqCst), Utc::now())
        };
        let retrieve = async {
            let result = match self.store.query(&request.text, k).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Retrieval degraded: {}", e);
                    RetrievalResult::degraded(e.to_string())
                }
            };
            (result, finished.fetch_add(1, Ordering::SeqCst), Utc::now())
        };

        let ((profile, scout_done, scout_at), (retrieval, retrieve_done, retrieve_at)) =
            tokio::join!(scout, retrieve);
        debug!(
            degraded = profile.degraded.len(),
            references = retrieval.len(),
            "scout and retrieval finished"
        );

        let scout_record = (Stage::Scout, to_value(&hint), to_value(&profile), scout_at);
        let retrieve_record = (
            Stage::Retrieve,
            json!({ "text": request.text, "k": k }),
            to_value(&retrieval),
            retrieve_at,
        );
        let ordered = if scout_done <= retrieve_done {
            [scout_record, retrieve_record]
        } else {
            [retrieve_record, scout_record]
        };
        if let Some(trace) = trace.as_mut() {
            for (stage, input, output, at) in ordered {
                trace.push_at(stage, input, output, at);
            }
        }

        (profile, retrieval)
    }

    /// One GENERATE step against the backend.
    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        request: &Request,
        locale: Locale,
        profile: &HostProfile,
        retrieval: &RetrievalResult,
        attempt: u32,
        stage: SourceStage,
        last: Option<&LastFailure>,
        trace: &mut Option<Trace>,
    ) -> Result<CandidateCommand, String> {
        let feedback = last.map(LastFailure::feedback);
        let prompt = build_prompt(&request.text, locale, profile, retrieval, feedback.as_ref());

        let limit = self.options.generation_timeout;
        let (raw, result) = match timeout(limit, self.backend.generate(&prompt)).await {
            Ok(Ok(raw)) => {
                let parsed = parse_response(&raw, stage)
                    .ok_or_else(|| "backend returned no command".to_string());
                (Some(raw), parsed)
            }
            Ok(Err(e)) => (None, Err(e.to_string())),
            Err(_) => (None, Err(format!("generation timed out after {}s", limit.as_secs()))),
        };

        record(
            trace,
            Stage::Generate,
            json!({
                "attempt": attempt,
                "source_stage": stage,
                "model": self.backend.model_id(),
                "prompt": prompt,
            }),
            match &result {
                Ok(candidate) => json!({ "raw": raw, "candidate": candidate }),
                Err(reason) => json!({ "raw": raw, "error": reason }),
            },
        );

        result
    }

    fn reject(&self, error: PipelineError, attempts: u32, mut trace: Option<Trace>) -> Outcome {
        let (reason, matched_rule) = match &error {
            PipelineError::RetryBudgetExceeded { last, .. } | PipelineError::SafetyBlocked(last) => {
                (last.reason.clone(), last.matched_rule.clone())
            }
            other => (other.to_string(), None),
        };
        info!(code = error.code(), attempts, "request rejected");
        record(
            &mut trace,
            Stage::Reject,
            json!({ "attempts": attempts }),
            json!({ "code": error.code(), "reason": reason, "matched_rule": matched_rule }),
        );
        Outcome::Rejected(Rejection {
            reason,
            matched_rule,
            error,
            attempts,
            trace,
        })
    }
}
