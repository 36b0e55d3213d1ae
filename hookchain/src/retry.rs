//! Retry-then-fallback policy for a single stage.
//!
//! Attempt 1 runs without clarification. If its reply fails the output
//! contract, attempt 2 runs with a clarification naming the failure. A second
//! failure exhausts the stage. Every attempt reaches the recorder before this
//! module returns.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::contract::{Validation, check_reply};
use crate::core::stage::StageSpec;
use crate::core::types::{Attempt, FailureReason, StageRecord, StageStatus, Violation};
use crate::executor::StageExecutor;
use crate::io::model::ModelClient;
use crate::io::recorder::{RunRecord, RunRecorder};

/// Attempts allowed per stage: the initial one plus one clarified retry.
pub const MAX_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Passed {
        /// Normalized output that satisfied the contract.
        output: Map<String, Value>,
        attempts: Vec<Attempt>,
    },
    Exhausted {
        attempts: Vec<Attempt>,
    },
}

impl StageOutcome {
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::Passed { attempts, .. } | Self::Exhausted { attempts } => attempts,
        }
    }

    pub fn into_attempts(self) -> Vec<Attempt> {
        match self {
            Self::Passed { attempts, .. } | Self::Exhausted { attempts } => attempts,
        }
    }

    /// Violations of the failed attempts, in attempt order.
    pub fn reasons(&self) -> Vec<Violation> {
        self.attempts()
            .iter()
            .filter_map(|attempt| attempt.violation.clone())
            .collect()
    }
}

/// Correction note sent with the retry. Always names the reason and field.
pub fn clarification_for(violation: &Violation) -> String {
    format!(
        "Your previous reply was rejected ({reason}): {detail}. \
         Reply again with a single JSON object that satisfies the output contract exactly.",
        reason = violation.reason,
        detail = violation.detail,
    )
}

#[instrument(skip_all, fields(run_id = %run_id, stage = %spec.name))]
pub fn run_stage<M: ModelClient, R: RunRecorder>(
    executor: &StageExecutor<M>,
    recorder: &R,
    run_id: &str,
    spec: &StageSpec,
    input: &Map<String, Value>,
) -> StageOutcome {
    let mut attempts = Vec::with_capacity(usize::from(MAX_ATTEMPTS));
    let mut clarification: Option<String> = None;

    for index in 1..=MAX_ATTEMPTS {
        let started = Instant::now();
        let executed = executor.execute(spec, input, clarification.as_deref());
        let verdict = match &executed.reply {
            Ok(raw) => check_reply(raw, &spec.output),
            Err(failure) => {
                Validation::Invalid(Violation::new(FailureReason::ParseError, failure.clone()))
            }
        };

        let attempt = Attempt {
            run_id: run_id.to_string(),
            stage: spec.name,
            index,
            raw_reply: executed.reply.clone().unwrap_or_default(),
            passed: verdict.is_valid(),
            violation: verdict.violation().cloned(),
            clarified: clarification.is_some(),
            prompt_digest: executed.prompt_digest,
            tool_calls: executed.tool_calls,
            duration_ms: started.elapsed().as_millis() as u64,
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        recorder.record(run_id, &RunRecord::Attempt(attempt.clone()));
        attempts.push(attempt);

        match verdict {
            Validation::Valid(output) => {
                debug!(attempt = index, "stage output accepted");
                emit_stage_record(recorder, run_id, spec, StageStatus::Passed, &attempts);
                return StageOutcome::Passed { output, attempts };
            }
            Validation::Invalid(violation) => {
                warn!(
                    attempt = index,
                    reason = %violation.reason,
                    detail = %violation.detail,
                    "stage output rejected"
                );
                clarification = Some(clarification_for(&violation));
            }
        }
    }

    info!(attempts = attempts.len(), "stage exhausted its attempts");
    emit_stage_record(recorder, run_id, spec, StageStatus::Exhausted, &attempts);
    StageOutcome::Exhausted { attempts }
}

fn emit_stage_record<R: RunRecorder>(
    recorder: &R,
    run_id: &str,
    spec: &StageSpec,
    status: StageStatus,
    attempts: &[Attempt],
) {
    let record = StageRecord {
        run_id: run_id.to_string(),
        stage: spec.name,
        ordinal: spec.ordinal,
        status,
        attempts: attempts.len(),
        reasons: attempts
            .iter()
            .filter_map(|attempt| attempt.violation.clone())
            .collect(),
    };
    recorder.record(run_id, &RunRecord::Stage(record));
}
