//! Chain orchestrator: drives the stages in order and assembles the result.

use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{SecondsFormat, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::contract::{Validation, validate_object};
use crate::core::stage::{StageSpec, stages};
use crate::core::state::ChainState;
use crate::core::types::{ChainInput, ContentPlan, FALLBACK_TEXT, RunOutcome, RunResult};
use crate::executor::StageExecutor;
use crate::io::model::ModelClient;
use crate::io::recorder::{RunRecord, RunRecorder};
use crate::retry::{StageOutcome, run_stage};

/// Sequential four-stage chain.
///
/// A `Chain` holds no per-run state, so one instance can serve concurrent runs
/// from several threads when its model client and recorder are `Sync`.
pub struct Chain<M, R> {
    executor: StageExecutor<M>,
    recorder: R,
    stages: &'static [StageSpec],
}

impl<M: ModelClient, R: RunRecorder> Chain<M, R> {
    pub fn new(executor: StageExecutor<M>, recorder: R) -> Self {
        Self {
            executor,
            recorder,
            stages: stages(),
        }
    }

    /// Run the chain under a freshly generated run id.
    ///
    /// Returns `Err` only when the seed does not satisfy the first stage's
    /// input contract; model and contract failures end in an aborted result.
    pub fn run_chain(&self, seed: &ChainInput) -> Result<RunResult> {
        self.run_chain_with_id(seed, &generate_run_id())
    }

    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn run_chain_with_id(&self, seed: &ChainInput, run_id: &str) -> Result<RunResult> {
        let carried = seed.carried_context();
        let first = self
            .stages
            .first()
            .ok_or_else(|| anyhow!("chain has no stages"))?;
        if let Validation::Invalid(violation) = validate_object(&carried, &first.input) {
            bail!("invalid seed: {violation}");
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        info!(niche = %seed.niche, style = seed.style.as_str(), "chain started");

        let mut state = ChainState::Pending.start().map_err(|e| anyhow!(e))?;
        let mut input = carried.clone();
        let mut produced = Map::new();
        let mut trail = Vec::new();
        let mut aborted = None;

        for spec in self.stages {
            debug!(%state, stage = %spec.name, "entering stage");
            if let Validation::Invalid(violation) = validate_object(&input, &spec.input) {
                bail!("input for {} violates its contract: {violation}", spec.name);
            }

            match run_stage(&self.executor, &self.recorder, run_id, spec, &input) {
                StageOutcome::Passed { output, attempts } => {
                    trail.extend(attempts);
                    input = merge_carried(&output, &carried);
                    produced.extend(output);
                    state = state.advance(self.stages.len()).map_err(|e| anyhow!(e))?;
                }
                exhausted @ StageOutcome::Exhausted { .. } => {
                    let reasons = exhausted.reasons();
                    let attempts = exhausted.into_attempts();
                    trail.extend(attempts.iter().cloned());
                    state = state.abort().map_err(|e| anyhow!(e))?;
                    warn!(stage = %spec.name, "stage exhausted, returning fallback");
                    aborted = Some(RunOutcome::Aborted {
                        fallback: FALLBACK_TEXT.to_string(),
                        failed_stage: spec.name,
                        reasons,
                        attempts,
                    });
                    break;
                }
            }
        }

        let outcome = match aborted {
            Some(outcome) => outcome,
            None => RunOutcome::Completed {
                result: assemble_plan(&produced, &carried)?,
            },
        };
        debug_assert!(state.is_terminal());

        let result = RunResult {
            run_id: run_id.to_string(),
            seed: seed.clone(),
            outcome,
            trail,
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        self.recorder.record(run_id, &RunRecord::Run(result.clone()));
        info!(
            %state,
            attempts = result.trail.len(),
            duration_ms = result.duration_ms,
            "chain finished"
        );
        Ok(result)
    }
}

/// Stage output plus carried context. Carried fields always win.
fn merge_carried(output: &Map<String, Value>, carried: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = output.clone();
    for (key, value) in carried {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn assemble_plan(produced: &Map<String, Value>, carried: &Map<String, Value>) -> Result<ContentPlan> {
    let merged = merge_carried(produced, carried);
    serde_json::from_value(Value::Object(merged)).context("assemble content plan")
}

/// `run-<yyyymmdd_HHMMSS>-<6 lowercase alphanumerics>`, UTC.
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let short_id = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{timestamp}-{short_id}")
}
