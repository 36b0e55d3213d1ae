//! End-to-end chain runs against a scripted model.
//!
//! Each test drives `Chain::run_chain_with_id` through all four stages and
//! checks the run result, the attempt trail, and what reached the recorder.

use std::thread;

use hookchain::chain::Chain;
use hookchain::core::stage::{PLAN_SIZE, StageName, stages};
use hookchain::core::types::{
    FALLBACK_TEXT, FailureReason, HookStyle, RunOutcome, RunStatus, ScoreLevel, ToolCall,
};
use hookchain::executor::StageExecutor;
use hookchain::io::memory::{FileMemoryStore, Role, TranscriptRecorder};
use hookchain::io::recorder::{FileRunRecorder, RunRecord, read_records};
use hookchain::retry::MAX_ATTEMPTS;
use hookchain::test_support::{
    IDEA_TITLES, MemoryRecorder, Scripted, ScriptedModelClient, conforming_reply, seed,
};
use serde_json::{Map, Value};

fn chain<'a>(
    model: &'a ScriptedModelClient,
    recorder: &'a MemoryRecorder,
) -> Chain<&'a ScriptedModelClient, &'a MemoryRecorder> {
    Chain::new(StageExecutor::new(model), recorder)
}

fn reply(text: &str) -> Scripted {
    Scripted::Reply(text.to_string())
}

/// Luxury skincare / GlowTok / AIDA / TikTok with a conforming model.
#[test]
fn skincare_seed_completes_with_three_of_each() {
    let model = ScriptedModelClient::new();
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-skincare")
        .expect("run");

    assert_eq!(result.status(), RunStatus::Completed);
    let plan = result.plan().expect("plan");
    assert_eq!(plan.niche, "Luxury skincare");
    assert_eq!(plan.trend_source, "GlowTok");
    assert_eq!(plan.style, HookStyle::Aida);
    assert_eq!(plan.platform, "TikTok");
    assert!(!plan.summary.is_empty());
    assert_eq!(plan.ideas.len(), PLAN_SIZE);
    assert_eq!(plan.hooks.len(), PLAN_SIZE);
    assert_eq!(plan.scores.len(), PLAN_SIZE);
    assert!(plan.hooks.iter().all(|hook| hook.structure == HookStyle::Aida));
    assert_eq!(
        plan.scores.iter().map(|s| s.score).collect::<Vec<_>>(),
        vec![ScoreLevel::High, ScoreLevel::Medium, ScoreLevel::Low]
    );
    assert_eq!(plan.ideas[0].title, IDEA_TITLES[0]);

    // One attempt per stage, in stage order.
    let order: Vec<StageName> = result.trail.iter().map(|a| a.stage).collect();
    let expected: Vec<StageName> = stages().iter().map(|s| s.name).collect();
    assert_eq!(order, expected);
    assert!(result.trail.iter().all(|a| a.passed && a.index == 1));
}

#[test]
fn fail_then_succeed_uses_two_attempts_for_that_stage() {
    let model = ScriptedModelClient::new().script(
        StageName::GenerateIdeas,
        vec![reply(r#"{"ideas": [{"title": "a", "angle": "b", "callToAction": "c"}]}"#)],
    );
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-retry")
        .expect("run");

    assert_eq!(result.status(), RunStatus::Completed);
    let attempts: Vec<_> = result.attempts_for(StageName::GenerateIdeas).collect();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[0].violation.as_ref().map(|v| v.reason),
        Some(FailureReason::WrongCount)
    );
    assert!(attempts[1].passed);
    assert!(attempts[1].clarified);
    for other in [
        StageName::SummarizeTrend,
        StageName::WriteHooks,
        StageName::EstimatePerformance,
    ] {
        assert_eq!(result.attempts_for(other).count(), 1, "{other}");
    }

    let retry_prompt = &model.prompts_for(StageName::GenerateIdeas)[1];
    assert!(retry_prompt.contains("wrong_count"), "{retry_prompt}");
}

#[test]
fn fail_twice_aborts_and_skips_later_stages() {
    let model = ScriptedModelClient::new().script(
        StageName::WriteHooks,
        vec![
            reply(r#"{"hooks": []}"#),
            reply(&conforming_reply(StageName::WriteHooks, HookStyle::Aida).replace("AIDA", "BAB")),
        ],
    );
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-abort")
        .expect("run");

    assert_eq!(result.status(), RunStatus::Aborted);
    assert!(result.plan().is_none());
    let RunOutcome::Aborted {
        fallback,
        failed_stage,
        reasons,
        attempts,
    } = &result.outcome
    else {
        panic!("expected abort");
    };
    assert_eq!(fallback, FALLBACK_TEXT);
    assert_eq!(fallback, "No idea generated – retry later.");
    assert_eq!(*failed_stage, StageName::WriteHooks);
    assert_eq!(attempts.len(), usize::from(MAX_ATTEMPTS));
    assert_eq!(
        reasons.iter().map(|v| v.reason).collect::<Vec<_>>(),
        vec![FailureReason::EmptyValue, FailureReason::WrongType]
    );
    assert!(reasons[1].detail.contains("hooks[0].structure"), "{}", reasons[1].detail);

    assert_eq!(result.attempts_for(StageName::EstimatePerformance).count(), 0);
    assert!(model.prompts_for(StageName::EstimatePerformance).is_empty());
}

#[test]
fn empty_summary_twice_aborts_at_first_stage() {
    let model = ScriptedModelClient::new().script(
        StageName::SummarizeTrend,
        vec![reply(r#"{"summary": ""}"#), reply(r#"{"summary": "   "}"#)],
    );
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-empty")
        .expect("run");

    let RunOutcome::Aborted {
        failed_stage,
        reasons,
        ..
    } = &result.outcome
    else {
        panic!("expected abort");
    };
    assert_eq!(*failed_stage, StageName::SummarizeTrend);
    assert!(reasons.iter().all(|v| v.reason == FailureReason::EmptyValue));
    assert_eq!(result.trail.len(), 2);
    for later in [
        StageName::GenerateIdeas,
        StageName::WriteHooks,
        StageName::EstimatePerformance,
    ] {
        assert_eq!(result.attempts_for(later).count(), 0, "{later}");
    }
    assert_eq!(model.requests().len(), 2);
}

#[test]
fn transport_failures_are_retried_then_abort() {
    let model = ScriptedModelClient::new().script(
        StageName::EstimatePerformance,
        vec![
            Scripted::Fail("model command timed out after 60s".to_string()),
            Scripted::Fail("model command failed with status Some(1)".to_string()),
        ],
    );
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-transport")
        .expect("run");

    assert_eq!(result.status(), RunStatus::Aborted);
    let attempts: Vec<_> = result
        .attempts_for(StageName::EstimatePerformance)
        .collect();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| {
        a.violation.as_ref().map(|v| v.reason) == Some(FailureReason::ParseError)
    }));
}

#[test]
fn fenced_replies_are_accepted() {
    let fenced = format!(
        "```json\n{}\n```",
        conforming_reply(StageName::SummarizeTrend, HookStyle::Aida)
    );
    let model = ScriptedModelClient::new().script(StageName::SummarizeTrend, vec![reply(&fenced)]);
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-fenced")
        .expect("run");
    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(result.attempts_for(StageName::SummarizeTrend).count(), 1);
}

#[test]
fn stage_output_cannot_overwrite_carried_context() {
    let model = ScriptedModelClient::new().script(
        StageName::SummarizeTrend,
        vec![reply(
            r#"{"summary": "Enzyme masks rising", "niche": "Crypto", "style": "PAS"}"#,
        )],
    );
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-carry")
        .expect("run");

    for request in model.requests() {
        assert_eq!(request.context["niche"], "Luxury skincare", "{}", request.stage);
        assert_eq!(request.context["style"], "AIDA", "{}", request.stage);
        assert_eq!(request.context["trendSource"], "GlowTok");
        assert_eq!(request.context["platform"], "TikTok");
    }
    let plan = result.plan().expect("plan");
    assert_eq!(plan.niche, "Luxury skincare");
    assert_eq!(plan.summary, "Enzyme masks rising");
}

#[test]
fn pas_style_flows_into_hooks() {
    let model = ScriptedModelClient::new();
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed().with_style(HookStyle::Pas), "run-pas")
        .expect("run");
    let plan = result.plan().expect("plan");
    assert_eq!(plan.style, HookStyle::Pas);
    assert!(plan.hooks.iter().all(|hook| hook.structure == HookStyle::Pas));
    assert!(model.prompts_for(StageName::WriteHooks)[0].contains("PAS structure"));
}

/// Hook structure is checked against the known tags only, not against the seed style.
#[test]
fn hook_structure_is_not_matched_against_seed_style() {
    let model = ScriptedModelClient::new().script(
        StageName::WriteHooks,
        vec![reply(&conforming_reply(StageName::WriteHooks, HookStyle::Pas))],
    );
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-mixed-style")
        .expect("run");

    assert_eq!(result.status(), RunStatus::Completed);
    let plan = result.plan().expect("plan");
    assert_eq!(plan.style, HookStyle::Aida);
    assert!(plan.hooks.iter().all(|hook| hook.structure == HookStyle::Pas));
    assert_eq!(result.attempts_for(StageName::WriteHooks).count(), 1);
}

#[test]
fn invalid_seed_is_an_error_and_records_nothing() {
    let model = ScriptedModelClient::new();
    let recorder = MemoryRecorder::default();
    let mut bad = seed();
    bad.niche = "   ".to_string();
    let err = chain(&model, &recorder)
        .run_chain_with_id(&bad, "run-bad")
        .unwrap_err();
    assert!(err.to_string().contains("invalid seed"), "{err}");
    assert!(model.requests().is_empty());
    assert!(recorder.records().is_empty());
}

#[test]
fn every_attempt_is_recorded_before_the_run_summary() {
    let model = ScriptedModelClient::new().script(
        StageName::SummarizeTrend,
        vec![reply("not json at all")],
    );
    let recorder = MemoryRecorder::default();
    let result = chain(&model, &recorder)
        .run_chain_with_id(&seed(), "run-trail")
        .expect("run");

    let records = recorder.for_run("run-trail");
    let attempts: Vec<_> = records
        .iter()
        .filter_map(|record| match record {
            RunRecord::Attempt(attempt) => Some(attempt.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, result.trail);
    assert_eq!(
        recorder.kinds(),
        vec![
            "attempt", "attempt", "stage", "attempt", "stage", "attempt", "stage", "attempt",
            "stage", "run"
        ]
    );
    assert!(matches!(records.last(), Some(RunRecord::Run(run)) if run == &result));
}

#[test]
fn identical_scripts_give_identical_outcome_structure() {
    let run = |run_id: &str| {
        let model = ScriptedModelClient::new().script(
            StageName::WriteHooks,
            vec![reply(r#"{"hooks": "three hooks"}"#)],
        );
        let recorder = MemoryRecorder::default();
        chain(&model, &recorder)
            .run_chain_with_id(&seed(), run_id)
            .expect("run")
    };
    let first = run("run-a");
    let second = run("run-b");

    assert_eq!(first.status(), second.status());
    assert_eq!(first.plan(), second.plan());
    let shape = |result: &hookchain::core::types::RunResult| {
        result
            .trail
            .iter()
            .map(|a| (a.stage, a.index, a.passed, a.violation.clone(), a.prompt_digest.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&first), shape(&second));
}

#[test]
fn concurrent_runs_share_one_chain() {
    let model = ScriptedModelClient::new();
    let recorder = MemoryRecorder::default();
    let chain = chain(&model, &recorder);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|idx| {
                let chain = &chain;
                scope.spawn(move || {
                    chain
                        .run_chain_with_id(&seed(), &format!("run-{idx}"))
                        .expect("run")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect::<Vec<_>>()
    });

    assert!(results.iter().all(|r| r.status() == RunStatus::Completed));
    for idx in 0..4 {
        let run_id = format!("run-{idx}");
        let records = recorder.for_run(&run_id);
        assert_eq!(records.len(), 9, "{run_id}");
        assert!(records.iter().all(|record| match record {
            RunRecord::Attempt(a) => a.run_id == run_id,
            RunRecord::Stage(s) => s.run_id == run_id,
            RunRecord::Run(r) => r.run_id == run_id,
        }));
    }
}

#[test]
fn tool_calls_are_dispatched_and_logged() {
    struct Trends;
    impl hookchain::io::tools::ToolRegistry for Trends {
        fn call(&self, name: &str, _arguments: &Map<String, Value>) -> anyhow::Result<Value> {
            assert_eq!(name, "trend_lookup");
            Ok(Value::from("enzyme masks +240% week over week"))
        }
    }

    let model = ScriptedModelClient::new().script(
        StageName::SummarizeTrend,
        vec![Scripted::ToolCalls(vec![ToolCall {
            name: "trend_lookup".to_string(),
            arguments: Map::new(),
        }])],
    );
    let recorder = MemoryRecorder::default();
    let chain = Chain::new(StageExecutor::new(&model).with_tools(Trends), &recorder);
    let result = chain.run_chain_with_id(&seed(), "run-tools").expect("run");

    assert_eq!(result.status(), RunStatus::Completed);
    let first = &result.trail[0];
    assert_eq!(first.tool_calls.len(), 1);
    assert!(first.passed);
    let prompts = model.prompts_for(StageName::SummarizeTrend);
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("enzyme masks +240%"));
}

#[test]
fn file_recorders_write_run_artifacts_and_transcript() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runs_dir = temp.path().join("runs");
    let memory_path = temp.path().join("memory.json");
    let files = FileRunRecorder::new(&runs_dir);
    let transcript = TranscriptRecorder::new(FileMemoryStore::new(&memory_path));

    let model = ScriptedModelClient::new().script(
        StageName::SummarizeTrend,
        vec![reply("{}"), reply("{}")],
    );
    let chain = Chain::new(StageExecutor::new(&model), (&files, &transcript));
    let result = chain.run_chain_with_id(&seed(), "run-files").expect("run");
    assert_eq!(result.status(), RunStatus::Aborted);

    let paths = files.paths("run-files");
    let records = read_records(&paths.records_path).expect("records");
    assert_eq!(records.len(), 4);
    assert!(matches!(records.last(), Some(RunRecord::Run(_))));
    let summary: Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.summary_path).expect("summary"))
            .expect("json");
    assert_eq!(summary["status"], "aborted");
    assert_eq!(summary["fallback"], FALLBACK_TEXT);
    assert_eq!(summary["failed_stage"], "summarizeTrend");

    let memory = transcript.store().load().expect("memory");
    assert_eq!(memory.messages.len(), 2);
    assert_eq!(memory.messages[0].role, Role::User);
    assert!(memory.messages[0].content.contains("Luxury skincare"));
    assert_eq!(memory.messages[1].role, Role::Assistant);
    assert_eq!(memory.messages[1].content, FALLBACK_TEXT);
}
