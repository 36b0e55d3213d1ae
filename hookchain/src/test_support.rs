//! Test-only helpers: canned seed and replies, a scripted model, an in-memory recorder.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::core::stage::StageName;
use crate::core::types::{ChainInput, HookStyle, ToolCall};
use crate::io::model::{ModelClient, ModelReply, ModelRequest};
use crate::io::recorder::{RunRecord, RunRecorder};

pub const IDEA_TITLES: [&str; 3] = [
    "Overnight enzyme glow",
    "Dermatologist reacts",
    "Mask vs. peel",
];

/// The Luxury skincare / GlowTok seed.
pub fn seed() -> ChainInput {
    ChainInput::new("Luxury skincare", "GlowTok", "Highlight enzyme masks")
        .with_style(HookStyle::Aida)
        .with_platform("TikTok")
}

/// A reply that satisfies `stage`'s output contract.
pub fn conforming_reply(stage: StageName, style: HookStyle) -> String {
    let value = match stage {
        StageName::SummarizeTrend => json!({
            "summary": "Enzyme masks are trending on GlowTok as a gentle overnight alternative to acid peels."
        }),
        StageName::GenerateIdeas => json!({
            "ideas": IDEA_TITLES.iter().enumerate().map(|(idx, title)| json!({
                "title": title,
                "angle": format!("Angle {} on enzyme masks", idx + 1),
                "callToAction": "Save this for your next self-care night",
            })).collect::<Vec<_>>()
        }),
        StageName::WriteHooks => json!({
            "hooks": IDEA_TITLES.iter().map(|title| json!({
                "idea": title,
                "structure": style.as_str(),
                "hook": format!("{title}: the mask your skin has been begging for"),
            })).collect::<Vec<_>>()
        }),
        StageName::EstimatePerformance => json!({
            "scores": IDEA_TITLES.iter().zip(["High", "Medium", "Low"]).map(|(title, score)| json!({
                "idea": title,
                "score": score,
                "rationale": "Before/after visuals retain viewers past 3 seconds",
            })).collect::<Vec<_>>()
        }),
    };
    value.to_string()
}

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    ToolCalls(Vec<ToolCall>),
    /// Transport failure with the given message.
    Fail(String),
}

/// Model client answering from per-stage queues.
///
/// Once a stage's queue is drained, it answers with [`conforming_reply`] for
/// the request's style.
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    scripts: Mutex<BTreeMap<StageName, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, stage: StageName, replies: Vec<Scripted>) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(stage)
            .or_default()
            .extend(replies);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn prompts_for(&self, stage: StageName) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|request| request.stage == stage)
            .map(|request| request.prompt)
            .collect()
    }
}

impl ModelClient for ScriptedModelClient {
    fn invoke(&self, request: &ModelRequest) -> Result<ModelReply> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&request.stage)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Reply(text)) => Ok(ModelReply::text(text)),
            Some(Scripted::ToolCalls(tool_calls)) => Ok(ModelReply {
                text: json!({ "tool_calls": &tool_calls }).to_string(),
                tool_calls,
            }),
            Some(Scripted::Fail(message)) => Err(anyhow!(message)),
            None => {
                let style = request
                    .context
                    .get("style")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|tag| tag.parse().ok())
                    .unwrap_or_default();
                Ok(ModelReply::text(conforming_reply(request.stage, style)))
            }
        }
    }
}

/// Recorder keeping every record in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<(String, RunRecord)>>,
}

impl MemoryRecorder {
    pub fn records(&self) -> Vec<(String, RunRecord)> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.records()
            .iter()
            .map(|(_, record)| record.kind())
            .collect()
    }

    pub fn for_run(&self, run_id: &str) -> Vec<RunRecord> {
        self.records()
            .into_iter()
            .filter(|(id, _)| id == run_id)
            .map(|(_, record)| record)
            .collect()
    }
}

impl RunRecorder for MemoryRecorder {
    fn record(&self, run_id: &str, record: &RunRecord) {
        self.records
            .lock()
            .expect("records lock")
            .push((run_id.to_string(), record.clone()));
    }
}
