//! Shared deterministic types for the content chain.
//!
//! These types define stable contracts between the chain components and the
//! records handed to recorders. They carry no I/O and serialize
//! deterministically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::stage::StageName;

/// Literal payload returned to the caller when a stage exhausts its attempts.
pub const FALLBACK_TEXT: &str = "No idea generated – retry later.";

/// Closed set of reasons a stage reply can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Reply is not a JSON object (includes transport failures).
    ParseError,
    MissingField,
    WrongType,
    WrongCount,
    /// Blank text or an empty array.
    EmptyValue,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::MissingField => "missing_field",
            Self::WrongType => "wrong_type",
            Self::WrongCount => "wrong_count",
            Self::EmptyValue => "empty_value",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified contract failure with a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub reason: FailureReason,
    /// Names the offending field path (e.g. `ideas[1].angle`) when one applies.
    pub detail: String,
}

impl Violation {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Hook structure requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookStyle {
    #[default]
    #[serde(rename = "AIDA")]
    Aida,
    #[serde(rename = "PAS")]
    Pas,
}

impl HookStyle {
    pub const TAGS: &'static [&'static str] = &["AIDA", "PAS"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aida => "AIDA",
            Self::Pas => "PAS",
        }
    }
}

impl FromStr for HookStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AIDA" => Ok(Self::Aida),
            "PAS" => Ok(Self::Pas),
            other => Err(format!(
                "unknown hook style '{other}' (expected one of {})",
                Self::TAGS.join(", ")
            )),
        }
    }
}

/// Performance estimate for a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreLevel {
    High,
    Medium,
    Low,
}

impl ScoreLevel {
    pub const TAGS: &'static [&'static str] = &["High", "Medium", "Low"];
}

/// Seed input supplied by the caller for stage 1.
///
/// Every field is carried unchanged through all stage inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInput {
    pub niche: String,
    pub trend_source: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub style: HookStyle,
    #[serde(default = "default_platform")]
    pub platform: String,
}

fn default_platform() -> String {
    "TikTok".to_string()
}

impl ChainInput {
    pub fn new(
        niche: impl Into<String>,
        trend_source: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            niche: niche.into(),
            trend_source: trend_source.into(),
            notes: notes.into(),
            style: HookStyle::default(),
            platform: default_platform(),
        }
    }

    pub fn with_style(mut self, style: HookStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Context fields threaded through every stage input.
    pub fn carried_context(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("niche".to_string(), Value::from(self.niche.as_str()));
        map.insert(
            "trendSource".to_string(),
            Value::from(self.trend_source.as_str()),
        );
        map.insert("notes".to_string(), Value::from(self.notes.as_str()));
        map.insert("style".to_string(), Value::from(self.style.as_str()));
        map.insert("platform".to_string(), Value::from(self.platform.as_str()));
        map
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub title: String,
    pub angle: String,
    pub call_to_action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Title of the idea this hook was written for.
    pub idea: String,
    pub structure: HookStyle,
    pub hook: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub idea: String,
    pub score: ScoreLevel,
    pub rationale: String,
}

/// Composite produced by a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPlan {
    pub niche: String,
    pub trend_source: String,
    pub style: HookStyle,
    pub platform: String,
    pub summary: String,
    pub ideas: Vec<Idea>,
    pub hooks: Vec<Hook>,
    pub scores: Vec<Score>,
}

/// Tool call requested by the model mid-stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A dispatched tool call and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One execution of a stage. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub run_id: String,
    pub stage: StageName,
    /// 1 for the initial attempt, 2 for the clarified retry.
    pub index: u8,
    /// Raw model reply; empty when the model could not be reached.
    pub raw_reply: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    /// Whether the prompt carried a clarification note.
    pub clarified: bool,
    pub prompt_digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    pub duration_ms: u64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Passed,
    Exhausted,
}

/// Per-stage summary emitted once the retry policy resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub run_id: String,
    pub stage: StageName,
    pub ordinal: usize,
    pub status: StageStatus,
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Violation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Aborted,
}

/// Terminal payload of a run: all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Completed {
        result: ContentPlan,
    },
    Aborted {
        fallback: String,
        failed_stage: StageName,
        reasons: Vec<Violation>,
        /// Attempts of the failing stage only.
        attempts: Vec<Attempt>,
    },
}

/// Everything a caller (and the recorder) learns about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub seed: ChainInput,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    /// Every attempt of the run, in execution order.
    pub trail: Vec<Attempt>,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn status(&self) -> RunStatus {
        match self.outcome {
            RunOutcome::Completed { .. } => RunStatus::Completed,
            RunOutcome::Aborted { .. } => RunStatus::Aborted,
        }
    }

    pub fn plan(&self) -> Option<&ContentPlan> {
        match &self.outcome {
            RunOutcome::Completed { result } => Some(result),
            RunOutcome::Aborted { .. } => None,
        }
    }

    pub fn attempts_for(&self, stage: StageName) -> impl Iterator<Item = &Attempt> {
        self.trail.iter().filter(move |attempt| attempt.stage == stage)
    }
}
