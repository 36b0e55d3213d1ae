//! The fixed, read-only table of chain stages.
//!
//! Stage order is summarize → ideas → hooks → performance. Each stage declares
//! the input fields it needs (checked before it runs) and the output contract
//! its reply must satisfy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::contract::{Contract, Field};
use crate::core::types::{HookStyle, ScoreLevel};

/// Exact number of ideas, hooks and scores a stage must produce.
pub const PLAN_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageName {
    SummarizeTrend,
    GenerateIdeas,
    WriteHooks,
    EstimatePerformance,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SummarizeTrend => "summarizeTrend",
            Self::GenerateIdeas => "generateIdeas",
            Self::WriteHooks => "writeHooks",
            Self::EstimatePerformance => "estimatePerformance",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STAGES
            .iter()
            .map(|spec| spec.name)
            .find(|name| name.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = STAGES.iter().map(|spec| spec.name.as_str()).collect();
                format!("unknown stage '{s}' (expected one of {})", known.join(", "))
            })
    }
}

/// Immutable definition of one stage.
#[derive(Debug)]
pub struct StageSpec {
    pub name: StageName,
    /// 1-based position in the chain.
    pub ordinal: usize,
    pub input: Contract,
    pub output: Contract,
    /// minijinja source rendered with the stage input.
    pub template: &'static str,
}

const IDEA_FIELDS: &[Field] = &[
    Field::text("title"),
    Field::text("angle"),
    Field::text("callToAction"),
];

const HOOK_FIELDS: &[Field] = &[
    Field::text("idea"),
    Field::one_of("structure", HookStyle::TAGS),
    Field::text("hook"),
];

const SCORE_FIELDS: &[Field] = &[
    Field::text("idea"),
    Field::one_of("score", ScoreLevel::TAGS),
    Field::text("rationale"),
];

pub static STAGES: [StageSpec; 4] = [
    StageSpec {
        name: StageName::SummarizeTrend,
        ordinal: 1,
        input: Contract {
            fields: &[
                Field::text("niche"),
                Field::text("trendSource"),
                Field::one_of("style", HookStyle::TAGS),
                Field::text("platform"),
            ],
        },
        output: Contract {
            fields: &[Field::text("summary")],
        },
        template: include_str!("../prompts/summarize_trend.md"),
    },
    StageSpec {
        name: StageName::GenerateIdeas,
        ordinal: 2,
        input: Contract {
            fields: &[Field::text("niche"), Field::text("summary")],
        },
        output: Contract {
            fields: &[Field::records("ideas", PLAN_SIZE, IDEA_FIELDS)],
        },
        template: include_str!("../prompts/generate_ideas.md"),
    },
    StageSpec {
        name: StageName::WriteHooks,
        ordinal: 3,
        input: Contract {
            fields: &[
                Field::records("ideas", PLAN_SIZE, IDEA_FIELDS),
                Field::one_of("style", HookStyle::TAGS),
            ],
        },
        output: Contract {
            fields: &[Field::records("hooks", PLAN_SIZE, HOOK_FIELDS)],
        },
        template: include_str!("../prompts/write_hooks.md"),
    },
    StageSpec {
        name: StageName::EstimatePerformance,
        ordinal: 4,
        input: Contract {
            fields: &[
                Field::records("hooks", PLAN_SIZE, HOOK_FIELDS),
                Field::text("platform"),
            ],
        },
        output: Contract {
            fields: &[Field::records("scores", PLAN_SIZE, SCORE_FIELDS)],
        },
        template: include_str!("../prompts/estimate_performance.md"),
    },
];

/// The chain's stages in execution order.
pub fn stages() -> &'static [StageSpec] {
    &STAGES
}

pub fn stage(name: StageName) -> &'static StageSpec {
    match name {
        StageName::SummarizeTrend => &STAGES[0],
        StageName::GenerateIdeas => &STAGES[1],
        StageName::WriteHooks => &STAGES[2],
        StageName::EstimatePerformance => &STAGES[3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    use crate::core::contract::{FieldKind, Validation, check_reply};
    use crate::core::types::FailureReason;
    use crate::test_support::conforming_reply;

    fn reason_for(spec: &StageSpec, reply: &Value) -> Option<FailureReason> {
        check_reply(&reply.to_string(), &spec.output)
            .violation()
            .map(|v| v.reason)
    }

    fn single(name: &str, value: Value) -> Value {
        let mut object = Map::new();
        object.insert(name.to_string(), value);
        Value::Object(object)
    }

    #[test]
    fn ordinals_match_table_position() {
        for (idx, spec) in stages().iter().enumerate() {
            assert_eq!(spec.ordinal, idx + 1, "{}", spec.name);
            assert_eq!(stage(spec.name).ordinal, spec.ordinal);
        }
    }

    #[test]
    fn stage_names_round_trip_through_from_str() {
        for spec in stages() {
            assert_eq!(spec.name.as_str().parse::<StageName>(), Ok(spec.name));
        }
        let err = "summarize".parse::<StageName>().unwrap_err();
        assert!(err.contains("summarizeTrend"), "{err}");
    }

    #[test]
    fn each_stage_output_feeds_next_stage_input() {
        // Every input field of stage n+1 is either carried context or an output of stage n.
        let carried = ["niche", "trendSource", "notes", "style", "platform"];
        for pair in stages().windows(2) {
            let produced: Vec<&str> = pair[0].output.fields.iter().map(|f| f.name).collect();
            for field in pair[1].input.fields {
                assert!(
                    carried.contains(&field.name) || produced.contains(&field.name),
                    "{} needs '{}'",
                    pair[1].name,
                    field.name
                );
            }
        }
    }

    #[test]
    fn every_output_contract_rejects_each_failure_kind() {
        for spec in stages() {
            let field = spec.output.fields[0];
            let conforming: Value =
                serde_json::from_str(&conforming_reply(spec.name, HookStyle::Aida)).expect("json");
            let check = |reply: &Value, reason: Option<FailureReason>| {
                assert_eq!(reason_for(spec, reply), reason, "{}: {reply}", spec.name);
            };

            check(&conforming, None);
            check(&json!({}), Some(FailureReason::MissingField));
            check(&single(field.name, Value::Null), Some(FailureReason::MissingField));
            check(&single(field.name, json!(7)), Some(FailureReason::WrongType));

            match field.kind {
                FieldKind::Text => {
                    check(&single(field.name, json!("   ")), Some(FailureReason::EmptyValue));
                }
                FieldKind::Records { fields, .. } => {
                    let first = fields[0].name;
                    check(&single(field.name, json!([])), Some(FailureReason::EmptyValue));

                    let mut short = conforming.clone();
                    short[field.name].as_array_mut().expect("records").truncate(2);
                    check(&short, Some(FailureReason::WrongCount));

                    let mut not_object = conforming.clone();
                    not_object[field.name][0] = json!("flat string");
                    check(&not_object, Some(FailureReason::WrongType));

                    let mut missing = conforming.clone();
                    missing[field.name][0]
                        .as_object_mut()
                        .expect("record")
                        .remove(first);
                    check(&missing, Some(FailureReason::MissingField));

                    let mut blank = conforming.clone();
                    blank[field.name][0][first] = json!(" ");
                    check(&blank, Some(FailureReason::EmptyValue));
                }
                FieldKind::OneOf(_) => unreachable!("no stage outputs a bare tag"),
            }
        }
    }

    #[test]
    fn tag_fields_reject_values_outside_their_set() {
        let estimate = stage(StageName::EstimatePerformance);
        let mut scores: Value =
            serde_json::from_str(&conforming_reply(estimate.name, HookStyle::Aida)).expect("json");
        scores["scores"][0]["score"] = json!("Very high");
        let verdict = check_reply(&scores.to_string(), &estimate.output);
        let violation = verdict.violation().expect("violation");
        assert_eq!(violation.reason, FailureReason::WrongType);
        assert!(violation.detail.contains("scores[0].score"), "{}", violation.detail);
        assert!(violation.detail.contains("Very high"), "{}", violation.detail);

        let hooks_stage = stage(StageName::WriteHooks);
        let mut hooks: Value =
            serde_json::from_str(&conforming_reply(hooks_stage.name, HookStyle::Pas)).expect("json");
        hooks["hooks"][2]["structure"] = json!("BAB");
        assert_eq!(reason_for(hooks_stage, &hooks), Some(FailureReason::WrongType));

        hooks["hooks"][2]["structure"] = json!("pas");
        let Validation::Valid(normalized) = check_reply(&hooks.to_string(), &hooks_stage.output)
        else {
            panic!("lowercase tag should be accepted");
        };
        assert_eq!(normalized["hooks"][2]["structure"], "PAS");
    }
}
