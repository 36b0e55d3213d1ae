//! Stage prompt rendering.

use anyhow::{Context, Result};
use minijinja::Environment;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::core::stage::{StageSpec, stages};

/// Template engine holding every stage template, keyed by stage name.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for spec in stages() {
            env.add_template(spec.name.as_str(), spec.template)
                .expect("stage template should be valid");
        }
        Self { env }
    }

    /// Render the prompt for `spec` from its input.
    ///
    /// Input fields are exposed by name, the whole input as `input_json`, and
    /// the clarification (when present) as `clarification`.
    pub fn render(
        &self,
        spec: &StageSpec,
        input: &Map<String, Value>,
        clarification: Option<&str>,
    ) -> Result<String> {
        let template = self
            .env
            .get_template(spec.name.as_str())
            .with_context(|| format!("template for {}", spec.name))?;
        let mut ctx = input.clone();
        ctx.insert(
            "input_json".to_string(),
            Value::String(serde_json::to_string_pretty(input)?),
        );
        if let Some(note) = clarification.map(str::trim).filter(|s| !s.is_empty()) {
            ctx.insert("clarification".to_string(), Value::from(note));
        }
        let rendered = template
            .render(&ctx)
            .with_context(|| format!("render prompt for {}", spec.name))?;
        Ok(rendered)
    }
}

/// Short SHA-256 digest of a rendered prompt (16 hex chars).
pub fn prompt_digest(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::{StageName, stage};
    use crate::core::types::ChainInput;

    fn seed_input() -> Map<String, Value> {
        ChainInput::new("Luxury skincare", "GlowTok", "Highlight enzyme masks").carried_context()
    }

    #[test]
    fn renders_seed_fields_and_contract() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render(stage(StageName::SummarizeTrend), &seed_input(), None)
            .expect("render");
        assert!(prompt.contains("TikTok"));
        assert!(prompt.contains("\"niche\": \"Luxury skincare\""));
        assert!(prompt.contains("Output contract"));
        assert!(!prompt.contains("## Correction"));
    }

    #[test]
    fn clarification_is_appended() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render(
                stage(StageName::SummarizeTrend),
                &seed_input(),
                Some("missing_field: field 'summary' is missing"),
            )
            .expect("render");
        assert!(prompt.ends_with("## Correction\nmissing_field: field 'summary' is missing"));
    }

    #[test]
    fn every_stage_renders() {
        let engine = PromptEngine::new();
        let mut input = seed_input();
        input.insert("summary".to_string(), Value::from("Enzyme masks trend"));
        for spec in stages() {
            let prompt = engine.render(spec, &input, None).expect("render");
            assert!(prompt.contains(spec.name.as_str()), "{}", spec.name);
        }
    }

    #[test]
    fn digest_is_stable_and_short() {
        let digest = prompt_digest("hello");
        assert_eq!(digest.len(), 16);
        assert_eq!(digest, prompt_digest("hello"));
        assert_ne!(digest, prompt_digest("hello!"));
    }
}
