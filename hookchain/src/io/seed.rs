//! Seed file loading with schema validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::types::ChainInput;

const SEED_SCHEMA: &str = include_str!("../../schemas/seed_input.schema.json");

/// Load a seed JSON file, validating it against the embedded seed schema.
pub fn load_seed(path: &Path) -> Result<ChainInput> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read seed {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse seed {}", path.display()))?;
    let seed = parse_seed(value).with_context(|| format!("invalid seed {}", path.display()))?;
    debug!(path = %path.display(), niche = %seed.niche, style = %seed.style.as_str(), "seed loaded");
    Ok(seed)
}

/// Validate an already-parsed seed value and deserialize it.
pub fn parse_seed(value: Value) -> Result<ChainInput> {
    validate_schema(&value)?;
    serde_json::from_value(value).context("deserialize seed")
}

fn validate_schema(seed: &Value) -> Result<()> {
    let schema_value: Value = serde_json::from_str(SEED_SCHEMA).context("parse seed schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(seed) {
        let messages = compiled
            .iter_errors(seed)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "seed schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
