//! Stage output contracts and their validator.
//!
//! A contract lists required fields in declaration order. Validation is
//! structural *and* non-trivial: blank text and empty arrays are rejected as
//! `empty_value`. Fields are checked in order and the first failure wins, so a
//! given reply always yields the same classification.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::types::{FailureReason, Violation};

/// Primitive kind expected for a contract field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Non-blank string.
    Text,
    /// Non-blank string drawn from a fixed set of tags (matched case-insensitively).
    OneOf(&'static [&'static str]),
    /// Array of exactly `count` objects, each satisfying `fields`.
    Records {
        count: usize,
        fields: &'static [Field],
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
        }
    }

    pub const fn one_of(name: &'static str, tags: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: FieldKind::OneOf(tags),
        }
    }

    pub const fn records(name: &'static str, count: usize, fields: &'static [Field]) -> Self {
        Self {
            name,
            kind: FieldKind::Records { count, fields },
        }
    }
}

/// Declared shape of a stage input or output.
#[derive(Debug, Clone, Copy)]
pub struct Contract {
    pub fields: &'static [Field],
}

/// Validator verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Normalized value: declared fields only, text trimmed, tags canonicalized.
    Valid(Map<String, Value>),
    Invalid(Violation),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid(violation) => Some(violation),
        }
    }
}

/// Parse a raw model reply into JSON, tolerating a surrounding markdown code fence.
pub fn parse_reply(raw: &str) -> Result<Value, Violation> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```$").expect("valid fence regex")
    });

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Violation::new(
            FailureReason::ParseError,
            "model returned empty content",
        ));
    }
    let body = match FENCE_RE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim(),
        None => trimmed,
    };
    serde_json::from_str(body)
        .map_err(|err| Violation::new(FailureReason::ParseError, format!("invalid JSON: {err}")))
}

/// Parse and validate a raw reply in one step.
pub fn check_reply(raw: &str, contract: &Contract) -> Validation {
    match parse_reply(raw) {
        Ok(value) => validate(&value, contract),
        Err(violation) => Validation::Invalid(violation),
    }
}

/// Validate a parsed candidate against `contract`.
pub fn validate(candidate: &Value, contract: &Contract) -> Validation {
    let Some(object) = candidate.as_object() else {
        return Validation::Invalid(Violation::new(
            FailureReason::ParseError,
            format!("expected a JSON object, got {}", kind_label(candidate)),
        ));
    };
    validate_object(object, contract)
}

/// Validate an already-structured mapping against `contract`.
pub fn validate_object(object: &Map<String, Value>, contract: &Contract) -> Validation {
    match check_fields(object, contract.fields, "") {
        Ok(normalized) => Validation::Valid(normalized),
        Err(violation) => Validation::Invalid(violation),
    }
}

fn check_fields(
    object: &Map<String, Value>,
    fields: &[Field],
    prefix: &str,
) -> Result<Map<String, Value>, Violation> {
    let mut normalized = Map::new();
    for field in fields {
        let path = format!("{prefix}{}", field.name);
        let value = match object.get(field.name) {
            None | Some(Value::Null) => {
                return Err(Violation::new(
                    FailureReason::MissingField,
                    format!("field '{path}' is missing"),
                ));
            }
            Some(value) => value,
        };
        let checked = check_value(value, field.kind, &path)?;
        normalized.insert(field.name.to_string(), checked);
    }
    Ok(normalized)
}

fn check_value(value: &Value, kind: FieldKind, path: &str) -> Result<Value, Violation> {
    match kind {
        FieldKind::Text => check_text(value, path).map(Value::from),
        FieldKind::OneOf(tags) => {
            let text = check_text(value, path)?;
            tags.iter()
                .find(|tag| tag.eq_ignore_ascii_case(text))
                .map(|tag| Value::from(*tag))
                .ok_or_else(|| {
                    Violation::new(
                        FailureReason::WrongType,
                        format!(
                            "field '{path}' must be one of {}, got '{text}'",
                            tags.join(", ")
                        ),
                    )
                })
        }
        FieldKind::Records { count, fields } => {
            let Some(items) = value.as_array() else {
                return Err(wrong_type(path, "an array", value));
            };
            if items.is_empty() {
                return Err(Violation::new(
                    FailureReason::EmptyValue,
                    format!("field '{path}' is an empty array"),
                ));
            }
            if items.len() != count {
                return Err(Violation::new(
                    FailureReason::WrongCount,
                    format!(
                        "field '{path}' must have exactly {count} entries, got {}",
                        items.len()
                    ),
                ));
            }
            let mut normalized = Vec::with_capacity(count);
            for (idx, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{idx}]");
                let Some(object) = item.as_object() else {
                    return Err(wrong_type(&item_path, "an object", item));
                };
                let checked = check_fields(object, fields, &format!("{item_path}."))?;
                normalized.push(Value::Object(checked));
            }
            Ok(Value::Array(normalized))
        }
    }
}

fn check_text<'a>(value: &'a Value, path: &str) -> Result<&'a str, Violation> {
    let Some(text) = value.as_str() else {
        return Err(wrong_type(path, "a string", value));
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Violation::new(
            FailureReason::EmptyValue,
            format!("field '{path}' is blank"),
        ));
    }
    Ok(trimmed)
}

fn wrong_type(path: &str, expected: &str, got: &Value) -> Violation {
    Violation::new(
        FailureReason::WrongType,
        format!("field '{path}' must be {expected}, got {}", kind_label(got)),
    )
}

fn kind_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
