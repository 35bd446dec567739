//! Shape checks and typed decoding for each stage's normalized output.
//!
//! `validate` enforces the structural contract per kind (required fields and
//! their JSON types) and applies the one tolerated coercion: a bare array in
//! place of the `{"improvements": [...]}` wrapper. `StageOutput::decode` then
//! builds the typed value, clamping scores into their documented ranges.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::analysis::models::{DetailedAnalysis, Improvement, Insight, MarketAlignmentData};
use crate::analysis::normalizer::JsonShape;

const SCORE_FIELDS: [&str; 5] = [
    "impactScore",
    "clarityScore",
    "achievementScore",
    "skillsRelevance",
    "overallScore",
];

const MARKET_LIST_FIELDS: [&str; 3] = ["missingKeywords", "industryTrends", "recommendedSkills"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedKind {
    DetailedAnalysis,
    Improvements,
    Insights,
    MarketAlignment,
}

impl ExpectedKind {
    /// Bracket hint for the normalizer's substring search.
    pub fn shape(self) -> JsonShape {
        match self {
            ExpectedKind::DetailedAnalysis | ExpectedKind::MarketAlignment => JsonShape::Object,
            ExpectedKind::Improvements => JsonShape::Either,
            ExpectedKind::Insights => JsonShape::Array,
        }
    }
}

impl fmt::Display for ExpectedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpectedKind::DetailedAnalysis => "detailed analysis",
            ExpectedKind::Improvements => "improvements",
            ExpectedKind::Insights => "insights",
            ExpectedKind::MarketAlignment => "market alignment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{kind} failed schema validation: {reason}")]
pub struct SchemaValidationError {
    pub kind: ExpectedKind,
    pub reason: String,
}

impl SchemaValidationError {
    fn new(kind: ExpectedKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Checks `value` against the structural contract for `kind`.
/// Returns the (possibly coerced) value on success.
pub fn validate(value: Value, kind: ExpectedKind) -> Result<Value, SchemaValidationError> {
    match kind {
        ExpectedKind::DetailedAnalysis => {
            let obj = expect_object(&value, kind)?;
            for field in SCORE_FIELDS {
                expect_number(obj, field, kind)?;
            }
            match obj.get("sectionScores") {
                Some(Value::Object(_)) => Ok(value),
                _ => Err(SchemaValidationError::new(kind, "sectionScores must be an object")),
            }
        }
        ExpectedKind::Improvements => {
            let value = match value {
                Value::Array(items) => {
                    let mut wrapper = Map::new();
                    wrapper.insert("improvements".to_string(), Value::Array(items));
                    Value::Object(wrapper)
                }
                other => other,
            };
            let obj = expect_object(&value, kind)?;
            expect_array(obj, "improvements", kind)?;
            Ok(value)
        }
        ExpectedKind::Insights => match value {
            Value::Array(_) => Ok(value),
            Value::Object(mut obj) => match obj.remove("insights") {
                Some(inner @ Value::Array(_)) => Ok(inner),
                _ => Err(SchemaValidationError::new(kind, "expected a JSON array")),
            },
            _ => Err(SchemaValidationError::new(kind, "expected a JSON array")),
        },
        ExpectedKind::MarketAlignment => {
            let obj = expect_object(&value, kind)?;
            expect_number(obj, "roleAlignment", kind)?;
            for field in MARKET_LIST_FIELDS {
                expect_array(obj, field, kind)?;
            }
            Ok(value)
        }
    }
}

fn expect_object(value: &Value, kind: ExpectedKind) -> Result<&Map<String, Value>, SchemaValidationError> {
    value
        .as_object()
        .ok_or_else(|| SchemaValidationError::new(kind, "expected a JSON object"))
}

fn expect_number(obj: &Map<String, Value>, field: &str, kind: ExpectedKind) -> Result<f64, SchemaValidationError> {
    obj.get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| SchemaValidationError::new(kind, format!("{field} must be a number")))
}

fn expect_array<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    kind: ExpectedKind,
) -> Result<&'a Vec<Value>, SchemaValidationError> {
    obj.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| SchemaValidationError::new(kind, format!("{field} must be an array")))
}

// ────────────────────────────────────────────────────────────────────────────
// Typed decoding
// ────────────────────────────────────────────────────────────────────────────

/// A value one pipeline stage produces. Each implementor owns its kind and
/// its decode rules, so the orchestrator can run every stage the same way.
pub trait StageOutput: Sized {
    const KIND: ExpectedKind;

    fn decode(value: Value) -> Result<Self, SchemaValidationError>;
}

impl StageOutput for DetailedAnalysis {
    const KIND: ExpectedKind = ExpectedKind::DetailedAnalysis;

    fn decode(value: Value) -> Result<Self, SchemaValidationError> {
        let value = validate(value, Self::KIND)?;
        let obj = expect_object(&value, Self::KIND)?;
        let score = |field: &str| -> Result<f64, SchemaValidationError> {
            Ok(clamp_score(field, expect_number(obj, field, Self::KIND)?, 1.0, 100.0))
        };

        let mut section_scores = BTreeMap::new();
        if let Some(Value::Object(sections)) = obj.get("sectionScores") {
            for (name, raw) in sections {
                match raw.as_f64() {
                    Some(n) => {
                        section_scores.insert(name.clone(), clamp_score(name, n, 0.0, 100.0));
                    }
                    None => warn!("Dropping non-numeric section score '{name}': {raw}"),
                }
            }
        }

        Ok(DetailedAnalysis {
            impact_score: score("impactScore")?,
            clarity_score: score("clarityScore")?,
            achievement_score: score("achievementScore")?,
            skills_relevance: score("skillsRelevance")?,
            overall_score: score("overallScore")?,
            section_scores,
        })
    }
}

impl StageOutput for Vec<Improvement> {
    const KIND: ExpectedKind = ExpectedKind::Improvements;

    fn decode(value: Value) -> Result<Self, SchemaValidationError> {
        let mut value = validate(value, Self::KIND)?;
        let items = match value.get_mut("improvements") {
            Some(Value::Array(items)) => std::mem::take(items),
            _ => Vec::new(),
        };
        Ok(decode_items(items, Self::KIND, normalize_improvement))
    }
}

impl StageOutput for Vec<Insight> {
    const KIND: ExpectedKind = ExpectedKind::Insights;

    fn decode(value: Value) -> Result<Self, SchemaValidationError> {
        let items = match validate(value, Self::KIND)? {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        Ok(decode_items(items, Self::KIND, normalize_insight))
    }
}

impl StageOutput for MarketAlignmentData {
    const KIND: ExpectedKind = ExpectedKind::MarketAlignment;

    fn decode(value: Value) -> Result<Self, SchemaValidationError> {
        let value = validate(value, Self::KIND)?;
        let obj = expect_object(&value, Self::KIND)?;
        let strings = |field: &str| -> Result<Vec<String>, SchemaValidationError> {
            Ok(expect_array(obj, field, Self::KIND)?
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect())
        };

        Ok(MarketAlignmentData {
            role_alignment: clamp_score(
                "roleAlignment",
                expect_number(obj, "roleAlignment", Self::KIND)?,
                0.0,
                100.0,
            ),
            missing_keywords: strings("missingKeywords")?,
            industry_trends: strings("industryTrends")?,
            recommended_skills: strings("recommendedSkills")?,
        })
    }
}

/// Decodes each element after `fix_up`, dropping the ones that still do not
/// fit. A partially usable list beats failing the stage.
fn decode_items<T: DeserializeOwned>(
    items: Vec<Value>,
    kind: ExpectedKind,
    fix_up: fn(&mut Map<String, Value>),
) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut item)| {
            if let Value::Object(obj) = &mut item {
                fix_up(obj);
            }
            match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!("Dropping malformed {kind} item #{i}: {e}");
                    None
                }
            }
        })
        .collect()
}

/// Older responses used `section` where the current shape has `area`, and
/// models capitalize enum values at will.
fn normalize_improvement(obj: &mut Map<String, Value>) {
    if !obj.contains_key("area") {
        if let Some(section) = obj.get("section").cloned() {
            obj.insert("area".to_string(), section);
        }
    }
    let priority = obj
        .get("priority")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);
    let priority = match priority.as_deref() {
        Some(p @ ("high" | "medium" | "low")) => p.to_string(),
        _ => "medium".to_string(),
    };
    obj.insert("priority".to_string(), Value::String(priority));

    // `category` is optional; an unknown one must not cost the whole item.
    lowercase_field(obj, "category");
    let known_category = matches!(
        obj.get("category").and_then(Value::as_str),
        Some("impact" | "clarity" | "skills" | "achievement" | "structure")
    );
    if !known_category && obj.remove("category").is_some_and(|c| !c.is_null()) {
        warn!("Ignoring unknown improvement category");
    }
}

fn normalize_insight(obj: &mut Map<String, Value>) {
    lowercase_field(obj, "type");
}

fn lowercase_field(obj: &mut Map<String, Value>, field: &str) {
    if let Some(Value::String(s)) = obj.get_mut(field) {
        *s = s.to_ascii_lowercase();
    }
}

fn clamp_score(field: &str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("Clamped {field} from {value} into [{min}, {max}]");
    }
    clamped
}
