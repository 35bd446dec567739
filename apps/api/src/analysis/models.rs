//! Analysis data model. Field names serialize in camelCase because the same
//! JSON is what the model is asked to produce, what is stored in
//! `resumes.analysis`, and what the frontend reads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Stage 1 output: base scores. Context for every later stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedAnalysis {
    pub impact_score: f64,
    pub clarity_score: f64,
    pub achievement_score: f64,
    pub skills_relevance: f64,
    pub overall_score: f64,
    pub section_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImprovementCategory {
    Impact,
    Clarity,
    Skills,
    Achievement,
    Structure,
}

/// A single suggested change. `section`, `original`, `reason` and `category`
/// belong to the older shape and are kept so stored results still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub area: String,
    pub suggestion: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ImprovementCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Strength,
    Weakness,
    Opportunity,
    Gap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightType,
    pub description: String,
    #[serde(default)]
    pub action_items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAlignmentData {
    pub role_alignment: f64,
    pub missing_keywords: Vec<String>,
    pub industry_trends: Vec<String>,
    pub recommended_skills: Vec<String>,
}

impl MarketAlignmentData {
    /// Static substitute used when the market stage output cannot be used.
    pub fn fallback() -> Self {
        Self {
            role_alignment: 50.0,
            missing_keywords: vec![],
            industry_trends: vec!["Unable to analyze market trends at this time".to_string()],
            recommended_skills: vec![],
        }
    }
}

/// The persisted artifact. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Copied from `DetailedAnalysis::overall_score`.
    pub score: f64,
    pub improvements: Vec<Improvement>,
    pub insights: Vec<Insight>,
    pub market_alignment: MarketAlignmentData,
}
