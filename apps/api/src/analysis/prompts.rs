// Prompt templates for the four analysis stages.
// Placeholders: {resume_text}, {analysis_json}, {json_only}.

use crate::analysis::models::DetailedAnalysis;
use crate::llm_client::prompts::JSON_ONLY_INSTRUCTION;

pub const SCORING_PROMPT_TEMPLATE: &str = r#"Analyze this resume comprehensively and score it.

RESUME:
{resume_text}

Return a JSON object with these exact fields:
{
  "impactScore": 75,
  "clarityScore": 80,
  "achievementScore": 70,
  "skillsRelevance": 82,
  "overallScore": 77,
  "sectionScores": {
    "summary": 70,
    "experience": 80,
    "education": 75,
    "skills": 85
  }
}

RULES:
1. Every score is a whole number from 1 to 100.
2. sectionScores has one entry per section actually present in the resume.
3. {json_only}"#;

pub const IMPROVEMENTS_PROMPT_TEMPLATE: &str = r#"Based on this resume and its analysis scores, suggest specific improvements.

RESUME:
{resume_text}

ANALYSIS:
{analysis_json}

Return a JSON object with this exact shape:
{
  "improvements": [
    {
      "area": "Professional Summary",
      "suggestion": "Open with years of experience and one quantified result",
      "priority": "high"
    }
  ]
}

RULES:
1. priority is exactly one of "high", "medium", "low".
2. Focus first on the lowest-scoring areas in the analysis.
3. {json_only}"#;

pub const INSIGHTS_PROMPT_TEMPLATE: &str = r#"Generate strategic career insights for this resume.

RESUME:
{resume_text}

ANALYSIS:
{analysis_json}

Return a JSON array in this exact shape:
[
  {
    "type": "strength",
    "description": "Strong backend systems background",
    "actionItems": ["Lead with the distributed systems project"]
  }
]

RULES:
1. type is exactly one of "strength", "weakness", "opportunity", "gap".
2. actionItems is an ordered list, most important first.
3. {json_only}"#;

pub const MARKET_ALIGNMENT_PROMPT_TEMPLATE: &str = r#"Analyze how well this resume aligns with the current job market for the candidate's target role.

RESUME:
{resume_text}

ANALYSIS:
{analysis_json}

Return a JSON object with these exact fields:
{
  "roleAlignment": 68,
  "missingKeywords": ["Kubernetes"],
  "industryTrends": ["Platform engineering adoption"],
  "recommendedSkills": ["Terraform"]
}

RULES:
1. roleAlignment is a whole number from 0 to 100.
2. The three lists contain short strings only.
3. {json_only}"#;

pub fn build_scoring_prompt(resume_text: &str) -> String {
    fill(SCORING_PROMPT_TEMPLATE, resume_text, None)
}

pub fn build_improvements_prompt(resume_text: &str, analysis: &DetailedAnalysis) -> String {
    fill(IMPROVEMENTS_PROMPT_TEMPLATE, resume_text, Some(analysis))
}

pub fn build_insights_prompt(resume_text: &str, analysis: &DetailedAnalysis) -> String {
    fill(INSIGHTS_PROMPT_TEMPLATE, resume_text, Some(analysis))
}

pub fn build_market_alignment_prompt(resume_text: &str, analysis: &DetailedAnalysis) -> String {
    fill(MARKET_ALIGNMENT_PROMPT_TEMPLATE, resume_text, Some(analysis))
}

/// Substitutes every placeholder in a single left-to-right pass. Inserted
/// text is never rescanned, so braces in the resume or in model-chosen
/// section names stay literal.
fn fill(template: &str, resume_text: &str, analysis: Option<&DetailedAnalysis>) -> String {
    let analysis_json = analysis.map(|analysis| {
        serde_json::to_string_pretty(analysis).unwrap_or_else(|_| format!("{analysis:?}"))
    });

    let mut prompt = String::with_capacity(template.len() + resume_text.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        prompt.push_str(&rest[..open]);
        let tail = &rest[open..];
        let substitution = [
            ("{resume_text}", Some(resume_text)),
            ("{analysis_json}", analysis_json.as_deref()),
            ("{json_only}", Some(JSON_ONLY_INSTRUCTION)),
        ]
        .into_iter()
        .find_map(|(placeholder, value)| {
            tail.starts_with(placeholder)
                .then_some(value)
                .flatten()
                .map(|value| (placeholder.len(), value))
        });

        match substitution {
            Some((consumed, value)) => {
                prompt.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                prompt.push('{');
                rest = &tail[1..];
            }
        }
    }
    prompt.push_str(rest);
    prompt
}
