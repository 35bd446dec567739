//! Resume Analysis Pipeline: runs the four LLM stages in order.
//!
//! Flow: scoring → improvements → insights → market alignment → AnalysisResult.
//!
//! Stages 2–4 embed the stage 1 `DetailedAnalysis` in their prompts, so the
//! run is strictly sequential. The result is all-or-nothing: any fatal stage
//! error aborts the remaining stages and nothing is returned for persistence.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::analysis::models::{
    AnalysisResult, DetailedAnalysis, Improvement, Insight, MarketAlignmentData,
};
use crate::analysis::normalizer::{normalize, UnparsableResponseError};
use crate::analysis::prompts::{
    build_improvements_prompt, build_insights_prompt, build_market_alignment_prompt,
    build_scoring_prompt,
};
use crate::analysis::validator::{SchemaValidationError, StageOutput};
use crate::llm_client::retry::{retry, RetryPolicy};
use crate::llm_client::{LlmError, TextGenerator};

/// Whole-stage attempts when the model output contains no usable JSON.
const UNPARSABLE_STAGE_ATTEMPTS: u32 = 3;

// ────────────────────────────────────────────────────────────────────────────
// Stages, states, policies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scoring,
    Improvements,
    Insights,
    MarketAlignment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Scoring => "scoring",
            Stage::Improvements => "improvements",
            Stage::Insights => "insights",
            Stage::MarketAlignment => "market alignment",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Scoring,
    Improving,
    Insighting,
    MarketAligning,
    Done,
    Failed,
}

impl PipelineState {
    /// State after the current one completes successfully.
    /// `Done` and `Failed` are terminal.
    pub fn next(self) -> Self {
        match self {
            PipelineState::Idle => PipelineState::Scoring,
            PipelineState::Scoring => PipelineState::Improving,
            PipelineState::Improving => PipelineState::Insighting,
            PipelineState::Insighting => PipelineState::MarketAligning,
            PipelineState::MarketAligning => PipelineState::Done,
            PipelineState::Done => PipelineState::Done,
            PipelineState::Failed => PipelineState::Failed,
        }
    }

    pub fn stage(self) -> Option<Stage> {
        match self {
            PipelineState::Scoring => Some(Stage::Scoring),
            PipelineState::Improving => Some(Stage::Improvements),
            PipelineState::Insighting => Some(Stage::Insights),
            PipelineState::MarketAligning => Some(Stage::MarketAlignment),
            _ => None,
        }
    }
}

/// What a stage does when its output is unparsable or fails validation.
#[derive(Debug, Clone, PartialEq)]
pub enum OnInvalid<T> {
    Fail,
    Fallback(T),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scoring: OnInvalid<DetailedAnalysis>,
    pub improvements: OnInvalid<Vec<Improvement>>,
    pub insights: OnInvalid<Vec<Insight>>,
    pub market_alignment: OnInvalid<MarketAlignmentData>,
    pub unparsable_attempts: u32,
}

impl Default for PipelineConfig {
    /// Base scores have no meaningful substitute; everything after them
    /// degrades instead of failing the run.
    fn default() -> Self {
        Self {
            scoring: OnInvalid::Fail,
            improvements: OnInvalid::Fallback(Vec::new()),
            insights: OnInvalid::Fallback(Vec::new()),
            market_alignment: OnInvalid::Fallback(MarketAlignmentData::fallback()),
            unparsable_attempts: UNPARSABLE_STAGE_ATTEMPTS,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StageError {
    #[error("LLM call failed: {0}")]
    Transient(#[from] LlmError),

    #[error(transparent)]
    Unparsable(#[from] UnparsableResponseError),

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
}

impl StageError {
    /// Bad output can be absorbed by a fallback; an unreachable provider cannot.
    fn is_invalid_output(&self) -> bool {
        matches!(self, StageError::Unparsable(_) | StageError::Schema(_))
    }
}

/// The single error surfaced at the pipeline boundary.
#[derive(Debug, Error)]
#[error("Failed to analyze resume: {stage} stage failed: {source}")]
pub struct AnalysisFailed {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ────────────────────────────────────────────────────────────────────────────

/// Runs the analysis pipeline against an injected text generator.
pub struct ResumeAnalyzer {
    llm: Arc<dyn TextGenerator>,
    config: PipelineConfig,
}

impl ResumeAnalyzer {
    pub fn new(llm: Arc<dyn TextGenerator>, config: PipelineConfig) -> Self {
        Self { llm, config }
    }

    /// Runs every stage and assembles the result. Any fatal stage error moves
    /// the run to `Failed` and is returned as `AnalysisFailed`.
    pub async fn analyze(&self, resume_text: &str) -> Result<AnalysisResult, AnalysisFailed> {
        let mut state = PipelineState::Idle;
        info!("Starting resume analysis ({} chars)", resume_text.len());

        state = self.advance(state);
        let analysis = self
            .run_stage(
                Stage::Scoring,
                &build_scoring_prompt(resume_text),
                &self.config.scoring,
            )
            .await
            .map_err(|e| fail(state, Stage::Scoring, e))?;
        info!("Scoring complete: overall score {}", analysis.overall_score);

        state = self.advance(state);
        let improvements = self
            .run_stage(
                Stage::Improvements,
                &build_improvements_prompt(resume_text, &analysis),
                &self.config.improvements,
            )
            .await
            .map_err(|e| fail(state, Stage::Improvements, e))?;
        info!("Generated {} improvements", improvements.len());

        state = self.advance(state);
        let insights = self
            .run_stage(
                Stage::Insights,
                &build_insights_prompt(resume_text, &analysis),
                &self.config.insights,
            )
            .await
            .map_err(|e| fail(state, Stage::Insights, e))?;
        info!("Generated {} insights", insights.len());

        state = self.advance(state);
        let market_alignment = self
            .run_stage(
                Stage::MarketAlignment,
                &build_market_alignment_prompt(resume_text, &analysis),
                &self.config.market_alignment,
            )
            .await
            .map_err(|e| fail(state, Stage::MarketAlignment, e))?;
        info!(
            "Market alignment complete: role alignment {}",
            market_alignment.role_alignment
        );

        self.advance(state);

        Ok(AnalysisResult {
            score: analysis.overall_score,
            improvements,
            insights,
            market_alignment,
        })
    }

    fn advance(&self, state: PipelineState) -> PipelineState {
        let next = state.next();
        match next.stage() {
            Some(stage) => info!("Analysis pipeline: {:?} → {:?}, running {stage} stage", state, next),
            None => info!("Analysis pipeline: {:?} → {:?}", state, next),
        }
        next
    }

    /// Invokes, normalizes and decodes one stage, re-running the whole stage
    /// while the output stays unparsable, then applies the stage policy.
    async fn run_stage<T>(&self, stage: Stage, prompt: &str, policy: &OnInvalid<T>) -> Result<T, StageError>
    where
        T: StageOutput + Clone,
    {
        let rerun = RetryPolicy::fixed(self.config.unparsable_attempts, Duration::ZERO);
        let outcome = retry(
            &rerun,
            |e: &StageError| matches!(e, StageError::Unparsable(_)),
            |_| self.attempt_stage::<T>(prompt),
        )
        .await;

        match (outcome, policy) {
            (Ok(value), _) => Ok(value),
            (Err(e), OnInvalid::Fallback(fallback)) if e.is_invalid_output() => {
                warn!("Using fallback for {stage} stage: {e}");
                Ok(fallback.clone())
            }
            (Err(e), _) => Err(e),
        }
    }

    async fn attempt_stage<T: StageOutput>(&self, prompt: &str) -> Result<T, StageError> {
        let raw = self.llm.invoke(prompt).await?;
        let value = normalize(&raw, T::KIND.shape())?;
        Ok(T::decode(value)?)
    }
}

fn fail(state: PipelineState, stage: Stage, source: StageError) -> AnalysisFailed {
    warn!(
        "Analysis pipeline: {:?} → {:?} ({stage} stage: {source})",
        state,
        PipelineState::Failed
    );
    AnalysisFailed { stage, source }
}
