use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::models::AnalysisResult;
use crate::analysis::store::AnalysisStore;
use crate::documents::extract_text;
use crate::errors::AppError;
use crate::models::resume::ResumeRow;
use crate::resumes::repository::get_resume;
use crate::resumes::storage::fetch_file;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub data: AnalysisResult,
}

impl AnalysisResponse {
    fn ok(data: AnalysisResult) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// GET /api/v1/analysis/resume/:id
///
/// Returns the stored analysis when there is one. Otherwise computes it
/// under the in-flight guard, persists it, and returns it.
pub async fn handle_get_analysis(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
) -> Result<Json<AnalysisResponse>, AppError> {
    if let Some(stored) = state.store.get_analysis(resume_id).await? {
        info!("Returning stored analysis for resume {resume_id}");
        return Ok(AnalysisResponse::ok(stored));
    }

    let resume = get_resume(&state.db, resume_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Resume not found".to_string()))?;

    let Some(lease) = state.inflight.try_acquire(resume_id).await? else {
        return Err(AppError::AnalysisInProgress(resume_id));
    };

    // Detached from the request: a client that disconnects does not discard
    // the run, and the lease is released when the run itself ends.
    let analysis = tokio::spawn(async move {
        let outcome = analyze_and_store(&state, &resume).await;
        lease.release().await;
        outcome
    })
    .await
    .map_err(|e| anyhow::anyhow!("Analysis task for resume {resume_id} failed: {e}"))??;

    Ok(AnalysisResponse::ok(analysis))
}

async fn analyze_and_store(state: &AppState, resume: &ResumeRow) -> Result<AnalysisResult, AppError> {
    // A concurrent run may have finished between the first lookup and the guard.
    if let Some(stored) = state.store.get_analysis(resume.id).await? {
        return Ok(stored);
    }

    let data = fetch_file(&state.s3, &state.config.s3_bucket, &resume.file_key).await?;
    let file_type = resume.file_type.clone();
    let resume_text = tokio::task::spawn_blocking(move || extract_text(&data, &file_type))
        .await
        .map_err(|e| anyhow::anyhow!("Text extraction task failed: {e}"))??;

    let timeout_secs = state.config.analysis_timeout_secs;
    let analysis = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        state
            .analyzer
            .analyze(&resume_text)
            .instrument(info_span!("analysis", resume_id = %resume.id)),
    )
    .await
    .map_err(|_| AppError::Timeout(timeout_secs))??;

    persist_analysis(state.store.as_ref(), resume.id, &analysis, &resume_text).await?;
    info!("Analysis for resume {} complete, score {}", resume.id, analysis.score);

    Ok(analysis)
}

/// Only the analysis write is fatal; the parsed text is a convenience copy.
async fn persist_analysis(
    store: &dyn AnalysisStore,
    resume_id: Uuid,
    analysis: &AnalysisResult,
    resume_text: &str,
) -> Result<(), AppError> {
    store.store_analysis(resume_id, analysis).await?;
    if let Err(e) = store.store_parsed_text(resume_id, resume_text).await {
        warn!("Failed to store parsed text for resume {resume_id}: {e:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::analysis::models::MarketAlignmentData;
    use crate::analysis::store::memory::InMemoryAnalysisStore;
    use crate::routes::build_router;
    use crate::state::test_state_with_store;

    #[tokio::test]
    async fn test_stored_analysis_is_returned_without_recomputing() {
        let store = Arc::new(InMemoryAnalysisStore::default());
        let resume_id = Uuid::new_v4();
        let stored = AnalysisResult {
            score: 83.0,
            improvements: vec![],
            insights: vec![],
            market_alignment: MarketAlignmentData::fallback(),
        };
        store.store_analysis(resume_id, &stored).await.unwrap();

        let app = build_router(test_state_with_store(store));
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/analysis/resume/{resume_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["score"], 83.0);
        assert_eq!(body["data"]["marketAlignment"]["roleAlignment"], 50.0);
    }

    /// Keeps analyses in memory but refuses every parsed-text write.
    #[derive(Default)]
    struct TextlessStore {
        inner: InMemoryAnalysisStore,
    }

    #[async_trait::async_trait]
    impl AnalysisStore for TextlessStore {
        async fn get_analysis(&self, resume_id: Uuid) -> anyhow::Result<Option<AnalysisResult>> {
            self.inner.get_analysis(resume_id).await
        }

        async fn store_analysis(
            &self,
            resume_id: Uuid,
            analysis: &AnalysisResult,
        ) -> anyhow::Result<()> {
            self.inner.store_analysis(resume_id, analysis).await
        }

        async fn store_parsed_text(&self, _resume_id: Uuid, _text: &str) -> anyhow::Result<()> {
            anyhow::bail!("parsed_text column is read-only")
        }
    }

    fn sample_analysis(score: f64) -> AnalysisResult {
        AnalysisResult {
            score,
            improvements: vec![],
            insights: vec![],
            market_alignment: MarketAlignmentData::fallback(),
        }
    }

    #[tokio::test]
    async fn test_parsed_text_failure_keeps_stored_analysis() {
        let store = TextlessStore::default();
        let resume_id = Uuid::new_v4();

        persist_analysis(&store, resume_id, &sample_analysis(71.0), "Jane Doe")
            .await
            .unwrap();

        let stored = store.get_analysis(resume_id).await.unwrap().unwrap();
        assert_eq!(stored.score, 71.0);
    }

    #[tokio::test]
    async fn test_analysis_write_failure_is_fatal() {
        struct ReadOnlyStore;

        #[async_trait::async_trait]
        impl AnalysisStore for ReadOnlyStore {
            async fn get_analysis(&self, _id: Uuid) -> anyhow::Result<Option<AnalysisResult>> {
                Ok(None)
            }

            async fn store_analysis(&self, _id: Uuid, _a: &AnalysisResult) -> anyhow::Result<()> {
                anyhow::bail!("database is read-only")
            }

            async fn store_parsed_text(&self, _id: Uuid, _text: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let err = persist_analysis(&ReadOnlyStore, Uuid::new_v4(), &sample_analysis(50.0), "text")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_non_uuid_resume_id_is_rejected() {
        let app = build_router(crate::state::test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/analysis/resume/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
