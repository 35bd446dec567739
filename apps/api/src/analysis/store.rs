//! Analysis persistence, one stored `AnalysisResult` per resume.
//!
//! `AppState` holds an `Arc<dyn AnalysisStore>`; the Postgres implementation
//! keeps the result as JSONB on the `resumes` row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::models::AnalysisResult;

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Stored analysis for the resume, or `None` when it has not been computed.
    async fn get_analysis(&self, resume_id: Uuid) -> Result<Option<AnalysisResult>>;

    async fn store_analysis(&self, resume_id: Uuid, analysis: &AnalysisResult) -> Result<()>;

    async fn store_parsed_text(&self, resume_id: Uuid, text: &str) -> Result<()>;
}

pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn get_analysis(&self, resume_id: Uuid) -> Result<Option<AnalysisResult>> {
        let stored: Option<Option<serde_json::Value>> =
            sqlx::query_scalar("SELECT analysis FROM resumes WHERE id = $1")
                .bind(resume_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(stored.flatten().and_then(|value| decode_stored(resume_id, value)))
    }

    async fn store_analysis(&self, resume_id: Uuid, analysis: &AnalysisResult) -> Result<()> {
        let value = serde_json::to_value(analysis).context("Failed to serialize analysis")?;
        let updated = sqlx::query("UPDATE resumes SET analysis = $1 WHERE id = $2")
            .bind(&value)
            .bind(resume_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            anyhow::bail!("Resume {resume_id} disappeared before its analysis was stored");
        }
        info!("Stored analysis for resume {resume_id}");
        Ok(())
    }

    async fn store_parsed_text(&self, resume_id: Uuid, text: &str) -> Result<()> {
        sqlx::query("UPDATE resumes SET parsed_text = $1 WHERE id = $2")
            .bind(text)
            .bind(resume_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// A stored value that no longer decodes is treated as absent so the
/// analysis is recomputed rather than failing every request for the resume.
fn decode_stored(resume_id: Uuid, value: serde_json::Value) -> Option<AnalysisResult> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("Stored analysis for resume {resume_id} does not decode, recomputing: {e}");
            None
        }
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Keeps results as serialized JSON so tests exercise the same
    /// encode/decode path as the JSONB column.
    #[derive(Default)]
    pub struct InMemoryAnalysisStore {
        rows: Mutex<HashMap<Uuid, serde_json::Value>>,
    }

    #[async_trait]
    impl AnalysisStore for InMemoryAnalysisStore {
        async fn get_analysis(&self, resume_id: Uuid) -> Result<Option<AnalysisResult>> {
            let value = self.rows.lock().unwrap().get(&resume_id).cloned();
            Ok(value.and_then(|v| decode_stored(resume_id, v)))
        }

        async fn store_analysis(&self, resume_id: Uuid, analysis: &AnalysisResult) -> Result<()> {
            let value = serde_json::to_value(analysis)?;
            self.rows.lock().unwrap().insert(resume_id, value);
            Ok(())
        }

        async fn store_parsed_text(&self, _resume_id: Uuid, _text: &str) -> Result<()> {
            Ok(())
        }
    }
}
