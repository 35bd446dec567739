use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// An uploaded resume file and, once computed, its stored analysis.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_name: String,
    pub file_key: String,
    pub file_size: i64,
    pub file_type: String,
    #[serde(skip_serializing)]
    pub parsed_text: Option<String>,
    #[serde(skip_serializing)]
    pub analysis: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ResumeRow {
    pub fn has_analysis(&self) -> bool {
        self.analysis.as_ref().is_some_and(|v| !v.is_null())
    }
}
