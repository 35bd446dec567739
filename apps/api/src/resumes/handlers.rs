use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::documents::resolve_content_type;
use crate::errors::AppError;
use crate::models::resume::ResumeRow;
use crate::resumes::repository::{get_resume, insert_resume, list_resumes, NewResume};
use crate::resumes::storage::{build_file_key, download_url, store_file, DOWNLOAD_URL_TTL};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSummary {
    #[serde(flatten)]
    pub resume: ResumeRow,
    pub has_analysis: bool,
}

impl From<ResumeRow> for ResumeSummary {
    fn from(resume: ResumeRow) -> Self {
        let has_analysis = resume.has_analysis();
        Self {
            resume,
            has_analysis,
        }
    }
}

#[derive(Serialize)]
pub struct ResumeListResponse {
    pub resumes: Vec<ResumeSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlResponse {
    pub download_url: String,
    pub file_name: String,
    pub file_type: String,
}

/// Fields collected from the upload form before any validation.
#[derive(Default)]
struct UploadForm {
    user_id: Option<String>,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Option<Bytes>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("user_id") => {
                form.user_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::Validation(format!("Unreadable user_id: {e}")))?,
                );
            }
            Some("file") => {
                form.file_name = field.file_name().map(str::to_string);
                form.content_type = field.content_type().map(str::to_string);
                form.data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Unreadable file: {e}")))?,
                );
            }
            _ => {}
        }
    }
    Ok(form)
}

/// POST /api/v1/resumes
pub async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ResumeSummary>), AppError> {
    let form = read_upload_form(multipart).await?;

    let user_id = form
        .user_id
        .as_deref()
        .ok_or_else(|| AppError::Validation("Missing user_id field".to_string()))?;
    let user_id = Uuid::parse_str(user_id.trim())
        .map_err(|_| AppError::Validation("user_id must be a UUID".to_string()))?;

    let data = form
        .data
        .ok_or_else(|| AppError::Validation("Missing file field".to_string()))?;
    let file_name = form
        .file_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Uploaded file has no name".to_string()))?;

    if data.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }
    if data.len() > state.config.max_upload_bytes {
        return Err(AppError::Validation(format!(
            "File exceeds the {} byte upload limit",
            state.config.max_upload_bytes
        )));
    }

    let content_type = resolve_content_type(form.content_type.as_deref(), &file_name)
        .ok_or_else(|| {
            AppError::UnsupportedFileType(
                form.content_type
                    .clone()
                    .unwrap_or_else(|| file_name.clone()),
            )
        })?;

    let file_key = build_file_key(user_id, &file_name, chrono::Utc::now().timestamp_millis());
    let file_size = data.len() as i64;
    store_file(
        &state.s3,
        &state.config.s3_bucket,
        &file_key,
        data,
        content_type,
    )
    .await?;

    let resume = insert_resume(
        &state.db,
        NewResume {
            user_id,
            file_name: &file_name,
            file_key: &file_key,
            file_size,
            file_type: content_type,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(resume.into())))
}

/// GET /api/v1/resumes?user_id=
pub async fn handle_list_resumes(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<ResumeListResponse>, AppError> {
    let resumes = list_resumes(&state.db, params.user_id).await?;
    Ok(Json(ResumeListResponse {
        resumes: resumes.into_iter().map(ResumeSummary::from).collect(),
    }))
}

/// GET /api/v1/resumes/:id/download-url?user_id=
pub async fn handle_download_url(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<DownloadUrlResponse>, AppError> {
    // Another user's resume is indistinguishable from a missing one.
    let resume = get_resume(&state.db, id)
        .await?
        .filter(|r| r.user_id == params.user_id)
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let url = download_url(
        &state.s3,
        &state.config.s3_bucket,
        &resume.file_key,
        DOWNLOAD_URL_TTL,
    )
    .await?;
    info!("Issued download URL for resume {id}");

    Ok(Json(DownloadUrlResponse {
        download_url: url,
        file_name: resume.file_name,
        file_type: resume.file_type,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::routes::build_router;
    use crate::state::test_state;

    const BOUNDARY: &str = "X-RESUME-BOUNDARY";

    fn multipart_body(user_id: Option<&str>, file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(user_id) = user_id {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"user_id\"\r\n\r\n{user_id}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, content_type, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn post_upload(body: Vec<u8>) -> (StatusCode, Value) {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/resumes")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let user = Uuid::new_v4().to_string();
        let (status, body) = post_upload(multipart_body(Some(&user), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "Missing file field");
    }

    #[tokio::test]
    async fn test_upload_with_invalid_user_id_is_rejected() {
        let (status, body) = post_upload(multipart_body(
            Some("not-a-uuid"),
            Some(("cv.pdf", "application/pdf", b"%PDF-1.4")),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "user_id must be a UUID");
    }

    #[tokio::test]
    async fn test_upload_of_unsupported_type_is_415() {
        let user = Uuid::new_v4().to_string();
        let (status, body) = post_upload(multipart_body(
            Some(&user),
            Some(("photo.png", "image/png", b"\x89PNG")),
        ))
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["error"]["message"], "Unsupported file type: image/png");
    }

    #[tokio::test]
    async fn test_upload_over_size_limit_is_rejected() {
        let user = Uuid::new_v4().to_string();
        let oversized = vec![b'a'; 2048];
        let (status, body) = post_upload(multipart_body(
            Some(&user),
            Some(("cv.pdf", "application/pdf", &oversized)),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("upload limit"));
    }

    #[test]
    fn test_summary_flattens_row_and_hides_internal_columns() {
        let row = ResumeRow {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            file_name: "cv.pdf".to_string(),
            file_key: "u/1-cv.pdf".to_string(),
            file_size: 1234,
            file_type: "application/pdf".to_string(),
            parsed_text: Some("Jane Doe".to_string()),
            analysis: Some(serde_json::json!({"score": 80})),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ResumeSummary::from(row)).unwrap();
        assert_eq!(json["fileName"], "cv.pdf");
        assert_eq!(json["fileSize"], 1234);
        assert_eq!(json["hasAnalysis"], true);
        assert!(json.get("parsedText").is_none());
        assert!(json.get("analysis").is_none());
    }
}
