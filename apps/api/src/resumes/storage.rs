use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;

/// Lifetime of a presigned download link.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(3600);

/// Object key for an upload: `<user_id>/<unix_millis>-<sanitized name>`.
pub fn build_file_key(user_id: Uuid, file_name: &str, unix_millis: i64) -> String {
    format!("{user_id}/{unix_millis}-{}", sanitize_file_name(file_name))
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub async fn store_file(
    s3: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    data: Bytes,
    content_type: &str,
) -> Result<(), AppError> {
    let size = data.len();
    s3.put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(data))
        .content_type(content_type)
        .send()
        .await
        .map_err(|e| AppError::S3(format!("upload of {key} failed: {e}")))?;

    info!("Uploaded {size} bytes to s3://{bucket}/{key}");
    Ok(())
}

pub async fn fetch_file(s3: &aws_sdk_s3::Client, bucket: &str, key: &str) -> Result<Bytes, AppError> {
    let object = s3
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| AppError::S3(format!("download of {key} failed: {e}")))?;

    let data = object
        .body
        .collect()
        .await
        .map_err(|e| AppError::S3(format!("reading body of {key} failed: {e}")))?
        .into_bytes();

    info!("Fetched {} bytes from s3://{bucket}/{key}", data.len());
    Ok(data)
}

/// Presigned GET for `key`, valid for `ttl`.
pub async fn download_url(
    s3: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    ttl: Duration,
) -> Result<String, AppError> {
    let presigning = PresigningConfig::expires_in(ttl)
        .map_err(|e| AppError::S3(format!("invalid presign ttl: {e}")))?;

    let request = s3
        .get_object()
        .bucket(bucket)
        .key(key)
        .presigned(presigning)
        .await
        .map_err(|e| AppError::S3(format!("presigning {key} failed: {e}")))?;

    Ok(request.uri().to_string())
}
