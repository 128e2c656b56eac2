use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::blob::StoredBlob;

/// Lifetime of a download link.
pub const FILE_TTL_MINUTES: i64 = 60;

/// Largest accepted upload, in bytes (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn file_ttl() -> Duration {
    Duration::minutes(FILE_TTL_MINUTES)
}

/// Metadata for one shared file. Active while `now <= expiry_time`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    pub blob_key: String,
    pub file_url: String,
    pub uploaded_by: String,
    pub expiry_time: DateTime<Utc>,
    pub download_count: i64,
    pub file_size: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(
        uploaded_by: String,
        original_name: String,
        mime_type: String,
        file_size: i64,
        blob: StoredBlob,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: blob.key.clone(),
            original_name,
            blob_key: blob.key,
            file_url: blob.url,
            uploaded_by,
            expiry_time: created_at + file_ttl(),
            download_count: 0,
            file_size,
            mime_type,
            created_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_time
    }
}

/// A file row joined with its owner's display name.
#[derive(Debug, Clone, FromRow)]
pub struct OwnedFile {
    #[sqlx(flatten)]
    pub file: FileRecord,
    pub owner_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileInfo {
    pub id: String,
    pub original_name: String,
    pub download_link: String,
    pub expiry_time: DateTime<Utc>,
    pub file_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub file: UploadedFileInfo,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "fileURL")]
    pub file_url: String,
    pub filename: String,
    pub download_count: i64,
    pub uploaded_by: String,
    pub expiry_time: DateTime<Utc>,
}

/// Listing entry. Never carries the blob key or URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: String,
    pub original_name: String,
    pub download_count: i64,
    pub expiry_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_expired: bool,
}

impl FileSummary {
    pub fn from_record(record: &FileRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            original_name: record.original_name.clone(),
            download_count: record.download_count,
            expiry_time: record.expiry_time,
            created_at: record.created_at,
            is_expired: record.is_expired_at(now),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub success: bool,
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
}
