//! Upload, download and listing flows for expiring file links.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::auth::AuthUser;
use crate::blob::BlobStore;
use crate::error::AppError;
use crate::models::{FileRecord, FileSummary, MAX_UPLOAD_BYTES};
use crate::notify::{self, Notifier};
use crate::storage::FileStorage;
use crate::user_storage::UserStorage;

/// One file as received from the client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub original_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub record: FileRecord,
    pub download_link: String,
    /// The owner notification runs detached; dropping this handle does not cancel it.
    pub notification: JoinHandle<()>,
}

/// A successful, counted access to an active link.
#[derive(Debug, Clone)]
pub struct DownloadGrant {
    pub record: FileRecord,
    pub owner_name: String,
}

#[derive(Clone)]
pub struct TransferService {
    files: Arc<FileStorage>,
    users: Arc<UserStorage>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
    public_base_url: String,
}

impl TransferService {
    pub fn new(
        files: Arc<FileStorage>,
        users: Arc<UserStorage>,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            files,
            users,
            blobs,
            notifier,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn download_link(&self, file_id: &str) -> String {
        format!("{}/download/{}", self.public_base_url, file_id)
    }

    /// Store the bytes, then the record, then tell the owner.
    ///
    /// Nothing is written if the blob store refuses the upload, and a record that
    /// cannot be saved takes its blob with it. The email may fail without affecting
    /// the result.
    #[tracing::instrument(skip(self, owner, file), fields(user_id = %owner.user_id, file_name = %file.original_name))]
    pub async fn upload(
        &self,
        owner: &AuthUser,
        file: IncomingFile,
        now: DateTime<Utc>,
    ) -> Result<UploadOutcome, AppError> {
        if file.data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::PayloadTooLarge {
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let user = self
            .users
            .get_user_by_id(&owner.user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

        let size = file.data.len() as i64;
        let blob = self
            .blobs
            .store(&file.original_name, &file.content_type, file.data)
            .await?;

        let record = FileRecord::new(
            user.id.clone(),
            file.original_name,
            file.content_type,
            size,
            blob,
            now,
        );

        let record = match self.files.add_file(record.clone()).await {
            Ok(saved) => saved,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&record.blob_key).await {
                    tracing::error!(
                        error = %cleanup,
                        blob_key = %record.blob_key,
                        "Failed to remove blob after record insert failed"
                    );
                }
                return Err(e.into());
            }
        };

        let download_link = self.download_link(&record.id);
        tracing::info!(
            file_id = %record.id,
            size_bytes = record.file_size,
            expiry_time = %record.expiry_time,
            "File uploaded"
        );

        let notifier = Arc::clone(&self.notifier);
        let body = notify::upload_notice(
            &user.name,
            &record.original_name,
            &download_link,
            record.expiry_time,
        );
        let to = user.email.clone();
        let file_id = record.id.clone();
        let notification = tokio::spawn(async move {
            if let Err(e) = notifier.notify(&to, notify::UPLOAD_SUBJECT, &body).await {
                tracing::warn!(error = %e, file_id = %file_id, "Upload notification failed");
            }
        });

        Ok(UploadOutcome {
            record,
            download_link,
            notification,
        })
    }

    /// Resolve a link: 404 if unknown, 410 once expired (the row stays for the reaper),
    /// otherwise count the access and return the post-increment record.
    pub async fn download(&self, file_id: &str, now: DateTime<Utc>) -> Result<DownloadGrant, AppError> {
        let found = self
            .files
            .get_file_with_owner(file_id)
            .await?
            .ok_or(AppError::FileNotFound)?;

        if found.file.is_expired_at(now) {
            tracing::debug!(file_id = %file_id, expiry_time = %found.file.expiry_time, "Link expired");
            return Err(AppError::LinkExpired);
        }

        // reaped between the lookup and the increment
        let record = self
            .files
            .record_download(file_id)
            .await?
            .ok_or(AppError::FileNotFound)?;

        tracing::info!(file_id = %file_id, download_count = record.download_count, "File accessed");
        Ok(DownloadGrant {
            record,
            owner_name: found.owner_name,
        })
    }

    /// The caller's files, newest first, flagged against `now`.
    pub async fn list(&self, owner: &AuthUser, now: DateTime<Utc>) -> Result<Vec<FileSummary>, AppError> {
        let files = self.files.get_user_files(&owner.user_id).await?;
        Ok(files
            .iter()
            .map(|record| FileSummary::from_record(record, now))
            .collect())
    }
}
