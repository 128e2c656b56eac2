use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::blob::BlobStore;
use crate::db::StorageResult;
use crate::storage::FileStorage;

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub blobs_deleted: usize,
    pub blob_failures: usize,
    pub records_deleted: usize,
    pub record_failures: usize,
}

/// Removes expired files from blob storage and then from the database.
#[derive(Clone)]
pub struct Reaper {
    files: Arc<FileStorage>,
    blobs: Arc<dyn BlobStore>,
}

impl Reaper {
    pub fn new(files: Arc<FileStorage>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { files, blobs }
    }

    /// One full pass over everything that expired before `now`.
    ///
    /// Only the initial query can fail the sweep. Each record is torn down on its
    /// own: a failed blob delete is logged and the row is still removed, and a failed
    /// row delete does not stop the next record.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> StorageResult<SweepReport> {
        let expired = self.files.get_expired_files(now).await?;
        let mut report = SweepReport {
            found: expired.len(),
            ..SweepReport::default()
        };

        tracing::info!(found = report.found, "Found expired files");

        for file in expired {
            tracing::info!(
                file_id = %file.id,
                blob_key = %file.blob_key,
                expiry_time = %file.expiry_time,
                "Deleting expired file"
            );

            match self.blobs.delete(&file.blob_key).await {
                Ok(()) => {
                    report.blobs_deleted += 1;
                    tracing::debug!(blob_key = %file.blob_key, "Deleted from blob storage");
                }
                Err(e) => {
                    report.blob_failures += 1;
                    tracing::error!(
                        error = %e,
                        blob_key = %file.blob_key,
                        "Failed to delete blob, continuing with database deletion"
                    );
                }
            }

            match self.files.delete_file(&file.id).await {
                Ok(_) => {
                    report.records_deleted += 1;
                    tracing::debug!(file_id = %file.id, original_name = %file.original_name, "Deleted from database");
                }
                Err(e) => {
                    report.record_failures += 1;
                    tracing::error!(error = %e, file_id = %file.id, "Failed to delete from database");
                }
            }
        }

        tracing::info!(
            found = report.found,
            blobs_deleted = report.blobs_deleted,
            blob_failures = report.blob_failures,
            records_deleted = report.records_deleted,
            record_failures = report.record_failures,
            "Cleanup completed"
        );

        Ok(report)
    }
}
