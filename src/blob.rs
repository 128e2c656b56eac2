//! Blob storage adapters.
//!
//! Upload and download flows only ever see the [`BlobStore`] trait: bytes go in,
//! a `(key, url)` pair comes out, and the key is later handed back for deletion.
//! Keys are laid out as `file-sharing/{uuid}-{sanitized filename}`.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStoreExt, PutPayload};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::BlobConfig;

const KEY_PREFIX: &str = "file-sharing";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Locator returned by a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Internal identifier used to delete the blob later.
    pub key: String,
    /// URL handed to clients that hold a valid download link.
    pub url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(
        &self,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredBlob, BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Build the configured backend.
pub async fn from_config(config: &BlobConfig) -> Result<Arc<dyn BlobStore>, BlobError> {
    match config {
        BlobConfig::Local { path, base_url } => {
            let store = LocalBlobStore::new(path.clone(), base_url.clone()).await?;
            tracing::info!(path = %path.display(), "Using local blob storage");
            Ok(Arc::new(store))
        }
        BlobConfig::S3 {
            bucket,
            region,
            endpoint,
            public_base_url,
        } => {
            let store = S3BlobStore::new(
                bucket.clone(),
                region.clone(),
                endpoint.clone(),
                public_base_url.clone(),
            )?;
            tracing::info!(bucket = %bucket, region = %region, "Using S3 blob storage");
            Ok(Arc::new(store))
        }
    }
}

/// Fresh key for an upload. Only `[A-Za-z0-9._-]` survive from the client's filename.
pub fn generate_key(filename: &str) -> String {
    let mut clean: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while clean.contains("..") {
        clean = clean.replace("..", ".");
    }
    clean = clean.trim_start_matches('.').to_string();
    if clean.is_empty() {
        clean = "file".to_string();
    }
    if clean.len() > 100 {
        clean.truncate(100);
    }
    format!("{}/{}-{}", KEY_PREFIX, Uuid::new_v4(), clean)
}

fn validate_key(key: &str) -> Result<(), BlobError> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Files under a directory on local disk. Served back by the HTTP server under `/blobs`.
#[derive(Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> Result<Self, BlobError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            BlobError::Config(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(Self {
            base_path,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_to_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(
        &self,
        filename: &str,
        _content_type: &str,
        data: Bytes,
    ) -> Result<StoredBlob, BlobError> {
        let key = generate_key(filename);
        let path = self.key_to_path(&key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::File::create(&path).await.map_err(|e| {
            BlobError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;
        persist(file, &path, &data).await?;

        let url = format!("{}/{}", self.base_url, key);
        tracing::debug!(key = %key, size_bytes = data.len(), "Stored blob on local disk");

        Ok(StoredBlob { key, url })
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.key_to_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Write and sync `data`; a file that did not make it to disk whole is removed.
async fn persist(mut file: fs::File, path: &Path, data: &[u8]) -> Result<(), BlobError> {
    let written = async {
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;

    match written {
        Ok(()) => Ok(()),
        Err(e) => {
            drop(file);
            discard_partial(path).await;
            Err(BlobError::UploadFailed(format!(
                "Failed to write file {}: {}",
                path.display(),
                e
            )))
        }
    }
}

async fn discard_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial blob"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to remove partial blob"),
    }
}

/// Amazon S3 or any S3-compatible provider (MinIO, R2, Spaces).
#[derive(Clone)]
pub struct S3BlobStore {
    store: AmazonS3,
    public_base_url: String,
}

impl S3BlobStore {
    /// Credentials come from the usual `AWS_*` environment variables.
    pub fn new(
        bucket: String,
        region: String,
        endpoint: Option<String>,
        public_base_url: Option<String>,
    ) -> Result<Self, BlobError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| BlobError::Config(e.to_string()))?;

        let public_base_url = public_base_url.unwrap_or_else(|| match endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", bucket, region),
        });

        Ok(Self {
            store,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(
        &self,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredBlob, BlobError> {
        let key = generate_key(filename);
        let location = ObjectPath::from(key.as_str());
        let size = data.len();

        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| BlobError::UploadFailed(e.to_string()))?;

        tracing::debug!(key = %key, content_type = %content_type, size_bytes = size, "Stored blob in S3");

        Ok(StoredBlob {
            url: format!("{}/{}", self.public_base_url, key),
            key,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        validate_key(key)?;
        let location = ObjectPath::from(key);
        self.store.delete(&location).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_string()),
            other => BlobError::DeleteFailed(other.to_string()),
        })
    }
}
