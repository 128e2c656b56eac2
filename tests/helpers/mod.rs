//! Test helpers: a throwaway SQLite database, in-memory adapters, and the router.
//!
//! Run with: `cargo test --test api_test` (or any other file in `tests/`).

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use linkdrop::auth::AuthUser;
use linkdrop::blob::{BlobError, BlobStore, StoredBlob};
use linkdrop::config::Config;
use linkdrop::notify::{Notifier, NotifyError};
use linkdrop::storage::FileStorage;
use linkdrop::transfer::TransferService;
use linkdrop::user_models::User;
use linkdrop::user_storage::UserStorage;
use linkdrop::{db, handlers, AppState};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-bytes";
pub const PUBLIC_BASE_URL: &str = "http://share.test";

/// Fresh database in its own directory; the directory lives as long as this value.
pub struct TestDb {
    pub pool: SqlitePool,
    pub url: String,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = db::connect(&url, 8).await.expect("Failed to open test database");
    TestDb {
        pool,
        url,
        _dir: dir,
    }
}

pub fn test_config(environment: &str) -> Config {
    Config {
        environment: environment.to_string(),
        jwt_secret: Some(TEST_SECRET.to_string()),
        bcrypt_cost: 4,
        public_base_url: PUBLIC_BASE_URL.to_string(),
        ..Config::default()
    }
}

/// Blob store that keeps counts and can be told to fail.
#[derive(Default)]
pub struct FakeBlobStore {
    pub stored: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub fail_store: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FakeBlobStore {
    pub fn store_calls(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn store(
        &self,
        filename: &str,
        _content_type: &str,
        _data: Bytes,
    ) -> Result<StoredBlob, BlobError> {
        self.stored.fetch_add(1, Ordering::SeqCst);
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(BlobError::UploadFailed("bucket unavailable".to_string()));
        }
        let key = linkdrop::blob::generate_key(filename);
        Ok(StoredBlob {
            url: format!("https://blobs.test/{}", key),
            key,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.deleted.lock().unwrap().push(key.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BlobError::DeleteFailed("bucket unavailable".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("connection refused".to_string()))
    }
}

/// Services wired against fakes, without HTTP in between.
pub struct Harness {
    pub db: TestDb,
    pub files: Arc<FileStorage>,
    pub users: Arc<UserStorage>,
    pub blobs: Arc<FakeBlobStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub transfer: TransferService,
}

pub async fn harness() -> Harness {
    harness_with_notifier(None).await
}

/// `notifier` replaces the recording notifier in the service; the recorder is still returned.
pub async fn harness_with_notifier(notifier: Option<Arc<dyn Notifier>>) -> Harness {
    let db = test_db().await;
    let files = Arc::new(FileStorage::new(db.pool.clone()));
    let users = Arc::new(UserStorage::new(db.pool.clone()));
    let blobs = Arc::new(FakeBlobStore::default());
    let recorder = Arc::new(RecordingNotifier::default());
    let active: Arc<dyn Notifier> = notifier.unwrap_or_else(|| recorder.clone());

    let transfer = TransferService::new(
        files.clone(),
        users.clone(),
        blobs.clone(),
        active,
        PUBLIC_BASE_URL,
    );

    Harness {
        db,
        files,
        users,
        blobs,
        notifier: recorder,
        transfer,
    }
}

impl Harness {
    /// A record store on its own pool, already closed, so every query fails.
    pub async fn closed_file_storage(&self) -> Arc<FileStorage> {
        let pool = db::connect(&self.db.url, 1)
            .await
            .expect("Failed to open second pool");
        pool.close().await;
        Arc::new(FileStorage::new(pool))
    }

    /// Insert a user directly and return the identity the auth layer would produce.
    pub async fn user(&self, name: &str, email: &str) -> AuthUser {
        let user = self
            .users
            .create_user(User::new(name.to_string(), email.to_string(), "x".to_string()))
            .await
            .expect("Failed to create user");
        AuthUser {
            user_id: user.id,
            email: user.email,
        }
    }
}

/// Full router over a fresh database with fake adapters.
pub struct TestApp {
    pub router: Router,
    pub db: TestDb,
    pub blobs: Arc<FakeBlobStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn test_app(environment: &str) -> TestApp {
    let db = test_db().await;
    let blobs = Arc::new(FakeBlobStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(
        test_config(environment),
        db.pool.clone(),
        blobs.clone(),
        notifier.clone(),
    )
    .expect("Failed to build app state");

    TestApp {
        router: handlers::router(state),
        db,
        blobs,
        notifier,
    }
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

const BOUNDARY: &str = "linkdrop-test-boundary";

/// `multipart/form-data` upload with a single `file` field.
pub fn upload_request(token: Option<&str>, filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
