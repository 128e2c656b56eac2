use anyhow::Context;
use axum::{
    async_trait,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection, DefaultBodyLimit, FromRequest,
        Multipart, Path, Request, State,
    },
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::auth::{AuthService, AuthUser, TokenIssuer};
use crate::blob::{self, BlobStore};
use crate::config::{BlobConfig, Config};
use crate::error::{self, AppError};
use crate::models::{
    DownloadResponse, FileListResponse, HealthResponse, UploadResponse, UploadedFileInfo,
    MAX_UPLOAD_BYTES,
};
use crate::notify::{self, Notifier};
use crate::storage::FileStorage;
use crate::transfer::{IncomingFile, TransferService};
use crate::user_models::{AuthResponse, LoginRequest, RegisterRequest, UserSummary};
use crate::user_storage::UserStorage;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthService,
    pub transfer: TransferService,
}

impl AppState {
    /// Wire the services together from already-built adapters.
    pub fn new(
        config: Config,
        pool: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Arc<Self>> {
        let users = Arc::new(UserStorage::new(pool.clone()));
        let files = Arc::new(FileStorage::new(pool));
        let tokens = TokenIssuer::new(config.jwt_secret()?, config.token_ttl_days);

        let auth = AuthService::new(users.clone(), tokens, config.bcrypt_cost);
        let transfer = TransferService::new(
            files,
            users,
            blobs,
            notifier,
            config.public_base_url.clone(),
        );

        Ok(Arc::new(Self {
            config: Arc::new(config),
            auth,
            transfer,
        }))
    }

    /// Build the configured blob store and notifier, then wire everything.
    pub async fn from_config(config: Config, pool: SqlitePool) -> anyhow::Result<Arc<Self>> {
        let blobs = blob::from_config(&config.blob)
            .await
            .context("Failed to initialize blob storage")?;
        let notifier =
            notify::from_config(config.smtp.as_ref()).context("Failed to initialize notifier")?;
        Self::new(config, pool, blobs, notifier)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/login", post(login))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
        .route("/download/:id", get(download_file))
        .route("/my-files", get(my_files));

    if let BlobConfig::Local { path, .. } = &state.config.blob {
        app = app.nest_service("/blobs", ServeDir::new(path));
    }

    app.fallback(route_not_found)
        .method_not_allowed_fallback(route_not_found)
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::attach_error_details,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `Json<T>` whose rejections use the service's error envelope.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
            })?;
        Ok(JsonBody(inner))
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "File sharing backend is running!".to_string(),
    })
}

async fn route_not_found() -> AppError {
    AppError::RouteNotFound
}

async fn register(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let user = state.auth.register(payload).await?;
    let token = state.auth.issue_token(&user)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User registered successfully".to_string(),
            token,
            user: UserSummary::from(&user),
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = state.auth.login(payload).await?;
    let token = state.auth.issue_token(&user)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        token,
        user: UserSummary::from(&user),
    }))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge {
            limit: MAX_UPLOAD_BYTES,
        }
    } else {
        AppError::Validation(format!("Invalid multipart body: {}", e.body_text()))
    }
}

/// Reads the `file` field, giving up as soon as it outgrows the upload limit.
async fn read_file_field(multipart: &mut Multipart) -> Result<Option<IncomingFile>, AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field
            .file_name()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("upload.bin")
            .to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(AppError::PayloadTooLarge {
                    limit: MAX_UPLOAD_BYTES,
                });
            }
            data.extend_from_slice(&chunk);
        }

        return Ok(Some(IncomingFile {
            original_name,
            content_type,
            data: data.freeze(),
        }));
    }
    Ok(None)
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut multipart = multipart
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e.body_text())))?;
    let incoming = read_file_field(&mut multipart)
        .await?
        .ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;

    let outcome = state.transfer.upload(&user, incoming, Utc::now()).await?;
    let record = outcome.record;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            success: true,
            message: "File uploaded successfully".to_string(),
            file: UploadedFileInfo {
                id: record.id,
                original_name: record.original_name,
                download_link: outcome.download_link,
                expiry_time: record.expiry_time,
                file_size: record.file_size,
            },
        }),
    ))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadResponse>, AppError> {
    let grant = state.transfer.download(&id, Utc::now()).await?;

    Ok(Json(DownloadResponse {
        success: true,
        message: "File access granted".to_string(),
        file_url: grant.record.file_url,
        filename: grant.record.original_name,
        download_count: grant.record.download_count,
        uploaded_by: grant.owner_name,
        expiry_time: grant.record.expiry_time,
    }))
}

async fn my_files(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<FileListResponse>, AppError> {
    let files = state.transfer.list(&user, Utc::now()).await?;
    Ok(Json(FileListResponse {
        success: true,
        files,
    }))
}
