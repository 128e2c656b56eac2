//! Application error taxonomy and its HTTP rendering.
//!
//! Every failure leaves the service as `{"success": false, "message": ...}`. The
//! `error` detail field is filled in by [`attach_error_details`], which holds the
//! configuration and only runs outside production.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

use crate::blob::BlobError;
use crate::db::StorageError;
use crate::handlers::AppState;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("User already exists with this email")]
    DuplicateEmail,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("File not found")]
    FileNotFound,

    #[error("Route not found")]
    RouteNotFound,

    #[error("Download link has expired")]
    LinkExpired,

    #[error("File exceeds the {limit} byte upload limit")]
    PayloadTooLarge { limit: usize },

    #[error("blob storage failure: {0}")]
    Blob(#[from] BlobError),

    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EmailTaken => AppError::DuplicateEmail,
            StorageError::Database(e) => AppError::Database(e),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::DuplicateEmail => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials
            | AppError::Unauthorized(_)
            | AppError::InvalidToken
            | AppError::ExpiredToken => StatusCode::UNAUTHORIZED,
            AppError::FileNotFound | AppError::RouteNotFound => StatusCode::NOT_FOUND,
            AppError::LinkExpired => StatusCode::GONE,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Blob(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show any client. Server-side failures never leak their cause here.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Blob(_) => "Error uploading file".to_string(),
            AppError::Database(_) | AppError::Internal(_) => "Something went wrong!".to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
        }
    }
}

/// Full error text, carried on the response for [`attach_error_details`].
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub message: String,
    pub detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let message = self.client_message();
        let detail = DetailChain(&self).to_string();

        let mut response = (status, Json(ErrorEnvelope::new(message.clone()))).into_response();
        response
            .extensions_mut()
            .insert(ErrorDetail { message, detail });
        response
    }
}

/// Renders an error followed by its `source()` chain.
struct DetailChain<'a>(&'a (dyn std::error::Error + 'static));

impl std::fmt::Display for DetailChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {}", cause)?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Rewrites error bodies to include the detail when the environment allows it.
pub async fn attach_error_details(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let detail = response.extensions_mut().remove::<ErrorDetail>();

    match detail {
        Some(ErrorDetail { message, detail }) if state.config.expose_error_details() => {
            let status = response.status();
            let body = ErrorEnvelope {
                success: false,
                message,
                error: Some(detail),
            };
            (status, Json(body)).into_response()
        }
        _ => response,
    }
}

/// Body for a handler panic, used with `tower_http::catch_panic`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let reason = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %reason, "Handler panicked");

    AppError::Internal(anyhow::anyhow!("handler panicked: {}", reason)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::DuplicateEmail.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::ExpiredToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::FileNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::LinkExpired.status_code(), StatusCode::GONE);
        assert_eq!(
            AppError::PayloadTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::Blob(BlobError::UploadFailed("down".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_errors_hide_their_cause_from_the_message() {
        let err = AppError::Blob(BlobError::UploadFailed("bucket missing".into()));
        assert_eq!(err.client_message(), "Error uploading file");

        let err = AppError::Internal(anyhow::anyhow!("connection reset"));
        assert_eq!(err.client_message(), "Something went wrong!");
    }

    #[test]
    fn storage_errors_map_onto_app_errors() {
        assert!(matches!(
            AppError::from(StorageError::EmailTaken),
            AppError::DuplicateEmail
        ));
        assert!(matches!(
            AppError::from(StorageError::Database(sqlx::Error::RowNotFound)),
            AppError::Database(_)
        ));
    }

    #[test]
    fn response_carries_detail_extension() {
        let response = AppError::Blob(BlobError::UploadFailed("bucket missing".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let detail = response.extensions().get::<ErrorDetail>().unwrap();
        assert_eq!(detail.message, "Error uploading file");
        assert!(detail.detail.contains("bucket missing"));
    }
}
