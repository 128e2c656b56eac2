use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::AppError;
use crate::handlers::AppState;
use crate::user_models::{describe_validation, LoginRequest, RegisterRequest, User};
use crate::user_storage::UserStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks HS256 session tokens. Nothing is stored server-side.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, AppError> {
        self.issue_at(user_id, email, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: &str,
        email: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = Claims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }
}

pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("hashing task failed: {}", e)))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to hash password: {}", e)))
}

/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> bool {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

/// Registration and credential checks on top of [`UserStorage`].
#[derive(Clone)]
pub struct AuthService {
    users: Arc<UserStorage>,
    tokens: TokenIssuer,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(users: Arc<UserStorage>, tokens: TokenIssuer, bcrypt_cost: u32) -> Self {
        Self {
            users,
            tokens,
            bcrypt_cost,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<User, AppError> {
        let request = request.normalized();
        request
            .validate()
            .map_err(|e| AppError::Validation(describe_validation(&e)))?;

        let password_hash = hash_password(&request.password, self.bcrypt_cost).await?;
        let user = self
            .users
            .create_user(User::new(request.name, request.email, password_hash))
            .await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Same error for an unknown email and a wrong password.
    pub async fn login(&self, request: LoginRequest) -> Result<User, AppError> {
        let request = request.normalized();
        request
            .validate()
            .map_err(|e| AppError::Validation(describe_validation(&e)))?;

        let user = self
            .users
            .get_user_by_email(&request.email)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(&request.password, &user.password_hash).await {
            tracing::debug!(user_id = %user.id, "Password mismatch");
            return Err(AppError::InvalidCredentials);
        }

        Ok(user)
    }

    pub fn issue_token(&self, user: &User) -> Result<String, AppError> {
        self.tokens.issue(&user.id, &user.email)
    }
}

/// Caller identity taken from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = <Arc<AppState> as FromRef<S>>::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("No token, authorization denied".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization header format".to_string()))?;

        let claims = state.auth.tokens().verify(token)?;
        Ok(AuthUser {
            user_id: claims.user_id,
            email: claims.email,
        })
    }
}
