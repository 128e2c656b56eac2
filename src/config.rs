use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DATABASE_URL: &str = "sqlite://linkdrop.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;
const DEFAULT_SMTP_PORT: u16 = 587;

/// Where uploaded bytes live.
#[derive(Debug, Clone)]
pub enum BlobConfig {
    Local {
        path: PathBuf,
        base_url: String,
    },
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
        public_base_url: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub starttls: bool,
}

/// Process configuration, read once at startup and handed to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: Option<String>,
    pub token_ttl_days: i64,
    pub bcrypt_cost: u32,
    pub public_base_url: String,
    pub blob: BlobConfig,
    pub smtp: Option<SmtpConfig>,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        let public_base_url = format!("http://localhost:{}", DEFAULT_PORT);
        Self {
            environment: "development".to_string(),
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            jwt_secret: None,
            token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            blob: BlobConfig::Local {
                path: PathBuf::from("./blobs"),
                base_url: format!("{}/blobs", public_base_url),
            },
            public_base_url,
            smtp: None,
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or(defaults.environment);

        let port = match var("PORT") {
            Some(p) => p.parse().with_context(|| format!("Invalid PORT: {}", p))?,
            None => defaults.port,
        };

        let db_max_connections = match var("DB_MAX_CONNECTIONS") {
            Some(n) => n
                .parse()
                .with_context(|| format!("Invalid DB_MAX_CONNECTIONS: {}", n))?,
            None => defaults.db_max_connections,
        };

        let token_ttl_days = match var("TOKEN_TTL_DAYS") {
            Some(d) => d
                .parse()
                .with_context(|| format!("Invalid TOKEN_TTL_DAYS: {}", d))?,
            None => defaults.token_ttl_days,
        };
        if token_ttl_days <= 0 {
            bail!("TOKEN_TTL_DAYS must be positive");
        }

        let bcrypt_cost = match var("BCRYPT_COST") {
            Some(c) => c
                .parse()
                .with_context(|| format!("Invalid BCRYPT_COST: {}", c))?,
            None => defaults.bcrypt_cost,
        };

        let public_base_url = var("PUBLIC_BASE_URL")
            .or_else(|| var("FRONTEND_URL"))
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        let backend = var("STORAGE_BACKEND").unwrap_or_else(|| "local".to_string());
        let blob = match backend.to_lowercase().as_str() {
            "local" => BlobConfig::Local {
                path: var("LOCAL_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./blobs")),
                base_url: var("LOCAL_STORAGE_BASE_URL")
                    .unwrap_or_else(|| format!("{}/blobs", public_base_url)),
            },
            "s3" => BlobConfig::S3 {
                bucket: var("S3_BUCKET").context("S3_BUCKET is required when STORAGE_BACKEND=s3")?,
                region: var("S3_REGION")
                    .or_else(|| var("AWS_REGION"))
                    .unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: var("S3_ENDPOINT"),
                public_base_url: var("S3_PUBLIC_BASE_URL"),
            },
            other => bail!("Unknown STORAGE_BACKEND: {} (expected 'local' or 's3')", other),
        };

        let smtp = match (var("SMTP_HOST"), var("SMTP_FROM")) {
            (Some(host), Some(from)) => Some(SmtpConfig {
                host,
                port: match var("SMTP_PORT") {
                    Some(p) => p.parse().with_context(|| format!("Invalid SMTP_PORT: {}", p))?,
                    None => DEFAULT_SMTP_PORT,
                },
                user: var("SMTP_USER"),
                password: var("SMTP_PASSWORD"),
                from,
                starttls: var("SMTP_STARTTLS")
                    .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no"))
                    .unwrap_or(true),
            }),
            _ => None,
        };

        Ok(Self {
            environment,
            port,
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections,
            jwt_secret: var("JWT_SECRET"),
            token_ttl_days,
            bcrypt_cost,
            public_base_url,
            blob,
            smtp,
            log_json: var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    /// Error details are only sent to clients outside production.
    pub fn expose_error_details(&self) -> bool {
        !self.is_production()
    }

    /// Only the HTTP server signs tokens, so the secret is checked lazily.
    pub fn jwt_secret(&self) -> Result<&str> {
        match self.jwt_secret.as_deref() {
            Some(secret) => Ok(secret),
            None => bail!("JWT_SECRET must be set"),
        }
    }
}
