//! Expiring file links: authenticated uploads, public one-hour download links,
//! and an out-of-band reaper that purges what has expired.

pub mod auth;
pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod reaper;
pub mod storage;
pub mod telemetry;
pub mod transfer;
pub mod user_models;
pub mod user_storage;

pub use config::Config;
pub use error::AppError;
pub use handlers::{router, AppState};
