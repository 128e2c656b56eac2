//! Owner notifications.
//!
//! Delivery is best effort: callers log a failed [`Notifier::notify`] and move on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send an HTML message to a single recipient.
    async fn notify(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError>;
}

/// Pick SMTP when it is configured, otherwise only log what would have been sent.
pub fn from_config(smtp: Option<&SmtpConfig>) -> Result<Arc<dyn Notifier>, NotifyError> {
    match smtp {
        Some(config) => Ok(Arc::new(SmtpNotifier::new(config)?)),
        None => {
            tracing::warn!("SMTP not configured; upload notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|_| NotifyError::Address(config.from.clone()))?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let builder = builder.port(config.port);
        let builder = match (&config.user, &config.password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        tracing::info!(
            host = %config.host,
            port = config.port,
            starttls = config.starttls,
            "SMTP notifier initialized"
        );

        Ok(Self {
            mailer: Arc::new(builder.build()),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let to_addr: Mailbox = to
            .parse()
            .map_err(|_| NotifyError::Address(to.to_string()))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to_addr)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| NotifyError::Message(e.to_string()))?;

        let response = self
            .mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        tracing::info!(to = %to, code = %response.code(), "Notification email sent");
        Ok(())
    }
}

/// Development fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        tracing::info!(to = %to, subject = %subject, body_len = html_body.len(), "Notification (not sent, SMTP disabled)");
        Ok(())
    }
}

pub const UPLOAD_SUBJECT: &str = "File Upload Successful - Download Link";

/// HTML body for the "your link is ready" email.
pub fn upload_notice(
    owner_name: &str,
    original_name: &str,
    download_link: &str,
    expiry_time: DateTime<Utc>,
) -> String {
    format!(
        "<h2>File Upload Successful!</h2>\n\
         <p>Hello {name},</p>\n\
         <p>Your file \"<strong>{file}</strong>\" has been uploaded successfully.</p>\n\
         <p><strong>Download Link:</strong> <a href=\"{link}\">{link}</a></p>\n\
         <p><strong>Expires:</strong> {expiry}</p>\n\
         <p>This link will expire in 1 hour from upload time.</p>\n\
         <br>\n\
         <p>Best regards,<br>File Sharing Team</p>\n",
        name = escape_html(owner_name),
        file = escape_html(original_name),
        link = escape_html(download_link),
        expiry = expiry_time.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn notice_mentions_link_and_expiry() {
        let expiry = Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap();
        let body = upload_notice(
            "Ada",
            "notes.txt",
            "http://localhost:5000/download/abc",
            expiry,
        );

        assert!(body.contains("Hello Ada,"));
        assert!(body.contains("<strong>notes.txt</strong>"));
        assert!(body.contains("href=\"http://localhost:5000/download/abc\""));
        assert!(body.contains("2025-03-01 13:00:00 UTC"));
    }

    #[test]
    fn notice_escapes_user_supplied_text() {
        let body = upload_notice("<b>Eve</b>", "x\"><script>.txt", "http://x/download/1", Utc::now());
        assert!(!body.contains("<script>"));
        assert!(body.contains("&lt;b&gt;Eve&lt;/b&gt;"));
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        LogNotifier
            .notify("a@example.com", UPLOAD_SUBJECT, "<p>hi</p>")
            .await
            .unwrap();
    }

    #[test]
    fn smtp_notifier_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: None,
            password: None,
            from: "not an address".to_string(),
            starttls: false,
        };
        assert!(matches!(SmtpNotifier::new(&config), Err(NotifyError::Address(_))));
    }
}
