//! Outbound email
//!
//! Delivery sits behind [`EmailSender`]. `HttpMailer` posts messages to a mail
//! relay as JSON; `LogMailer` only logs them and is used when no relay is
//! configured. [`Mailer`] composes the reset and verification messages.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Failed to reach mail relay: {0}")]
    Transport(String),

    #[error("Mail relay returned status {0}")]
    Rejected(u16),
}

/// A plain-text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;

    fn name(&self) -> &str;
}

/// Sends through an HTTP mail relay
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpMailer {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url: relay_url.into(),
        }
    }
}

#[async_trait]
impl EmailSender for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(message)
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmailError::Rejected(response.status().as_u16()));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Logs messages instead of delivering them. The body is not logged since it
/// carries a live token.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl EmailSender for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        tracing::info!(to = %message.to, subject = %message.subject, "email not delivered (log transport)");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Builds account emails and hands them to a sender
#[derive(Clone)]
pub struct Mailer {
    sender: Arc<dyn EmailSender>,
    from: String,
    frontend_url: String,
}

impl Mailer {
    pub fn new(
        sender: Arc<dyn EmailSender>,
        from: impl Into<String>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            from: from.into(),
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn send(&self, to: &str, subject: &str, text: String) -> Result<(), EmailError> {
        let message = EmailMessage {
            from: self.from.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            text,
        };
        tracing::debug!(transport = self.sender.name(), %subject, "sending email");
        self.sender.send(&message).await
    }

    pub fn reset_password_message(&self, token: &str) -> String {
        let url = format!("{}/reset-password?token={token}", self.frontend_url);
        format!(
            "Dear user,\n\nTo reset your password, click on this link: {url}\n\n\
             If you did not request any password resets, then ignore this email."
        )
    }

    pub fn verification_message(&self, token: &str) -> String {
        let url = format!("{}/verify-email?token={token}", self.frontend_url);
        format!(
            "Dear user,\n\nTo verify your email, click on this link: {url}\n\n\
             If you did not create an account, then ignore this email."
        )
    }

    pub async fn send_reset_password(&self, to: &str, token: &str) -> Result<(), EmailError> {
        self.send(to, "Reset Password", self.reset_password_message(token))
            .await
    }

    pub async fn send_verification(&self, to: &str, token: &str) -> Result<(), EmailError> {
        self.send(to, "Email Verification", self.verification_message(token))
            .await
    }
}
