//! E-mail delivery over SMTP
//!
//! Connection details come from the site settings, so admins can change them
//! at runtime. Nothing is sent while SMTP is not configured.

use anyhow::{anyhow, Result};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

use crate::services::settings::{SettingsService, SiteSettings};

/// A plain-text e-mail
#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends e-mails with the SMTP settings of the site
pub struct EmailService {
    settings: Arc<SettingsService>,
}

impl EmailService {
    pub fn new(settings: Arc<SettingsService>) -> Self {
        Self { settings }
    }

    /// Whether SMTP delivery is configured
    pub async fn is_enabled(&self) -> bool {
        self.settings
            .get_site_settings()
            .await
            .map(|s| s.smtp_configured())
            .unwrap_or(false)
    }

    /// Send one e-mail, failing when SMTP is not configured
    pub async fn send(&self, email: &Email) -> Result<()> {
        let settings = self.settings.get_site_settings().await?;
        if !settings.smtp_configured() {
            return Err(anyhow!("SMTP is not configured"));
        }

        let message = build_message(&settings, email)?;
        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .port(settings.smtp_port);
        if !settings.smtp_username.is_empty() {
            transport = transport.credentials(Credentials::new(
                settings.smtp_username.clone(),
                settings.smtp_password.clone(),
            ));
        }

        transport
            .build()
            .send(message)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;
        tracing::debug!("Sent e-mail to {}", email.to);
        Ok(())
    }

    /// Send a test message so admins can check the SMTP settings
    pub async fn send_test_email(&self, to: &str) -> Result<()> {
        let settings = self.settings.get_site_settings().await?;
        self.send(&Email {
            to: to.to_string(),
            subject: format!("[{}] Test e-mail", settings.site_name),
            body: format!(
                "This is a test message from {}.\n\nIf you received it, e-mail delivery works.",
                settings.site_name
            ),
        })
        .await
    }
}

fn build_message(settings: &SiteSettings, email: &Email) -> Result<Message> {
    let from = format!("{} <{}>", settings.site_name, settings.smtp_from);
    Message::builder()
        .from(from.parse().map_err(|e| anyhow!("Invalid from address: {}", e))?)
        .to(email.to.parse().map_err(|e| anyhow!("Invalid to address: {}", e))?)
        .subject(format!("[{}] {}", settings.site_name, email.subject))
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|e| anyhow!("Failed to build email: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> SiteSettings {
        SiteSettings {
            site_name: "StoryShare".into(),
            smtp_host: "smtp.example.com".into(),
            smtp_from: "noreply@example.com".into(),
            ..SiteSettings::default()
        }
    }

    #[test]
    fn test_build_message() {
        let email = Email {
            to: "ana@example.com".into(),
            subject: "Your story was approved".into(),
            body: "Thank you".into(),
        };
        let message = build_message(&configured(), &email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [StoryShare] Your story was approved"));
        assert!(raw.contains("To: ana@example.com"));
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let email = Email {
            to: "not an address".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(build_message(&configured(), &email).is_err());
    }
}
