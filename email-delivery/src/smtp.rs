use crate::render::{render_html, render_plain, subject_line};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use interfaces::defs::{CriteriaResult, FeedEntry, FeedGroup, PaperSummary, ScreeningVerdict};
use interfaces::digest::{Digest, DigestItem, DigestSection, DigestStats};
use interfaces::traits::DigestDelivery;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tracing::{error, info};

fn default_port() -> u16 {
    587
}

fn default_sender_name() -> String {
    "paper-screener".to_string()
}

/// SMTP settings. Connections always upgrade with STARTTLS.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default = "default_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Missing email settings: {}", .0.join(", "))]
    MissingSettings(Vec<&'static str>),

    #[error("Invalid email address {address}: {source}")]
    InvalidAddress {
        address: String,
        source: lettre::address::AddressError,
    },
}

impl SmtpConfig {
    pub fn validate(&self) -> std::result::Result<(), EmailError> {
        let missing: Vec<&'static str> = [
            ("smtp_server", &self.smtp_server),
            ("username", &self.username),
            ("password", &self.password),
            ("recipient", &self.recipient),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty() || value.contains("${"))
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EmailError::MissingSettings(missing))
        }
    }
}

fn parse_address(address: &str) -> std::result::Result<Address, EmailError> {
    address.trim().parse::<Address>().map_err(|source| EmailError::InvalidAddress {
        address: address.to_string(),
        source,
    })
}

/// Delivers digests as multipart plain-text + HTML email.
pub struct SmtpDelivery {
    config: SmtpConfig,
}

impl SmtpDelivery {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Build the message without sending it.
    pub fn build_message(&self, digest: &Digest) -> Result<Message> {
        let from = Mailbox::new(
            Some(self.config.sender_name.clone()),
            parse_address(&self.config.username)?,
        );
        let to = Mailbox::new(None, parse_address(&self.config.recipient)?);

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject_line(digest, &self.config.sender_name))
            .multipart(MultiPart::alternative_plain_html(
                render_plain(digest),
                render_html(digest),
            ))?;
        Ok(message)
    }

    async fn send(&self, message: Message) -> Result<()> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_server)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .build();

        match transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", self.config.recipient);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email via {}: {}", self.config.smtp_server, e);
                Err(e.into())
            }
        }
    }

    /// Send a one-paper sample digest to check the settings.
    pub async fn send_test_email(&self) -> Result<()> {
        let message = self.build_message(&sample_digest())?;
        self.send(message).await
    }
}

#[async_trait]
impl DigestDelivery for SmtpDelivery {
    async fn deliver(&self, digest: &Digest) -> Result<()> {
        info!(
            "Sending digest with {} papers to {}",
            digest.item_count(),
            self.config.recipient
        );
        let message = self.build_message(digest)?;
        self.send(message).await
    }
}

/// Digest with a single placeholder paper, used by the test email.
pub fn sample_digest() -> Digest {
    let now = Utc::now();
    let entry = FeedEntry::new(
        "https://example.com/test-paper",
        "Test Paper: This is a test notification",
        FeedGroup::HighQuality,
    )
    .with_feed("https://example.com/rss", "Test Journal")
    .with_authors("Test Author (Test Institution)");

    let verdict = ScreeningVerdict {
        accepted: true,
        degraded: false,
        criteria: CriteriaResult::default(),
        summary: PaperSummary {
            problem: Some("verifying the email configuration".to_string()),
            method: None,
            data: None,
            highlights: Some("if you can read this, delivery works".to_string()),
        },
        raw_model_output: String::new(),
    };

    Digest {
        generated_at: now,
        period_from: Some(now),
        period_to: Some(now),
        sections: vec![DigestSection {
            group: FeedGroup::HighQuality,
            items: vec![DigestItem {
                entry,
                verdict,
                newly_screened: true,
            }],
        }],
        stats: DigestStats {
            feeds: 1,
            screened: 1,
            accepted: 1,
        },
    }
}
