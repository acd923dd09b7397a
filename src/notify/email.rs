// src/notify/email.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::AsyncSmtpTransport;
use lettre::{AsyncTransport, Tokio1Executor};

use super::Deliverer;
use crate::config::EmailConfig;
use crate::report::render::{render_html, render_text};
use crate::report::{Artifact, ReportPayload};

/// SMTP delivery over a STARTTLS relay. Without host and user configured
/// every call returns `Ok(false)`.
pub struct EmailDeliverer {
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl EmailDeliverer {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        if !cfg.is_configured() {
            return Ok(Self {
                mailer: None,
                from: String::new(),
            });
        }

        let creds = Credentials::new(cfg.user.clone(), cfg.pass.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .with_context(|| format!("invalid EMAIL_HOST {}", cfg.host))?
            .port(cfg.port)
            .credentials(creds)
            .build();
        let from = if cfg.from.is_empty() {
            cfg.user.clone()
        } else {
            cfg.from.clone()
        };

        Ok(Self {
            mailer: Some(mailer),
            from,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.mailer.is_some()
    }

    fn build_message(&self, payload: &ReportPayload, artifact: Option<&Artifact>, attachment: Option<Vec<u8>>, recipients: &[String]) -> Result<Message> {
        let from: Mailbox = self
            .from
            .parse()
            .with_context(|| format!("invalid sender address {}", self.from))?;
        let mut builder = Message::builder()
            .from(from)
            .subject(format!("Agworld Report - {}", payload.title));
        for r in recipients {
            let to: Mailbox = r
                .trim()
                .parse()
                .with_context(|| format!("invalid recipient address {r}"))?;
            builder = builder.to(to);
        }

        let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
            render_text(payload),
            render_html(payload),
        ));
        if let (Some(a), Some(bytes)) = (artifact, attachment) {
            let ct = ContentType::parse(a.format.mime()).map_err(|e| anyhow!("attachment content type: {e}"))?;
            body = body.singlepart(Attachment::new(a.file_name()).body(bytes, ct));
        }

        builder.multipart(body).context("build email")
    }
}

#[async_trait]
impl Deliverer for EmailDeliverer {
    async fn deliver(&self, payload: &ReportPayload, artifact: Option<&Artifact>, recipients: &[String]) -> Result<bool> {
        let Some(mailer) = &self.mailer else {
            tracing::warn!(target: "report", "email not configured (EMAIL_HOST/EMAIL_USER), skipping delivery");
            return Ok(false);
        };

        let attachment = match artifact {
            Some(a) => Some(
                tokio::fs::read(&a.path)
                    .await
                    .with_context(|| format!("reading attachment {}", a.path.display()))?,
            ),
            None => None,
        };
        let msg = self.build_message(payload, artifact, attachment, recipients)?;

        mailer.send(msg).await.context("send email")?;
        tracing::info!(target: "report", recipients = recipients.len(), "email sent");
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
