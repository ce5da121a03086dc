use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, error, info, warn};
use thiserror::Error;
use validator::ValidateEmail;

use crate::config::{MailConfig, SmtpSettings};
use crate::models::Report;
use crate::render::{pdf_filename, RenderError, ReportDocument, ReportRenderer};

/// Characters of the HTML body echoed by [`LogTransport`].
const LOG_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth another attempt (connection refused, 4xx SMTP reply, ...).
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Delivery backend for rendered reports.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;
    fn name(&self) -> &'static str;
}

/// Writes the message to the log instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let preview: String = mail.html_body.chars().take(LOG_PREVIEW_CHARS).collect();
        info!(
            "email report to={} subject={:?} attachment={}",
            mail.to,
            mail.subject,
            mail.attachment.as_ref().map(|a| format!("{} ({} bytes)", a.filename, a.bytes.len())).unwrap_or_else(|| "none".into())
        );
        debug!("email html preview: {preview}...");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(settings: &SmtpSettings) -> anyhow::Result<Self> {
        let builder = if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        let builder = builder.port(settings.port);
        let builder = match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };
        Ok(Self { transport: builder.build() })
    }
}

fn build_message(mail: &OutgoingMail) -> Result<Message, TransportError> {
    let from: Mailbox = mail
        .from
        .parse()
        .map_err(|e| TransportError::Permanent(format!("invalid sender address: {e}")))?;
    let to: Mailbox = mail
        .to
        .parse()
        .map_err(|e| TransportError::Permanent(format!("invalid recipient address: {e}")))?;

    let mut body = MultiPart::mixed().multipart(
        MultiPart::alternative()
            .singlepart(SinglePart::plain(mail.text_body.clone()))
            .singlepart(SinglePart::html(mail.html_body.clone())),
    );
    if let Some(att) = &mail.attachment {
        let content_type = ContentType::parse(att.content_type)
            .map_err(|e| TransportError::Permanent(format!("bad attachment type: {e}")))?;
        body = body.singlepart(MailAttachment::new(att.filename.clone()).body(att.bytes.clone(), content_type));
    }

    Message::builder()
        .from(from)
        .to(to)
        .subject(&mail.subject)
        .multipart(body)
        .map_err(|e| TransportError::Permanent(format!("failed to build email: {e}")))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let message = build_message(mail)?;
        self.transport.send(message).await.map_err(|e| {
            error!("SMTP send to {} failed: {e}", mail.to);
            if e.is_permanent() {
                TransportError::Permanent(e.to_string())
            } else {
                TransportError::Transient(e.to_string())
            }
        })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Picks the transport named by configuration.
pub fn build_transport(config: &MailConfig) -> anyhow::Result<Arc<dyn MailTransport>> {
    match config.transport.as_str() {
        "log" => Ok(Arc::new(LogTransport)),
        "smtp" => {
            let settings = config
                .smtp
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("MAIL_TRANSPORT=smtp requires SMTP_HOST"))?;
            Ok(Arc::new(SmtpTransport::new(settings)?))
        }
        other => Err(anyhow::anyhow!("unknown MAIL_TRANSPORT '{other}' (expected log or smtp)")),
    }
}

pub fn subject_for(report: &Report) -> String {
    format!("Vehicle Damage Report - {}", report.reference_number)
}

fn plain_text(doc: &ReportDocument) -> String {
    let mut out = format!("{}\nReference Number: {}\nStatus: {}\n", doc.title, doc.reference_number, doc.status);
    for section in &doc.sections {
        out.push_str(&format!("\n{}\n", section.title));
        for field in &section.fields {
            out.push_str(&format!("  {}: {}\n", field.label, field.value));
        }
    }
    out.push_str(&format!("\nPhotos: {}\n", doc.photos.len()));
    for photo in &doc.photos {
        out.push_str(&format!("  {}: {}\n", photo.label, photo.url));
    }
    out
}

/// Decides what goes into a report email and hands it to the transport.
#[derive(Clone)]
pub struct ReportMailer {
    transport: Arc<dyn MailTransport>,
    renderer: ReportRenderer,
    from: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ReportMailer {
    pub fn new(transport: Arc<dyn MailTransport>, renderer: ReportRenderer, from: impl Into<String>) -> Self {
        Self {
            transport,
            renderer,
            from: from.into(),
            max_attempts: 1,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn compose(
        &self,
        report: &Report,
        recipient: &str,
        include_attachment: bool,
    ) -> Result<OutgoingMail, DispatchError> {
        let recipient = recipient.trim().to_string();
        if recipient.is_empty() || !recipient.validate_email() {
            return Err(DispatchError::InvalidRecipient(recipient));
        }
        let generated_at = Utc::now();
        let html_body = self.renderer.render_html(report, generated_at)?;
        let text_body = plain_text(&self.renderer.document(report, generated_at));
        let attachment = if include_attachment {
            Some(Attachment {
                filename: pdf_filename(report),
                content_type: "application/pdf",
                bytes: self.renderer.render_pdf(report, generated_at)?,
            })
        } else {
            None
        };
        Ok(OutgoingMail {
            from: self.from.clone(),
            to: recipient,
            subject: subject_for(report),
            text_body,
            html_body,
            attachment,
        })
    }

    /// Renders and sends; transient transport failures are retried with linear backoff.
    pub async fn send_report(
        &self,
        report: &Report,
        recipient: &str,
        include_attachment: bool,
    ) -> Result<(), DispatchError> {
        // PDF rendering is CPU bound; keep it off the async workers.
        let mail = {
            let mailer = self.clone();
            let report = report.clone();
            let recipient = recipient.to_string();
            tokio::task::spawn_blocking(move || mailer.compose(&report, &recipient, include_attachment))
                .await
                .map_err(|e| RenderError::Pdf(format!("render task failed: {e}")))??
        };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.transport.send(&mail).await {
                Ok(()) => {
                    info!(
                        "report {} sent to {} via {} (attempt {attempt})",
                        report.reference_number,
                        mail.to,
                        self.transport.name()
                    );
                    return Ok(());
                }
                Err(TransportError::Transient(msg)) if attempt < self.max_attempts => {
                    let backoff = self.retry_delay * attempt;
                    warn!("mail attempt {attempt} for {} failed: {msg} (retrying in {backoff:?})", report.reference_number);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!("mail delivery for {} failed after {attempt} attempt(s): {e}", report.reference_number);
                    return Err(e.into());
                }
            }
        }
    }
}
