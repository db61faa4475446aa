//! Outgoing mail over an upstream SMTP relay

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::{ContentType, ContentTypeErr};
use lettre::message::{Attachment as MimeAttachment, Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OutboundConfig;

const OCTET_STREAM: &str = "application/octet-stream";

/// Upper bound for every command exchanged with the relay
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("no recipients")]
    NoRecipients,

    #[error("invalid content type: {0}")]
    ContentType(#[from] ContentTypeErr),

    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("could not read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// Read from disk when the message is sent
    Path(PathBuf),
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub source: AttachmentSource,
    pub content_type: Option<String>,
}

/// A fully addressed message ready for the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    /// One address, or several separated by commas
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// What the relay answered for the final DATA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReceipt {
    pub code: String,
    pub message: Vec<String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, TransportError>;
}

/// Relays through the configured upstream server with lettre
#[derive(Clone)]
pub struct SmtpRelayTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelayTransport {
    /// Build the transport once from configuration.
    ///
    /// Port 465 uses implicit TLS, every other port upgrades with STARTTLS
    /// when the server offers it. Certificates are not verified in either
    /// mode since the relay sits on a trusted network.
    pub fn new(config: &OutboundConfig) -> Result<Self, TransportError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(tls_mode(config)?)
            .timeout(Some(COMMAND_TIMEOUT));

        if let Some((user, pass)) = config.credentials() {
            builder = builder.credentials(Credentials::new(user.to_owned(), pass.to_owned()));
        }

        debug!(
            host = %config.host,
            port = config.port,
            implicit_tls = config.implicit_tls(),
            "outbound transport configured"
        );

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

fn tls_mode(config: &OutboundConfig) -> Result<Tls, TransportError> {
    let parameters = TlsParameters::builder(config.host.clone())
        .dangerous_accept_invalid_certs(true)
        .dangerous_accept_invalid_hostnames(true)
        .build()?;

    Ok(if config.implicit_tls() {
        Tls::Wrapper(parameters)
    } else {
        Tls::Opportunistic(parameters)
    })
}

#[async_trait]
impl MailTransport for SmtpRelayTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, TransportError> {
        let message = build_message(email).await?;
        let response = self.mailer.send(message).await?;

        Ok(TransportReceipt {
            code: response.code().to_string(),
            message: response.message().map(|line| line.to_string()).collect(),
        })
    }
}

/// Compose the MIME message. Attachments turn it into multipart/mixed.
pub async fn build_message(email: &OutgoingEmail) -> Result<Message, TransportError> {
    let from: Mailbox = email.from.parse()?;
    let to: Mailboxes = email.to.parse()?;
    if to.iter().next().is_none() {
        return Err(TransportError::NoRecipients);
    }

    let mut builder = Message::builder().from(from).subject(email.subject.as_str());
    for mailbox in to {
        builder = builder.to(mailbox);
    }

    if email.attachments.is_empty() {
        return Ok(builder.body(email.body.clone())?);
    }

    let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
    for attachment in &email.attachments {
        let content = match &attachment.source {
            AttachmentSource::Inline(bytes) => bytes.clone(),
            AttachmentSource::Path(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|source| TransportError::Attachment {
                        path: path.clone(),
                        source,
                    })?
            }
        };
        let content_type = attachment_content_type(attachment)?;
        multipart = multipart
            .singlepart(MimeAttachment::new(attachment.filename.clone()).body(content, content_type));
    }

    Ok(builder.multipart(multipart)?)
}

fn attachment_content_type(attachment: &Attachment) -> Result<ContentType, ContentTypeErr> {
    match attachment.content_type.as_deref() {
        Some(requested) => ContentType::parse(requested).or_else(|_| {
            warn!(
                filename = %attachment.filename,
                content_type = requested,
                "invalid attachment content type, sending as {OCTET_STREAM}"
            );
            ContentType::parse(OCTET_STREAM)
        }),
        None => ContentType::parse(OCTET_STREAM),
    }
}
