//! Sends a user's mail upstream and records what was sent

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::OutboundConfig;
use crate::message::OutboundMessage;
use crate::store::{MailStore, StoreError};
use crate::transport::{
    Attachment, MailTransport, OutgoingEmail, SmtpRelayTransport, TransportError,
    TransportReceipt,
};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("sender lookup failed: {0}")]
    UserLookup(#[from] StoreError),

    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
}

/// Where a user's own sending address comes from
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn sender_address(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

/// Composes `<emailPrefix>@<domain>` from the user's stored settings
pub struct PrefixDirectory {
    store: Arc<dyn MailStore>,
    domain: String,
}

impl PrefixDirectory {
    pub fn new(store: Arc<dyn MailStore>, domain: impl Into<String>) -> Self {
        Self {
            store,
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl UserDirectory for PrefixDirectory {
    async fn sender_address(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let prefix = self.store.email_prefix(user_id).await?;
        Ok(prefix
            .filter(|p| !p.trim().is_empty())
            .map(|p| format!("{}@{}", p.trim(), self.domain)))
    }
}

/// One send as requested by a user
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub user_id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub receipt: TransportReceipt,
    pub message: OutboundMessage,
}

#[derive(Clone)]
pub struct OutboundRelay {
    config: OutboundConfig,
    transport: Arc<dyn MailTransport>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn MailStore>,
}

impl OutboundRelay {
    pub fn new(
        config: OutboundConfig,
        transport: Arc<dyn MailTransport>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn MailStore>,
    ) -> Self {
        Self {
            config,
            transport,
            users,
            store,
        }
    }

    /// Relay through lettre, taking sender addresses from stored prefixes
    /// under `domain`
    pub fn from_config(
        config: OutboundConfig,
        store: Arc<dyn MailStore>,
        domain: &str,
    ) -> Result<Self, TransportError> {
        let transport = Arc::new(SmtpRelayTransport::new(&config)?);
        let users = Arc::new(PrefixDirectory::new(store.clone(), domain));
        Ok(Self::new(config, transport, users, store))
    }

    /// Send one message.
    ///
    /// A record is written only when the relay accepted the message, and a
    /// failure to write it does not turn the send into a failure.
    pub async fn send_mail(&self, request: SendRequest) -> Result<SendReceipt, RelayError> {
        let from = match self.users.sender_address(&request.user_id).await? {
            Some(address) => address,
            None => self.config.fallback_sender(),
        };

        let email = OutgoingEmail {
            from,
            to: request.to.clone(),
            subject: request.subject.clone(),
            body: request.body.clone(),
            attachments: request.attachments,
        };

        let receipt = self.transport.send(&email).await.inspect_err(|err| {
            warn!(user = %request.user_id, to = %email.to, error = %err, "send failed");
        })?;

        info!(
            user = %request.user_id,
            from = %email.from,
            to = %email.to,
            code = %receipt.code,
            "message relayed"
        );

        let message = OutboundMessage {
            user_id: request.user_id,
            recipient: request.to,
            subject: request.subject,
            body: request.body,
            attachment_names: email
                .attachments
                .iter()
                .map(|a| a.filename.clone())
                .collect(),
            timestamp: Utc::now(),
        };

        if let Err(err) = self.store.append_sent(&message).await {
            warn!(user = %message.user_id, error = %err, "failed to record sent message");
        }

        Ok(SendReceipt { receipt, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::testing::FailingStore;
    use crate::transport::AttachmentSource;
    use crate::transport::testing::RecordingTransport;

    fn config() -> OutboundConfig {
        OutboundConfig {
            host: "smtp.example.org".into(),
            port: 587,
            ..Default::default()
        }
    }

    fn relay(
        transport: Arc<RecordingTransport>,
        store: Arc<dyn MailStore>,
    ) -> OutboundRelay {
        let users = Arc::new(PrefixDirectory::new(store.clone(), "mail.local"));
        OutboundRelay::new(config(), transport, users, store)
    }

    fn request(subject: &str) -> SendRequest {
        SendRequest {
            user_id: "1".into(),
            to: "a@b.com".into(),
            subject: subject.into(),
            body: "Hello".into(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_send_records_message() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let relay = relay(transport.clone(), store.clone());

        let receipt = relay.send_mail(request("Hi")).await.unwrap();
        assert_eq!(receipt.receipt.code, "250");
        assert_eq!(receipt.message.recipient, "a@b.com");

        let sent = store.list_sent("1").await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, "Subject: Hi\n\nHello");
        assert_eq!(transport.sent.lock().await[0].from, "no-reply@smtp.example.org");
    }

    #[tokio::test]
    async fn test_sender_from_prefix() {
        let store = Arc::new(MemoryStore::new());
        store.set_email_prefix("1", "alice").await.unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let relay = relay(transport.clone(), store);

        relay.send_mail(request("Hi")).await.unwrap();
        assert_eq!(transport.sent.lock().await[0].from, "alice@mail.local");
    }

    #[tokio::test]
    async fn test_sender_from_default_from() {
        let store: Arc<dyn MailStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let users = Arc::new(PrefixDirectory::new(store.clone(), "mail.local"));
        let config = OutboundConfig {
            default_from: Some("mailer@example.org".into()),
            ..config()
        };
        let relay = OutboundRelay::new(config, transport.clone(), users, store);

        relay.send_mail(request("Hi")).await.unwrap();
        assert_eq!(transport.sent.lock().await[0].from, "mailer@example.org");
    }

    #[tokio::test]
    async fn test_transport_failure_stores_nothing() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::failing());
        let relay = relay(transport, store.clone());

        let result = relay.send_mail(request("Hi")).await;
        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert!(store.list_sent("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_after_send_still_succeeds() {
        let transport = Arc::new(RecordingTransport::default());
        let store: Arc<dyn MailStore> = Arc::new(MemoryStore::new());
        let users = Arc::new(PrefixDirectory::new(store, "mail.local"));
        let relay = OutboundRelay::new(config(), transport.clone(), users, Arc::new(FailingStore));

        assert!(relay.send_mail(request("Hi")).await.is_ok());
        assert_eq!(transport.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_returned() {
        let transport = Arc::new(RecordingTransport::default());
        let relay = relay(transport.clone(), Arc::new(FailingStore));

        let result = relay.send_mail(request("Hi")).await;
        assert!(matches!(result, Err(RelayError::UserLookup(_))));
        assert!(transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_identical_sends_are_not_deduplicated() {
        let store = Arc::new(MemoryStore::new());
        let relay = relay(Arc::new(RecordingTransport::default()), store.clone());

        relay.send_mail(request("Hi")).await.unwrap();
        relay.send_mail(request("Hi")).await.unwrap();
        let sent = store.list_sent("1").await.unwrap();
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0].id, sent[1].id);
    }

    #[tokio::test]
    async fn test_attachment_names_recorded() {
        let store = Arc::new(MemoryStore::new());
        let relay = relay(Arc::new(RecordingTransport::default()), store.clone());

        let mut with_files = request("Files");
        with_files.attachments = vec![
            Attachment {
                filename: "a.pdf".into(),
                source: AttachmentSource::Inline(vec![1]),
                content_type: Some("application/pdf".into()),
            },
            Attachment {
                filename: "b.png".into(),
                source: AttachmentSource::Inline(vec![2]),
                content_type: None,
            },
        ];
        let receipt = relay.send_mail(with_files).await.unwrap();

        assert_eq!(receipt.message.attachment_names, vec!["a.pdf", "b.png"]);
        assert_eq!(
            store.list_sent("1").await.unwrap()[0].message,
            "Subject: Files\n\nHello\n\nAttachments: a.pdf, b.png"
        );
    }
}
