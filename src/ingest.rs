//! Turns accepted SMTP transactions into stored inbound messages

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::message::InboundMessage;
use crate::parser::{ParseError, parse_message};
use crate::resolver::{self, DEFAULT_USER_ID};
use crate::smtp::Envelope;
use crate::store::MailStore;

/// Parses, tags and stores every message the listener accepts
#[derive(Clone)]
pub struct InboundService {
    store: Arc<dyn MailStore>,
}

impl InboundService {
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        Self { store }
    }

    /// Ingest one completed DATA phase.
    ///
    /// Only a parse failure is returned; the listener rejects the
    /// transaction in that case. A store failure is logged and the message
    /// still counts as accepted.
    pub async fn ingest(&self, envelope: Envelope) -> Result<InboundMessage, ParseError> {
        let parsed = parse_message(&envelope.data).inspect_err(|err| {
            warn!(sender = %envelope.sender, error = %err, "rejecting unparseable message");
        })?;

        for attachment in &parsed.attachments {
            info!(
                filename = attachment.filename.as_deref().unwrap_or("(unnamed)"),
                content_type = attachment.content_type.as_deref().unwrap_or("(none)"),
                size = attachment.size,
                "inbound attachment"
            );
        }

        let user_id = owning_user(&envelope.recipients, parsed.to.as_deref());
        let message = InboundMessage::from_parsed(parsed, user_id, envelope.received_at);

        match self.store.append_inbound(&message).await {
            Ok(record) => debug!(
                id = %record.id,
                user = %message.resolved_user_id,
                subject = %message.subject,
                "stored inbound message"
            ),
            Err(err) => warn!(
                user = %message.resolved_user_id,
                error = %err,
                "failed to store inbound message"
            ),
        }

        Ok(message)
    }
}

/// The first directed address wins: envelope recipients in RCPT order, then
/// the `To:` header text.
fn owning_user(recipients: &[String], to_header: Option<&str>) -> String {
    recipients
        .iter()
        .map(String::as_str)
        .chain(to_header)
        .find_map(resolver::directed_user_id)
        .unwrap_or_else(|| DEFAULT_USER_ID.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::testing::FailingStore;

    fn envelope(recipients: &[&str], data: &str) -> Envelope {
        Envelope::new(
            "alice@example.com".to_string(),
            recipients.iter().map(|r| r.to_string()).collect(),
            data.as_bytes().to_vec(),
        )
    }

    #[tokio::test]
    async fn test_directed_message_is_tagged() {
        let store = Arc::new(MemoryStore::new());
        let service = InboundService::new(store.clone());

        let message = service
            .ingest(envelope(
                &["user-7@mail.local"],
                "Subject: Test\r\n\r\nBody text\r\n",
            ))
            .await
            .unwrap();

        assert_eq!(message.resolved_user_id, "7");
        assert_eq!(message.subject, "Test");
        assert_eq!(message.body, "Body text");
        assert_eq!(message.from_address, "unknown");
        assert_eq!(message.to_address, "unknown");

        let stored = store.list_inbound("7").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, message);
    }

    #[tokio::test]
    async fn test_undirected_message_goes_to_default() {
        let store = Arc::new(MemoryStore::new());
        let service = InboundService::new(store.clone());

        let message = service
            .ingest(envelope(
                &["postmaster@mail.local"],
                "From: Bob <bob@example.com>\r\nTo: team@mail.local\r\n\r\nhi\r\n",
            ))
            .await
            .unwrap();

        assert_eq!(message.resolved_user_id, "default");
        assert_eq!(message.subject, "(no subject)");
        assert_eq!(message.from_address, "Bob <bob@example.com>");
        assert_eq!(store.list_inbound("default").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_to_header_used_when_envelope_is_undirected() {
        let service = InboundService::new(Arc::new(MemoryStore::new()));

        let message = service
            .ingest(envelope(
                &["relay@mail.local"],
                "To: \"Carol\" <user-42@mail.local>\r\nSubject: fwd\r\n\r\nbody\r\n",
            ))
            .await
            .unwrap();

        assert_eq!(message.resolved_user_id, "42");
    }

    #[tokio::test]
    async fn test_first_directed_recipient_wins() {
        let service = InboundService::new(Arc::new(MemoryStore::new()));

        let message = service
            .ingest(envelope(
                &["other@mail.local", "user-3@mail.local", "user-9@mail.local"],
                "To: user-1@mail.local\r\n\r\nbody\r\n",
            ))
            .await
            .unwrap();

        assert_eq!(message.resolved_user_id, "3");
    }

    #[tokio::test]
    async fn test_malformed_message_is_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let service = InboundService::new(store.clone());

        let result = service
            .ingest(envelope(&["user-7@mail.local"], "this is not a header\r\n\r\nbody\r\n"))
            .await;

        assert!(matches!(result, Err(ParseError::MalformedHeader { .. })));
        assert!(store.list_inbound("7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let service = InboundService::new(Arc::new(FailingStore));

        let message = service
            .ingest(envelope(&["user-7@mail.local"], "Subject: Test\r\n\r\nBody text\r\n"))
            .await
            .unwrap();
        assert_eq!(message.resolved_user_id, "7");
    }

    #[test]
    fn test_owning_user() {
        assert_eq!(owning_user(&[], None), "default");
        assert_eq!(owning_user(&[], Some("user-5@x.org")), "5");
        assert_eq!(
            owning_user(&["user-1@x.org".to_string()], Some("user-5@x.org")),
            "1"
        );
    }
}
