//! Records for received and sent mail

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::parser::ParsedMessage;
use crate::resolver::DEFAULT_USER_ID;

/// Stand-in for a missing sender or recipient header
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Stand-in for a missing subject
pub const NO_SUBJECT: &str = "(no subject)";

const ATTACHMENTS_PREFIX: &str = "Attachments: ";

/// A message accepted by the inbound listener
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub body: String,
    pub resolved_user_id: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build the stored form of a parsed message, substituting placeholders
    /// for every absent or blank field.
    pub fn from_parsed(
        parsed: ParsedMessage,
        resolved_user_id: String,
        received_at: DateTime<Utc>,
    ) -> Self {
        let resolved_user_id = if resolved_user_id.is_empty() {
            DEFAULT_USER_ID.to_owned()
        } else {
            resolved_user_id
        };

        Self {
            from_address: non_blank(parsed.from).unwrap_or_else(|| UNKNOWN_ADDRESS.to_owned()),
            to_address: non_blank(parsed.to).unwrap_or_else(|| UNKNOWN_ADDRESS.to_owned()),
            subject: non_blank(parsed.subject).unwrap_or_else(|| NO_SUBJECT.to_owned()),
            body: parsed.body.unwrap_or_default(),
            resolved_user_id,
            received_at,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Persisted form of an [`InboundMessage`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedMessageRecord {
    pub id: String,
    #[serde(flatten)]
    pub message: InboundMessage,
}

/// A message the external transport accepted for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub user_id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachment_names: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    /// Subject, body and attachment manifest folded into the single text
    /// blob kept in a [`SentMessageRecord`].
    pub fn record_text(&self) -> String {
        let mut text = format!("Subject: {}\n\n{}", self.subject, self.body);
        if !self.attachment_names.is_empty() {
            text.push_str("\n\n");
            text.push_str(ATTACHMENTS_PREFIX);
            text.push_str(&self.attachment_names.join(", "));
        }
        text
    }
}

/// Persisted form of an [`OutboundMessage`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessageRecord {
    pub id: String,
    pub user_id: String,
    pub recipient: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Subject, body and attachment names recovered from a record's text
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessageParts {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<String>,
}

impl SentMessageRecord {
    /// Unfold the text written by [`OutboundMessage::record_text`].
    ///
    /// A body whose last paragraph itself starts with `Attachments: ` is
    /// indistinguishable from a manifest; the format has no escape for it.
    pub fn parts(&self) -> SentMessageParts {
        let (subject, rest) = match self.message.strip_prefix("Subject: ") {
            Some(after) => match after.split_once("\n\n") {
                Some((subject, rest)) => (subject.to_owned(), rest),
                None => (after.to_owned(), ""),
            },
            None => (String::new(), self.message.as_str()),
        };

        let manifest = rest
            .rfind("\n\n")
            .map(|pos| (&rest[..pos], &rest[pos + 2..]))
            .filter(|(_, tail)| tail.starts_with(ATTACHMENTS_PREFIX) && !tail.contains('\n'));

        match manifest {
            Some((body, tail)) => SentMessageParts {
                subject,
                body: body.to_owned(),
                attachments: tail[ATTACHMENTS_PREFIX.len()..]
                    .split(", ")
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect(),
            },
            None => SentMessageParts {
                subject,
                body: rest.to_owned(),
                attachments: Vec::new(),
            },
        }
    }
}
