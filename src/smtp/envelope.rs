//! What one SMTP transaction hands over to ingestion

use chrono::{DateTime, Utc};

/// A message accepted by the listener, before any MIME parsing
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Reverse-path from MAIL FROM; empty for the null sender `<>`
    pub sender: String,

    /// Forward-paths from RCPT TO, in the order given
    pub recipients: Vec<String>,

    /// Raw DATA payload with dot-stuffing removed, CRLF line endings
    pub data: Vec<u8>,

    pub received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(sender: String, recipients: Vec<String>, data: Vec<u8>) -> Self {
        Self {
            sender,
            recipients,
            data,
            received_at: Utc::now(),
        }
    }

    /// Size of the raw payload in bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_null_sender(&self) -> bool {
        self.sender.is_empty()
    }
}
