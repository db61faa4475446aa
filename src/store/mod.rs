//! Append-only persistence for received and sent mail

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{InboundMessage, OutboundMessage, ReceivedMessageRecord, SentMessageRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Shared storage for every inbound session and outbound send.
///
/// Messages are only ever appended; the per-user email prefix is the one
/// mutable setting and is written as an upsert.
#[async_trait]
pub trait MailStore: Send + Sync {
    async fn append_inbound(
        &self,
        message: &InboundMessage,
    ) -> Result<ReceivedMessageRecord, StoreError>;

    /// Received messages tagged to `user_id`, newest first
    async fn list_inbound(&self, user_id: &str)
    -> Result<Vec<ReceivedMessageRecord>, StoreError>;

    async fn append_sent(&self, message: &OutboundMessage)
    -> Result<SentMessageRecord, StoreError>;

    /// Sent messages of `user_id`, newest first
    async fn list_sent(&self, user_id: &str) -> Result<Vec<SentMessageRecord>, StoreError>;

    async fn email_prefix(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    async fn set_email_prefix(&self, user_id: &str, prefix: &str) -> Result<(), StoreError>;
}

/// Open the store named by a database URL. `memory` keeps everything in
/// process; anything else is handed to SQLite.
pub async fn open(database_url: &str) -> Result<Arc<dyn MailStore>, StoreError> {
    if database_url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(SqliteStore::connect(database_url).await?))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory() {
        let store = open("memory").await.unwrap();
        assert!(store.list_sent("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_sqlite_memory() {
        let store = open("sqlite::memory:").await.unwrap();
        store.set_email_prefix("1", "alice").await.unwrap();
        assert_eq!(
            store.email_prefix("1").await.unwrap().as_deref(),
            Some("alice")
        );
    }
}
