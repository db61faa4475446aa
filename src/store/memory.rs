//! In-process store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{MailStore, StoreError};
use crate::message::{InboundMessage, OutboundMessage, ReceivedMessageRecord, SentMessageRecord};

/// Keeps every record in memory; contents are lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    inbound: RwLock<Vec<ReceivedMessageRecord>>,
    sent: RwLock<Vec<SentMessageRecord>>,
    prefixes: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn append_inbound(
        &self,
        message: &InboundMessage,
    ) -> Result<ReceivedMessageRecord, StoreError> {
        let record = ReceivedMessageRecord {
            id: Uuid::new_v4().to_string(),
            message: message.clone(),
        };
        self.inbound.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_inbound(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReceivedMessageRecord>, StoreError> {
        let inbound = self.inbound.read().await;
        Ok(inbound
            .iter()
            .rev()
            .filter(|r| r.message.resolved_user_id == user_id)
            .cloned()
            .collect())
    }

    async fn append_sent(
        &self,
        message: &OutboundMessage,
    ) -> Result<SentMessageRecord, StoreError> {
        let record = SentMessageRecord {
            id: Uuid::new_v4().to_string(),
            user_id: message.user_id.clone(),
            recipient: message.recipient.clone(),
            message: message.record_text(),
            created_at: Utc::now(),
        };
        self.sent.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_sent(&self, user_id: &str) -> Result<Vec<SentMessageRecord>, StoreError> {
        let sent = self.sent.read().await;
        Ok(sent
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn email_prefix(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.prefixes.read().await.get(user_id).cloned())
    }

    async fn set_email_prefix(&self, user_id: &str, prefix: &str) -> Result<(), StoreError> {
        self.prefixes
            .write()
            .await
            .insert(user_id.to_owned(), prefix.to_owned());
        Ok(())
    }
}
