//! SQLite-backed store

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{MailStore, StoreError};
use crate::message::{InboundMessage, OutboundMessage, ReceivedMessageRecord, SentMessageRecord};

const SCHEMA: [&str; 5] = [
    r#"CREATE TABLE IF NOT EXISTS sent_messages (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        recipient TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS sent_messages_user ON sent_messages(user_id, created_at)"#,
    r#"CREATE TABLE IF NOT EXISTS received_messages (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        received_at TEXT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS received_messages_user ON received_messages(user_id, received_at)"#,
    r#"CREATE TABLE IF NOT EXISTS email_settings (
        user_id TEXT PRIMARY KEY,
        email_prefix TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema if it is missing
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if database_url.contains(":memory:") {
            // Every connection to an in-memory database sees its own empty copy
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!(url = %database_url, "sqlite store ready");

        Ok(Self { pool })
    }
}

/// Fixed-width so that text ordering matches time ordering
fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{column} {raw:?}: {e}")))
}

fn sent_from_row(row: &SqliteRow) -> Result<SentMessageRecord, StoreError> {
    Ok(SentMessageRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        recipient: row.try_get("recipient")?,
        message: row.try_get("message")?,
        created_at: parse_time(row, "created_at")?,
    })
}

fn inbound_from_row(row: &SqliteRow) -> Result<ReceivedMessageRecord, StoreError> {
    Ok(ReceivedMessageRecord {
        id: row.try_get("id")?,
        message: InboundMessage {
            from_address: row.try_get("from_address")?,
            to_address: row.try_get("to_address")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            resolved_user_id: row.try_get("user_id")?,
            received_at: parse_time(row, "received_at")?,
        },
    })
}

#[async_trait]
impl MailStore for SqliteStore {
    async fn append_inbound(
        &self,
        message: &InboundMessage,
    ) -> Result<ReceivedMessageRecord, StoreError> {
        let record = ReceivedMessageRecord {
            id: Uuid::new_v4().to_string(),
            message: message.clone(),
        };

        sqlx::query(
            r#"INSERT INTO received_messages(
                id, user_id, from_address, to_address, subject, body, received_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.id)
        .bind(&message.resolved_user_id)
        .bind(&message.from_address)
        .bind(&message.to_address)
        .bind(&message.subject)
        .bind(&message.body)
        .bind(timestamp(&message.received_at))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_inbound(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReceivedMessageRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM received_messages WHERE user_id = ? ORDER BY received_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(inbound_from_row).collect()
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

        sqlx::query(
            "INSERT INTO sent_messages(id, user_id, recipient, message, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.recipient)
        .bind(&record.message)
        .bind(timestamp(&record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_sent(&self, user_id: &str) -> Result<Vec<SentMessageRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM sent_messages WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sent_from_row).collect()
    }

    async fn email_prefix(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT email_prefix FROM email_settings WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("email_prefix")?),
            None => None,
        })
    }

    async fn set_email_prefix(&self, user_id: &str, prefix: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO email_settings(user_id, email_prefix, updated_at) VALUES (?, ?, ?)
               ON CONFLICT(user_id) DO UPDATE SET
                 email_prefix = excluded.email_prefix,
                 updated_at = excluded.updated_at"#,
        )
        .bind(user_id)
        .bind(prefix)
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn outbound(subject: &str, attachments: &[&str]) -> OutboundMessage {
        OutboundMessage {
            user_id: "1".to_owned(),
            recipient: "a@b.com".to_owned(),
            subject: subject.to_owned(),
            body: "Hello".to_owned(),
            attachment_names: attachments.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sent_round_trip() {
        let store = memory_store().await;
        let stored = store.append_sent(&outbound("Hi", &[])).await.unwrap();
        store
            .append_sent(&outbound("Files", &["a.pdf"]))
            .await
            .unwrap();

        let listed = store.list_sent("1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message, "Subject: Files\n\nHello\n\nAttachments: a.pdf");
        assert_eq!(listed[1].id, stored.id);
        assert_eq!(listed[1].recipient, "a@b.com");
        assert_eq!(listed[1].message, "Subject: Hi\n\nHello");
        assert!(store.list_sent("2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_round_trip() {
        let store = memory_store().await;
        let message = InboundMessage {
            from_address: "alice@example.com".to_owned(),
            to_address: "user-7@mail.local".to_owned(),
            subject: "Test".to_owned(),
            body: "Body text".to_owned(),
            resolved_user_id: "7".to_owned(),
            received_at: Utc::now(),
        };
        let stored = store.append_inbound(&message).await.unwrap();

        let listed = store.list_inbound("7").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
        assert_eq!(listed[0].message.subject, "Test");
        assert_eq!(listed[0].message.body, "Body text");
        assert_eq!(listed[0].message.resolved_user_id, "7");
        assert!(store.list_inbound("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prefix_upsert() {
        let store = memory_store().await;
        assert_eq!(store.email_prefix("1").await.unwrap(), None);
        store.set_email_prefix("1", "alice").await.unwrap();
        store.set_email_prefix("1", "alicia").await.unwrap();
        assert_eq!(
            store.email_prefix("1").await.unwrap().as_deref(),
            Some("alicia")
        );
    }
}
