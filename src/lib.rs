//! # tagmail
//!
//! tagmail is the mail core of a small webmail service.
//!
//! It receives mail on a plaintext SMTP listener, works out which user a
//! message belongs to from the recipient address, and stores it. Users send
//! mail through an upstream relay, and every accepted send is recorded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tagmail::{InboundService, MemoryStore, SmtpServer};
//!
//! # async fn run() -> Result<(), tagmail::SmtpError> {
//! let store = Arc::new(MemoryStore::new());
//! let server = SmtpServer::new("mail.local", InboundService::new(store.clone()));
//!
//! // Mail for user-7@mail.local ends up under user "7"
//! server.start("127.0.0.1:1025").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Addressing
//!
//! The local part `user-<id>` ties a message to user `<id>`. Recipients are
//! checked in RCPT order, then the `To:` header; the first match wins.
//! Mail that matches nothing is kept under the `default` user.
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the sender (`EHLO` advertises `SIZE` and `8BITMIME`)
//! - `MAIL FROM` - Specify the sender's address, `<>` included
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the message
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! `STARTTLS` and `AUTH` are answered with `502`.
//!
//! ## Size Limits
//!
//! The listener enforces RFC 5321 size limits:
//! - User names: 64 characters max
//! - Domain names: 255 characters max
//! - Paths: 256 characters max
//! - Command lines: 512 characters max
//! - Text lines: 1000 characters max
//! - Recipients: 100 max per message
//! - Message data: 10 MiB max
//!
//! A message that is not valid MIME is refused with `554` and nothing is
//! stored.

pub mod config;
pub mod http;
pub mod ingest;
pub mod message;
pub mod parser;
pub mod relay;
pub mod resolver;
pub mod smtp;
pub mod store;
pub mod transport;

pub use config::{Config, OutboundConfig};
pub use ingest::InboundService;
pub use message::{InboundMessage, OutboundMessage, ReceivedMessageRecord, SentMessageRecord};
pub use parser::{ParseError, ParsedMessage, parse_message};
pub use relay::{OutboundRelay, RelayError, SendReceipt, SendRequest};
pub use resolver::{DEFAULT_USER_ID, resolve_user_id};
pub use smtp::{Envelope, SmtpError, SmtpLimits, SmtpResponse, SmtpServer, SmtpSession, SmtpState};
pub use store::{MailStore, MemoryStore, SqliteStore, StoreError};
pub use transport::{MailTransport, OutgoingEmail, SmtpRelayTransport, TransportError};
