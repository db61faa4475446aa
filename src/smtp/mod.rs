//! Inbound SMTP listener

pub mod commands;
pub mod envelope;
pub mod error;
pub mod response;
pub mod server;
pub mod session;

pub use commands::Command;
pub use envelope::Envelope;
pub use error::{Field, SmtpError, SmtpLimits};
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{SmtpSession, SmtpState, TransactionOutcome};
