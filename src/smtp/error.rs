//! Listener errors and the replies they turn into

use std::fmt;

use thiserror::Error;

use crate::parser::ParseError;
use crate::smtp::response::SmtpResponse;

/// Everything that can go wrong while serving a peer. `Display` is the text
/// sent after the reply code, except for I/O failures which only reach the
/// log.
#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error, command unrecognized")]
    InvalidCommand,

    #[error("{0} not available on this server")]
    CommandDisabled(&'static str),

    #[error("Bad sequence of commands: {0}")]
    InvalidState(String),

    #[error("Syntax error: {0}")]
    InvalidSyntax(String),

    #[error("{0} too long (max {max} characters)", max = .0.max_length())]
    TooLong(Field),

    #[error("Too many recipients (max {max})", max = SmtpLimits::MAX_RECIPIENTS)]
    TooManyRecipients,

    #[error("Too much mail data (max {max} bytes)", max = SmtpLimits::MAX_DATA_SIZE)]
    TooMuchData,

    #[error("Transaction failed: {0}")]
    MalformedMessage(#[from] ParseError),
}

/// Length-limited pieces of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    LocalPart,
    Domain,
    Path,
    CommandLine,
    TextLine,
}

impl Field {
    pub fn max_length(self) -> usize {
        match self {
            Field::LocalPart => SmtpLimits::USER_MAX_LENGTH,
            Field::Domain => SmtpLimits::DOMAIN_MAX_LENGTH,
            Field::Path => SmtpLimits::PATH_MAX_LENGTH,
            Field::CommandLine => SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            Field::TextLine => SmtpLimits::TEXT_LINE_MAX_LENGTH,
        }
    }

    /// `len` counts CRLF for the two line kinds
    pub fn check(self, len: usize) -> Result<(), SmtpError> {
        if len > self.max_length() {
            Err(SmtpError::TooLong(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::LocalPart => "User name",
            Field::Domain => "Domain name",
            Field::Path => "Path",
            Field::CommandLine => "Command line",
            Field::TextLine => "Line",
        })
    }
}

/// Size limits from RFC 5321 section 4.5.3.1
pub struct SmtpLimits;

impl SmtpLimits {
    pub const USER_MAX_LENGTH: usize = 64;
    pub const DOMAIN_MAX_LENGTH: usize = 255;
    /// Reverse-path or forward-path, brackets excluded
    pub const PATH_MAX_LENGTH: usize = 256;
    /// Includes CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;
    /// Includes CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;
    /// Includes CRLF
    pub const TEXT_LINE_MAX_LENGTH: usize = 1000;
    pub const MAX_RECIPIENTS: usize = 100;
    /// DATA is buffered whole before parsing
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024;
}

impl SmtpError {
    pub fn reply_code(&self) -> u16 {
        match self {
            SmtpError::Io(_) => 421,
            SmtpError::InvalidCommand => 500,
            SmtpError::TooLong(Field::CommandLine | Field::TextLine) => 500,
            SmtpError::InvalidSyntax(_) | SmtpError::TooLong(_) => 501,
            SmtpError::CommandDisabled(_) => 502,
            SmtpError::InvalidState(_) => 503,
            SmtpError::TooManyRecipients => 452,
            SmtpError::TooMuchData => 552,
            SmtpError::MalformedMessage(_) => 554,
        }
    }

    pub fn to_response(&self) -> SmtpResponse {
        let text = match self {
            SmtpError::Io(_) => "Service not available".to_owned(),
            other => other.to_string(),
        };
        SmtpResponse::error(self.reply_code(), text)
    }
}
