//! Per-connection protocol state

use crate::smtp::envelope::Envelope;
use crate::smtp::error::{Field, SmtpError, SmtpLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Waiting for HELO or EHLO
    Connected,
    /// Greeted, no transaction open
    AwaitingSender,
    /// MAIL accepted; RCPT may follow, DATA once there is a recipient
    AwaitingRecipient,
    ReceivingData,
}

/// How the last DATA phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Payload parsed and handed to ingestion
    Completed,
    /// Limit violation or parse failure; nothing stored
    Aborted,
}

/// One connection's view of the dialogue. Every transition checks the
/// current state and answers with [`SmtpError::InvalidState`] when the peer
/// is out of sequence.
#[derive(Debug)]
pub struct SmtpSession {
    pub state: SmtpState,
    pub client_domain: Option<String>,
    pub last_outcome: Option<TransactionOutcome>,
    /// `Some("")` for the null reverse-path
    sender: Option<String>,
    recipients: Vec<String>,
    payload: Vec<u8>,
    /// First limit broken during DATA, held until the final dot
    overflow: Option<SmtpError>,
}

impl SmtpSession {
    pub fn new() -> Self {
        Self {
            state: SmtpState::Connected,
            client_domain: None,
            last_outcome: None,
            sender: None,
            recipients: Vec::new(),
            payload: Vec::new(),
            overflow: None,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn in_data_mode(&self) -> bool {
        self.state == SmtpState::ReceivingData
    }

    /// HELO/EHLO, allowed at any point outside DATA; drops an open transaction
    pub fn greet(&mut self, domain: String) -> Result<(), SmtpError> {
        Field::Domain.check(domain.len())?;
        self.client_domain = Some(domain);
        self.clear_transaction();
        Ok(())
    }

    /// RSET
    pub fn rset(&mut self) -> Result<(), SmtpError> {
        if self.state == SmtpState::Connected {
            return Err(SmtpError::InvalidState("send HELO or EHLO first".into()));
        }
        self.clear_transaction();
        Ok(())
    }

    pub fn begin_transaction(&mut self, sender: String) -> Result<(), SmtpError> {
        match self.state {
            SmtpState::AwaitingSender => {}
            SmtpState::Connected => {
                return Err(SmtpError::InvalidState("send HELO or EHLO first".into()));
            }
            _ => return Err(SmtpError::InvalidState("transaction already open".into())),
        }
        Field::Path.check(sender.len())?;

        self.sender = Some(sender);
        self.state = SmtpState::AwaitingRecipient;
        Ok(())
    }

    pub fn add_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        if self.state != SmtpState::AwaitingRecipient {
            return Err(SmtpError::InvalidState("RCPT needs MAIL first".into()));
        }
        Field::Path.check(recipient.len())?;
        if self.recipients.len() >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients);
        }

        self.recipients.push(recipient);
        Ok(())
    }

    pub fn start_data(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::AwaitingRecipient || self.recipients.is_empty() {
            return Err(SmtpError::InvalidState("DATA needs at least one RCPT".into()));
        }

        self.payload.clear();
        self.overflow = None;
        self.state = SmtpState::ReceivingData;
        Ok(())
    }

    /// Take one payload line, line ending already stripped.
    ///
    /// Dot-unstuffing happens here (RFC 5321 section 4.5.2). After the first
    /// limit violation the payload is dropped and further lines are ignored
    /// so the peer is only answered once it sends the final dot.
    pub fn push_data_line(&mut self, line: &[u8]) {
        if self.overflow.is_some() {
            return;
        }

        let line = line.strip_prefix(b".").unwrap_or(line);
        let with_crlf = line.len() + 2;

        let violation = if let Err(err) = Field::TextLine.check(with_crlf) {
            Some(err)
        } else if self.payload.len() + with_crlf > SmtpLimits::MAX_DATA_SIZE {
            Some(SmtpError::TooMuchData)
        } else {
            None
        };

        match violation {
            Some(err) => {
                self.payload = Vec::new();
                self.overflow = Some(err);
            }
            None => {
                self.payload.extend_from_slice(line);
                self.payload.extend_from_slice(b"\r\n");
            }
        }
    }

    /// A payload line ran past the line limit before its LF arrived
    pub fn reject_overlong_line(&mut self) {
        if self.overflow.is_none() {
            self.payload = Vec::new();
            self.overflow = Some(SmtpError::TooLong(Field::TextLine));
        }
    }

    /// Close DATA after the lone dot. A held limit violation aborts the
    /// transaction; otherwise the envelope is handed out and the session is
    /// ready for the next MAIL.
    pub fn finish_data(&mut self) -> Result<Envelope, SmtpError> {
        if !self.in_data_mode() {
            return Err(SmtpError::InvalidState("not receiving data".into()));
        }

        if let Some(err) = self.overflow.take() {
            self.end_transaction(TransactionOutcome::Aborted);
            return Err(err);
        }

        let envelope = Envelope::new(
            self.sender.take().unwrap_or_default(),
            std::mem::take(&mut self.recipients),
            std::mem::take(&mut self.payload),
        );
        self.clear_transaction();
        Ok(envelope)
    }

    pub fn end_transaction(&mut self, outcome: TransactionOutcome) {
        self.last_outcome = Some(outcome);
        self.clear_transaction();
    }

    fn clear_transaction(&mut self) {
        self.state = SmtpState::AwaitingSender;
        self.sender = None;
        self.recipients.clear();
        self.payload.clear();
        self.overflow = None;
    }
}

impl Default for SmtpSession {
    fn default() -> Self {
        Self::new()
    }
}
