//! Command parsing and dispatch

use tracing::{debug, info};

use crate::smtp::error::{Field, SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// A syntactically valid command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// Reverse-path, empty for `<>`
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    /// Recognised but switched off (STARTTLS, AUTH)
    Disabled(&'static str),
}

impl Command {
    /// Parse one line without its CRLF. ESMTP parameters after a path are
    /// accepted and ignored.
    pub fn parse(line: &str) -> Result<Self, SmtpError> {
        Field::CommandLine.check(line.len() + 2)?;

        let (verb, args) = match line.split_once(char::is_whitespace) {
            Some((verb, args)) => (verb, args.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_uppercase().as_str() {
            "HELO" => Command::Helo(domain_arg(args)?),
            "EHLO" => Command::Ehlo(domain_arg(args)?),
            "MAIL" => {
                let sender = parse_path(args, "FROM:")?;
                // The null reverse-path is legal for bounces
                if !sender.is_empty() {
                    check_address(&sender)?;
                }
                Command::Mail(sender)
            }
            "RCPT" => {
                let recipient = parse_path(args, "TO:")?;
                if recipient.is_empty() {
                    return Err(SmtpError::InvalidSyntax("recipient cannot be empty".into()));
                }
                check_address(&recipient)?;
                Command::Rcpt(recipient)
            }
            "DATA" if args.is_empty() => Command::Data,
            "DATA" => return Err(SmtpError::InvalidSyntax("DATA takes no arguments".into())),
            "RSET" => Command::Rset,
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            "STARTTLS" => Command::Disabled("STARTTLS"),
            "AUTH" => Command::Disabled("AUTH"),
            _ => return Err(SmtpError::InvalidCommand),
        };
        Ok(command)
    }
}

/// Applies commands to a session and picks the reply
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    pub fn process_command(
        &self,
        line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let command = Command::parse(line)?;
        self.execute(command, session)
    }

    pub fn execute(
        &self,
        command: Command,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        match command {
            Command::Helo(client) => {
                session.greet(client.clone())?;
                debug!(%client, "HELO");
                Ok(SmtpResponse::helo(self.hostname, &client))
            }
            Command::Ehlo(client) => {
                session.greet(client.clone())?;
                debug!(%client, "EHLO");
                Ok(SmtpResponse::ehlo(
                    self.hostname,
                    &client,
                    SmtpLimits::MAX_DATA_SIZE,
                ))
            }
            Command::Mail(sender) => {
                info!(sender = %sender, "MAIL FROM");
                session.begin_transaction(sender)?;
                Ok(SmtpResponse::ok())
            }
            Command::Rcpt(recipient) => {
                session.add_recipient(recipient)?;
                Ok(SmtpResponse::ok())
            }
            Command::Data => {
                session.start_data()?;
                Ok(SmtpResponse::data_start())
            }
            Command::Rset => {
                session.rset()?;
                Ok(SmtpResponse::ok())
            }
            Command::Noop => Ok(SmtpResponse::ok()),
            Command::Quit => Ok(SmtpResponse::quit()),
            Command::Disabled(name) => Err(SmtpError::CommandDisabled(name)),
        }
    }
}

fn domain_arg(args: &str) -> Result<String, SmtpError> {
    args.split_whitespace()
        .next()
        .map(str::to_owned)
        .ok_or_else(|| SmtpError::InvalidSyntax("greeting requires a domain".into()))
}

/// `local@domain`, both parts present and within limits
fn check_address(addr: &str) -> Result<(), SmtpError> {
    let (local, domain) = addr
        .rsplit_once('@')
        .ok_or_else(|| SmtpError::InvalidSyntax("address must contain @".into()))?;

    Field::LocalPart.check(local.len())?;
    Field::Domain.check(domain.len())?;

    if local.is_empty() || domain.is_empty() {
        return Err(SmtpError::InvalidSyntax("invalid address".into()));
    }
    Ok(())
}

/// Address inside `FROM:<addr> [params]` or `TO:<addr> [params]`
fn parse_path(args: &str, keyword: &str) -> Result<String, SmtpError> {
    let head = args.get(..keyword.len()).unwrap_or_default();
    if !head.eq_ignore_ascii_case(keyword) {
        return Err(SmtpError::InvalidSyntax(format!(
            "expected '{keyword}<address>'"
        )));
    }

    let addr = args[keyword.len()..]
        .trim_start()
        .strip_prefix('<')
        .and_then(|rest| rest.split_once('>'))
        .map(|(addr, _params)| addr.trim())
        .ok_or_else(|| SmtpError::InvalidSyntax("address must be in angle brackets".into()))?;

    Field::Path.check(addr.len())?;
    Ok(addr.to_owned())
}
