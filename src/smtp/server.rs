//! SMTP server implementation

use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::ingest::InboundService;
use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{Field, SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{SmtpSession, TransactionOutcome};

/// Plaintext SMTP listener that hands every completed transaction to the
/// inbound service. Each connection runs on its own task.
#[derive(Clone)]
pub struct SmtpServer {
    /// Server hostname
    hostname: String,
    ingest: InboundService,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(hostname: &str, ingest: InboundService) -> Self {
        Self {
            hostname: hostname.to_owned(),
            ingest,
        }
    }

    /// Bind the listening socket. Failing here is fatal for the caller.
    pub async fn bind(addr: &str) -> Result<TcpListener, SmtpError> {
        Ok(TcpListener::bind(addr).await?)
    }

    /// Bind to `addr` and serve until the task is cancelled
    pub async fn start(&self, addr: &str) -> Result<(), SmtpError> {
        let listener = Self::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an existing listener until the task is cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<(), SmtpError> {
        info!(addr = %listener.local_addr()?, "SMTP server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_client(stream, peer).await {
                            warn!(%peer, error = %e, "error handling client");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "error accepting connection");
                }
            }
        }
    }

    /// Handle a client connection
    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), SmtpError> {
        debug!(%peer, "connection opened");
        let command_handler = SmtpCommandHandler::new(&self.hostname);
        let mut session = SmtpSession::new();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        send_response(&mut writer, &SmtpResponse::greeting(&self.hostname)).await?;

        let mut line_buffer = Vec::new();
        loop {
            let limit = if session.in_data_mode() {
                SmtpLimits::TEXT_LINE_MAX_LENGTH
            } else {
                SmtpLimits::COMMAND_LINE_MAX_LENGTH
            };

            match read_line(&mut reader, &mut line_buffer, limit).await? {
                LineRead::Eof => {
                    if session.in_data_mode() {
                        debug!(%peer, "connection closed during DATA, transaction dropped");
                    }
                    break;
                }
                LineRead::Overlong if session.in_data_mode() => {
                    session.reject_overlong_line();
                    skip_past_newline(&mut reader).await?;
                    continue;
                }
                LineRead::Overlong => {
                    let response = SmtpError::TooLong(Field::CommandLine).to_response();
                    send_response(&mut writer, &response).await?;
                    skip_past_newline(&mut reader).await?;
                    continue;
                }
                LineRead::Line => {}
            }

            if session.in_data_mode() {
                let line = strip_line_ending(&line_buffer);
                if line != b"." {
                    session.push_data_line(line);
                    continue;
                }

                let response = self.finish_transaction(&mut session).await;
                send_response(&mut writer, &response).await?;
                continue;
            }

            // Commands may carry stray bytes; replace invalid UTF-8 rather than fail
            let line = String::from_utf8_lossy(&line_buffer);
            let command = line.trim();
            if command.is_empty() {
                continue;
            }

            match command_handler.process_command(command, &mut session) {
                Ok(response) => {
                    send_response(&mut writer, &response).await?;
                    if response.closes_connection() {
                        break;
                    }
                }
                Err(e) => send_response(&mut writer, &e.to_response()).await?,
            }
        }

        debug!(%peer, "connection closed");
        Ok(())
    }

    /// Run ingestion for the collected payload and pick the final reply.
    /// The session is ready for a new MAIL afterwards, whatever happened.
    async fn finish_transaction(&self, session: &mut SmtpSession) -> SmtpResponse {
        let envelope = match session.finish_data() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "DATA aborted");
                return e.to_response();
            }
        };

        match self.ingest.ingest(envelope).await {
            Ok(message) => {
                session.end_transaction(TransactionOutcome::Completed);
                info!(
                    user = %message.resolved_user_id,
                    subject = %message.subject,
                    "message accepted"
                );
                SmtpResponse::accepted()
            }
            Err(e) => {
                session.end_transaction(TransactionOutcome::Aborted);
                SmtpError::from(e).to_response()
            }
        }
    }
}

enum LineRead {
    Line,
    /// `limit` bytes arrived without a LF; the rest is still unread
    Overlong,
    Eof,
}

/// Read one line into `buf`, holding at most `limit` bytes. A final line
/// cut off by EOF still counts as a line.
async fn read_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', buf)
        .await?;

    Ok(if read == 0 {
        LineRead::Eof
    } else if buf.ends_with(b"\n") || read < limit {
        LineRead::Line
    } else {
        LineRead::Overlong
    })
}

/// Drop input up to and including the next LF, or until EOF
async fn skip_past_newline<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, found) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Send a response to the client
async fn send_response(
    writer: &mut OwnedWriteHalf,
    response: &SmtpResponse,
) -> Result<(), SmtpError> {
    let formatted = response.format();
    if formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH && !response.is_multiline() {
        let truncated = SmtpResponse::new(response.code, "Response too long (truncated)");
        writer.write_all(truncated.format().as_bytes()).await?;
    } else {
        writer.write_all(formatted.as_bytes()).await?;
    }
    writer.flush().await?;
    Ok(())
}
