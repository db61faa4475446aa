//! Server replies

use std::fmt::Write;

/// One reply to the peer. A reply with several lines goes out as
/// `250-first`, `250-...`, `250 last`.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpResponse {
    pub code: u16,
    /// Never empty
    pub lines: Vec<String>,
}

impl SmtpResponse {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// Single-line reply built from an error code and text
    pub fn error(code: u16, text: impl Into<String>) -> Self {
        Self::new(code, text)
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} ESMTP tagmail ready"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new(250, format!("{hostname} Hello {client_domain}"))
    }

    /// Greeting line followed by the extensions we support. STARTTLS and
    /// AUTH are never offered.
    pub fn ehlo(hostname: &str, client_domain: &str, max_size: usize) -> Self {
        Self {
            code: 250,
            lines: vec![
                format!("{hostname} Hello {client_domain}"),
                "8BITMIME".to_owned(),
                format!("SIZE {max_size}"),
            ],
        }
    }

    pub fn data_start() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    /// Reply to a DATA phase whose message was taken in
    pub fn accepted() -> Self {
        Self::new(250, "OK: message accepted")
    }

    pub fn quit() -> Self {
        Self::new(221, "Bye")
    }

    /// First line of the reply
    pub fn text(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }

    /// Everything after the first line
    pub fn extensions(&self) -> &[String] {
        self.lines.get(1..).unwrap_or_default()
    }

    pub fn is_multiline(&self) -> bool {
        self.lines.len() > 1
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// The peer asked to leave and the connection should close after this
    pub fn closes_connection(&self) -> bool {
        self.code == 221
    }

    /// Wire form, CRLF after every line
    pub fn format(&self) -> String {
        let last = self.lines.len().saturating_sub(1);
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            let _ = write!(out, "{}{sep}{line}\r\n", self.code);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_names_host() {
        let response = SmtpResponse::greeting("mail.local");
        assert_eq!(response.format(), "220 mail.local ESMTP tagmail ready\r\n");
    }

    #[test]
    fn test_ehlo_lists_extensions() {
        let response = SmtpResponse::ehlo("server.local", "client.local", 1000);
        assert!(response.is_multiline());
        assert_eq!(response.text(), "server.local Hello client.local");
        assert_eq!(response.extensions(), ["8BITMIME", "SIZE 1000"]);
        assert_eq!(
            response.format(),
            "250-server.local Hello client.local\r\n250-8BITMIME\r\n250 SIZE 1000\r\n"
        );
    }

    #[test]
    fn test_single_line_format() {
        assert_eq!(SmtpResponse::ok().format(), "250 OK\r\n");
        assert_eq!(
            SmtpResponse::error(554, "Transaction failed").format(),
            "554 Transaction failed\r\n"
        );
        assert!(SmtpResponse::helo("a", "b").extensions().is_empty());
    }

    #[test]
    fn test_reply_classes() {
        assert!(SmtpResponse::accepted().is_success());
        assert!(!SmtpResponse::data_start().is_success());
        assert!(!SmtpResponse::new(421, "Service not available").is_success());
        assert!(SmtpResponse::quit().closes_connection());
        assert!(!SmtpResponse::ok().closes_connection());
    }
}
