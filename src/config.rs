//! Startup configuration, read once from flags and the environment

use clap::{Args, Parser};

/// Port that switches the outbound transport to implicit TLS
pub const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Interface the inbound SMTP listener binds to
    #[clap(long, env = "SMTP_LISTEN_ADDR", default_value = "0.0.0.0")]
    pub smtp_listen_addr: String,

    /// Port of the inbound SMTP listener
    #[clap(long, env = "SMTP_LISTEN_PORT", default_value_t = 1025)]
    pub smtp_listen_port: u16,

    /// Address of the HTTP API
    #[clap(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// Name announced in the SMTP greeting; also the domain of inbound addresses
    #[clap(long, env = "MAIL_HOSTNAME", default_value = "mail.local")]
    pub hostname: String,

    /// SQLite URL, or `memory` for a store that lives only as long as the process
    #[clap(long, env = "DATABASE_URL", default_value = "sqlite://tagmail.db")]
    pub database_url: String,

    #[clap(flatten)]
    pub outbound: OutboundConfig,
}

impl Config {
    pub fn smtp_listen(&self) -> String {
        format!("{}:{}", self.smtp_listen_addr, self.smtp_listen_port)
    }
}

/// Upstream relay used for outgoing mail
#[derive(Args, Debug, Clone, Default)]
pub struct OutboundConfig {
    #[clap(long = "smtp-host", env = "SMTP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[clap(long = "smtp-port", env = "SMTP_PORT", default_value_t = 1025)]
    pub port: u16,

    #[clap(long = "smtp-user", env = "SMTP_USER")]
    pub username: Option<String>,

    #[clap(long = "smtp-pass", env = "SMTP_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Sender used when the user has no address of their own
    #[clap(long = "smtp-from", env = "SMTP_FROM")]
    pub default_from: Option<String>,
}

impl OutboundConfig {
    pub fn implicit_tls(&self) -> bool {
        self.port == IMPLICIT_TLS_PORT
    }

    /// Username and password, only when both are present and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    /// Last-resort sender address
    pub fn fallback_sender(&self) -> String {
        match self.default_from.as_deref().map(str::trim) {
            Some(from) if !from.is_empty() => from.to_owned(),
            _ => format!("no-reply@{}", self.host),
        }
    }
}
