use std::future::IntoFuture;

use anyhow::{Context, Result};
use clap::Parser;
use tagmail::http::{self, AppState};
use tagmail::{Config, InboundService, OutboundRelay, SmtpServer, store};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tagmail=debug")),
        )
        .init();

    let config = Config::parse();
    info!(hostname = %config.hostname, database = %config.database_url, "starting tagmail");

    let store = store::open(&config.database_url)
        .await
        .with_context(|| format!("opening store {}", config.database_url))?;

    let smtp_addr = config.smtp_listen();
    let smtp_listener = SmtpServer::bind(&smtp_addr)
        .await
        .with_context(|| format!("binding SMTP listener on {smtp_addr}"))?;
    let http_listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding HTTP listener on {}", config.http_addr))?;

    let relay = OutboundRelay::from_config(config.outbound.clone(), store.clone(), &config.hostname)
        .context("configuring outbound transport")?;

    let smtp = SmtpServer::new(&config.hostname, InboundService::new(store.clone()));
    let app = http::router(AppState {
        relay,
        store,
        domain: config.hostname.clone(),
    });

    info!(addr = %config.http_addr, "HTTP API listening");
    tokio::select! {
        result = smtp.serve(smtp_listener) => {
            if let Err(e) = result {
                error!(error = %e, "SMTP server stopped");
            }
        }
        result = axum::serve(http_listener, app).into_future() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
