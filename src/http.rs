//! JSON API used by the web client

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::message::ReceivedMessageRecord;
use crate::relay::{OutboundRelay, RelayError, SendRequest};
use crate::resolver::inbound_address;
use crate::store::{MailStore, StoreError};
use crate::transport::{Attachment, AttachmentSource};

/// Header carrying the id of the already authenticated user
pub const USER_ID_HEADER: &str = "x-user-id";

/// Upload limit for a send request, attachments included
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

const SCHEDULE_MINUTES_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Clone)]
pub struct AppState {
    pub relay: OutboundRelay,
    pub store: Arc<dyn MailStore>,
    /// Domain of the inbound `user-<id>@` addresses
    pub domain: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/emails/send", post(send_email))
        .route("/api/email-settings", get(email_settings).post(update_email_settings))
        .route("/api/sent-messages", get(sent_messages))
        .route("/api/received-messages", get(received_messages))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing X-User-Id header")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Relay(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = Json(json!({ "success": false, "message": self.to_string() }));
        (status, body).into_response()
    }
}

/// The caller's user id, taken from [`USER_ID_HEADER`]
pub struct UserId(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_owned()))
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Serialize)]
struct SendResponse {
    success: bool,
    message: String,
}

/// The subject is a single header line; a break would also end it early in
/// the sent record
fn fold_line_breaks(raw: &str) -> String {
    raw.split(['\r', '\n'])
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn send_email(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    mut multipart: Multipart,
) -> Result<Json<SendResponse>, ApiError> {
    let mut to = None;
    let mut subject = String::new();
    let mut body = String::new();
    let mut scheduled_at = None;
    let mut attachments = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "to" => to = Some(field.text().await?),
            "subject" => subject = fold_line_breaks(&field.text().await?),
            "message" => body = field.text().await?,
            "scheduledAt" => scheduled_at = parse_schedule(&field.text().await?)?,
            "attachments" => {
                let filename = field.file_name().unwrap_or_default().to_owned();
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await?;
                if filename.is_empty() && bytes.is_empty() {
                    continue; // empty file input
                }
                attachments.push(Attachment {
                    filename: if filename.is_empty() {
                        "attachment".to_owned()
                    } else {
                        filename
                    },
                    source: AttachmentSource::Inline(bytes.to_vec()),
                    content_type,
                });
            }
            _ => {}
        }
    }

    let to = to
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing recipient".to_owned()))?;

    let request = SendRequest {
        user_id,
        to,
        subject,
        body,
        attachments,
    };

    if let Some(at) = scheduled_at.filter(|at| *at > Utc::now()) {
        schedule_send(state.relay, request, at);
        return Ok(Json(SendResponse {
            success: true,
            message: format!("Email scheduled for {}", at.to_rfc3339()),
        }));
    }

    state.relay.send_mail(request).await?;
    Ok(Json(SendResponse {
        success: true,
        message: "Email sent successfully".to_owned(),
    }))
}

/// Accepts RFC 3339, or minute precision without an offset, read as UTC
fn parse_schedule(value: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(value, SCHEDULE_MINUTES_FORMAT)
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| ApiError::BadRequest(format!("invalid scheduledAt {value:?}")))
}

/// Deferred sends live only in this process; a restart drops them
fn schedule_send(relay: OutboundRelay, request: SendRequest, at: DateTime<Utc>) {
    let delay = (at - Utc::now()).to_std().unwrap_or_default();
    info!(user = %request.user_id, to = %request.to, at = %at, "send scheduled");

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let user = request.user_id.clone();
        match relay.send_mail(request).await {
            Ok(_) => info!(user = %user, "scheduled send delivered"),
            Err(err) => error!(user = %user, error = %err, "scheduled send failed"),
        }
    });
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailSettings {
    email_prefix: String,
    inbound_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailSettingsUpdate {
    email_prefix: String,
}

async fn email_settings(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<EmailSettings>, ApiError> {
    let email_prefix = state.store.email_prefix(&user_id).await?.unwrap_or_default();
    Ok(Json(EmailSettings {
        email_prefix,
        inbound_address: inbound_address(&user_id, &state.domain),
    }))
}

async fn update_email_settings(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(update): Json<EmailSettingsUpdate>,
) -> Result<Json<EmailSettings>, ApiError> {
    let prefix = update.email_prefix.trim();
    if prefix.is_empty() {
        return Err(ApiError::BadRequest("emailPrefix must not be blank".to_owned()));
    }

    state.store.set_email_prefix(&user_id, prefix).await?;
    Ok(Json(EmailSettings {
        email_prefix: prefix.to_owned(),
        inbound_address: inbound_address(&user_id, &state.domain),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SentMessageView {
    id: String,
    user_id: String,
    to: String,
    subject: String,
    body: String,
    timestamp: DateTime<Utc>,
    status: &'static str,
    attachments: Vec<String>,
}

async fn sent_messages(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<SentMessageView>>, ApiError> {
    let records = state.store.list_sent(&user_id).await?;
    let views = records
        .into_iter()
        .map(|record| {
            let parts = record.parts();
            SentMessageView {
                id: record.id,
                user_id: record.user_id,
                to: record.recipient,
                subject: parts.subject,
                body: parts.body,
                timestamp: record.created_at,
                status: "sent",
                attachments: parts.attachments,
            }
        })
        .collect();
    Ok(Json(views))
}

async fn received_messages(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<ReceivedMessageRecord>>, ApiError> {
    Ok(Json(state.store.list_inbound(&user_id).await?))
}
