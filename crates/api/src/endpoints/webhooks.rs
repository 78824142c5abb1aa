//! Provider webhook endpoints.
//!
//! Receipts are acknowledged with 200 once parsed, whatever happened to the
//! individual statuses; providers retry on anything else.

use axum::{
    Form, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use herald_common::{AppError, AppResult};
use herald_core::services::receipts::{TwilioStatusCallback, WhatsAppWebhook};
use serde::Deserialize;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::middleware::AppState;
use crate::signature::{self, SIGNATURE_HEADER};

/// WhatsApp subscription handshake query.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

async fn verify_whatsapp(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> AppResult<String> {
    let Some(expected) = state.whatsapp.verify_token.as_deref() else {
        warn!("WhatsApp verification attempted without a configured verify token");
        return Err(AppError::Unauthorized);
    };

    match (query.mode.as_deref(), query.verify_token, query.challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == expected => {
            info!("WhatsApp webhook subscription verified");
            Ok(challenge)
        }
        _ => {
            warn!("WhatsApp webhook verification failed");
            Err(AppError::Unauthorized)
        }
    }
}

async fn receive_whatsapp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    if let Some(secret) = state.whatsapp.app_secret.as_deref() {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !signature::verify(secret, &body, provided) {
            warn!("Rejected WhatsApp webhook with bad signature");
            return Err(AppError::Unauthorized);
        }
    }

    let payload: WhatsAppWebhook = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {e}")))?;
    let events = payload.status_events();
    let applied = state.ingestion.ingest_all(&events).await;

    debug!(received = events.len(), applied, "WhatsApp receipts processed");
    Ok(StatusCode::OK)
}

async fn receive_twilio(
    State(state): State<AppState>,
    Form(callback): Form<TwilioStatusCallback>,
) -> AppResult<StatusCode> {
    callback.validate()?;

    match callback.status_event() {
        Some(event) => {
            let applied = state.ingestion.ingest_all(std::slice::from_ref(&event)).await;
            debug!(
                provider_message_id = %event.provider_message_id,
                applied,
                "Twilio receipt processed"
            );
        }
        None => debug!(
            message_sid = %callback.message_sid,
            status = %callback.message_status,
            "Ignoring transient Twilio status"
        ),
    }
    Ok(StatusCode::OK)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/whatsapp", get(verify_whatsapp).post(receive_whatsapp))
        .route("/twilio", post(receive_twilio))
}
