//! Telegram webhook adapter
//!
//! One provider update per call. The handler always acknowledges with
//! success - a non-200 would put Telegram into a retry storm - so every
//! internal failure is logged and swallowed here. Idempotency, not retrying,
//! is the defense: update ids are deduped in memory and the pipeline's
//! provider-id guard catches redeliveries that survive a restart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use super::ApiState;
use crate::channels::telegram::types::{TelegramMessage, TelegramUpdate};
use crate::event::{InboundEvent, Platform};

/// Webhook acknowledgement body
#[derive(Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
}

/// Build the webhooks router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/telegram/{integration_id}",
            post(handle_telegram_update).get(endpoint_status),
        )
        .with_state(state)
}

/// Provider-facing liveness answer for the webhook URL
async fn endpoint_status() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "Webhook endpoint is active"}))
}

/// Handle one Telegram update for an integration
async fn handle_telegram_update(
    State(state): State<Arc<ApiState>>,
    Path(integration_id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<WebhookResponse>) {
    // Decode manually so malformed payloads are logged and acked instead of
    // bouncing with a 4xx the provider would retry.
    let update: TelegramUpdate = match serde_json::from_value(payload) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(%integration_id, error = %e, "malformed Telegram update, ignoring");
            return ack();
        }
    };

    tracing::debug!(%integration_id, update_id = update.update_id, "received Telegram update");

    // In-memory retry tolerance: the same update id is processed once
    {
        let key = format!("update:{integration_id}:{}", update.update_id);
        let mut dedup = state
            .telegram_dedup
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if dedup.seen(&key) {
            tracing::debug!(update_id = update.update_id, "duplicate Telegram update, skipping");
            return ack();
        }
    }

    let integration = match state
        .integrations
        .get_active(&integration_id, Platform::TelegramBusiness)
    {
        Ok(Some(integration)) => integration,
        Ok(None) => {
            tracing::warn!(%integration_id, "update for unknown or inactive integration, ignoring");
            return ack();
        }
        Err(e) => {
            tracing::error!(%integration_id, error = %e, "integration lookup failed");
            return ack();
        }
    };

    // Connection lifecycle event: persist the id for future business sends
    if let Some(connection) = update.business_connection {
        tracing::info!(
            %integration_id,
            connection_id = %connection.id,
            enabled = connection.is_enabled,
            "business connection update"
        );
        if let Err(e) = state
            .integrations
            .set_business_connection(&integration.id, &connection.id)
        {
            tracing::error!(%integration_id, error = %e, "failed to persist business connection");
        }
        return ack();
    }

    // Business messages take priority; edited variants are not re-ingested
    let Some(message) = update.business_message.or(update.message) else {
        tracing::debug!(%integration_id, "update carries no ingestible message");
        return ack();
    };

    let Some(event) = message_to_event(&message) else {
        return ack();
    };

    // Return 200 immediately; Telegram wants fast webhook responses
    tokio::spawn(async move {
        match state.pipeline.ingest(&integration, &event).await {
            Ok(outcome) => {
                tracing::debug!(integration_id = %integration.id, ?outcome, "Telegram update processed");
            }
            Err(e) => {
                tracing::error!(
                    integration_id = %integration.id,
                    error = %e,
                    "Telegram message processing failed"
                );
            }
        }
    });

    ack()
}

/// Normalize a Telegram message into a canonical event
///
/// Returns `None` for messages the pipeline does not ingest (bot-authored,
/// no text).
fn message_to_event(message: &TelegramMessage) -> Option<InboundEvent> {
    if message.from.as_ref().is_some_and(|u| u.is_bot) {
        return None;
    }

    let text = message.text.as_deref()?.trim();
    if text.is_empty() {
        tracing::debug!(message_id = message.message_id, "ignoring message without text");
        return None;
    }

    let sender_name = message
        .from
        .as_ref()
        .map(|u| u.first_name.clone())
        .or_else(|| message.chat.first_name.clone())
        .unwrap_or_else(|| "Unknown".into());

    Some(InboundEvent {
        platform: Platform::TelegramBusiness,
        external_chat_id: message.chat.id.to_string(),
        provider_message_id: message.message_id.to_string(),
        sender_name,
        sender_username: message.from.as_ref().and_then(|u| u.username.clone()),
        text: text.to_string(),
        connection_id: message.business_connection_id.clone(),
    })
}

const fn ack() -> (StatusCode, Json<WebhookResponse>) {
    (StatusCode::OK, Json(WebhookResponse { ok: true }))
}
