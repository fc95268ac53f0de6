//! Instagram poll adapter
//!
//! An external scheduler triggers a sweep over every active Instagram
//! integration. Integrations are polled in parallel and each outcome is
//! captured separately - one account with an expired session must not stop
//! the others from being processed.

use futures::future::join_all;
use serde::Serialize;

use crate::channels::{InstagramRelay, SessionMaterial};
use crate::db::{Integration, IntegrationRepo};
use crate::event::{InboundEvent, Platform};
use crate::pipeline::{Ingestion, Pipeline};
use crate::{Error, Result};

/// Aggregate result of one sweep
#[derive(Debug, Serialize)]
pub struct PollReport {
    pub outcomes: Vec<PollOutcome>,
}

/// Per-integration outcome, error captured instead of propagated
#[derive(Debug, Serialize)]
pub struct PollOutcome {
    pub integration_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub threads: usize,
    pub ingested: usize,
    pub duplicates: usize,
}

#[derive(Debug, Default)]
struct PollSummary {
    threads: usize,
    ingested: usize,
    duplicates: usize,
}

/// Poll every active Instagram integration once
///
/// # Errors
///
/// Returns error only if the integration list cannot be loaded; individual
/// integration failures end up inside their [`PollOutcome`]
pub async fn sweep(
    integrations: &IntegrationRepo,
    relay: Option<&InstagramRelay>,
    pipeline: &Pipeline,
) -> Result<PollReport> {
    let active = integrations.list_active(Platform::Instagram)?;
    tracing::info!(count = active.len(), "starting Instagram sweep");

    let tasks = active.iter().map(|integration| async move {
        match poll_integration(integrations, relay, pipeline, integration).await {
            Ok(summary) => PollOutcome {
                integration_id: integration.id.clone(),
                error: None,
                threads: summary.threads,
                ingested: summary.ingested,
                duplicates: summary.duplicates,
            },
            Err(e) => {
                tracing::error!(
                    integration_id = %integration.id,
                    error = %e,
                    "Instagram integration poll failed"
                );
                PollOutcome {
                    integration_id: integration.id.clone(),
                    error: Some(e.to_string()),
                    threads: 0,
                    ingested: 0,
                    duplicates: 0,
                }
            }
        }
    });

    let outcomes = join_all(tasks).await;
    Ok(PollReport { outcomes })
}

/// Fetch and ingest one integration's inbox
async fn poll_integration(
    integrations: &IntegrationRepo,
    relay: Option<&InstagramRelay>,
    pipeline: &Pipeline,
    integration: &Integration,
) -> Result<PollSummary> {
    let relay = relay.ok_or_else(|| Error::Relay("instagram relay not configured".into()))?;
    let session = SessionMaterial::from_integration(integration)
        .ok_or_else(|| Error::Relay("integration has no session material".into()))?;

    let snapshot = relay.check_inbox(&session).await?;

    if let Some(session_data) = &snapshot.refreshed_session {
        integrations.update_session_data(&integration.id, session_data)?;
    }

    // Without the account's own user id every item would look inbound,
    // including our own replies - skip the account instead of echoing.
    let my_user_id: i64 = snapshot
        .my_user_id
        .as_deref()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::Relay("relay did not report the account's own user id".into()))?;

    let mut summary = PollSummary {
        threads: snapshot.threads.len(),
        ..PollSummary::default()
    };

    for thread in &snapshot.threads {
        // Items arrive most recent first; only the newest one matters
        let Some(item) = thread.items.first() else {
            continue;
        };
        if item.item_type != "text" {
            continue;
        }
        let Some(text) = item.text.as_deref().filter(|t| !t.is_empty()) else {
            continue;
        };
        // Our own replies come back in the inbox snapshot too
        if item.user_id == my_user_id {
            continue;
        }

        let sender = thread.users.iter().find(|u| u.pk == item.user_id);
        let sender_username = sender.and_then(|u| u.username.clone());
        let sender_name = sender_username.clone().unwrap_or_else(|| "Unknown".into());

        let event = InboundEvent {
            platform: Platform::Instagram,
            external_chat_id: thread.thread_id.clone(),
            provider_message_id: item.item_id.clone(),
            sender_name,
            sender_username,
            text: text.to_string(),
            connection_id: None,
        };

        match pipeline.ingest(integration, &event).await? {
            Ingestion::Processed { conversation_id, .. } => {
                tracing::info!(
                    integration_id = %integration.id,
                    conversation_id = %conversation_id,
                    thread_id = %thread.thread_id,
                    "ingested Instagram message"
                );
                summary.ingested += 1;
            }
            Ingestion::Duplicate => summary.duplicates += 1,
        }
    }

    Ok(summary)
}
