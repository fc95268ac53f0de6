//! Inbound message pipeline
//!
//! One entry point, [`Pipeline::ingest`], shared by both channel adapters.
//! Order matters and is part of the contract:
//!
//! 1. resolve the conversation (atomic find-or-create)
//! 2. dedup guard (before any side effect)
//! 3. lead-profile extraction and merge
//! 4. deterministic phone rule (wins over any AI directive)
//! 5. append the customer message
//! 6. responder orchestration, unless the status suppresses it
//! 7. outbound dispatch (failures logged, state kept)
//! 8. waiting-call channel reconciliation
//!
//! Every function takes the integration and conversation it operates on as
//! arguments; nothing reads ambient state.

use std::sync::Arc;

use crate::channels::{ReplyTransport, sanitize_responder_html};
use crate::db::{Conversation, ConversationRepo, Integration, MessageRepo, MessageSender};
use crate::directive;
use crate::event::InboundEvent;
use crate::lead;
use crate::responder::{FALLBACK_REPLY, Responder, ResponderMessage, ResponderRequest, ResponderRole};
use crate::status::ConversationStatus;
use crate::sync::WaitingCallSync;
use crate::Result;

/// System prompt used when an integration has none configured
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Audit placeholder stored when the responder produced a directive only
const STATUS_UPDATE_PLACEHOLDER: &str = "(Status Update Only)";

/// Default bounded context window handed to the responder
pub const DEFAULT_CONTEXT_MESSAGES: usize = 10;

/// Outcome of ingesting one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingestion {
    /// The event was new and fully processed
    Processed {
        conversation_id: String,
        /// Whether a visible assistant reply was produced and dispatched
        replied: bool,
    },
    /// The provider message id was already processed; nothing happened
    Duplicate,
}

/// The inbound message pipeline
pub struct Pipeline {
    conversations: ConversationRepo,
    messages: MessageRepo,
    responder: Arc<dyn Responder>,
    transport: Arc<dyn ReplyTransport>,
    sync: WaitingCallSync,
    context_messages: usize,
}

impl Pipeline {
    /// Assemble the pipeline
    #[must_use]
    pub fn new(
        conversations: ConversationRepo,
        messages: MessageRepo,
        responder: Arc<dyn Responder>,
        transport: Arc<dyn ReplyTransport>,
        sync: WaitingCallSync,
        context_messages: usize,
    ) -> Self {
        Self {
            conversations,
            messages,
            responder,
            transport,
            sync,
            context_messages,
        }
    }

    /// Ingest one canonical inbound event
    ///
    /// # Errors
    ///
    /// Returns error only on store failures - the event then failed closed
    /// and nothing was persisted for it. Responder, send, and sync failures
    /// are recovered here and never propagate.
    pub async fn ingest(&self, integration: &Integration, event: &InboundEvent) -> Result<Ingestion> {
        let conversation = self.conversations.find_or_create(
            &integration.id,
            &event.external_chat_id,
            &event.sender_name,
        )?;

        // Dedup guard: compare against the newest stored customer message
        // before any side effect happens.
        if let Some(last_id) = self.messages.last_customer_provider_id(&conversation.id)? {
            if last_id == event.provider_message_id {
                tracing::debug!(
                    conversation_id = %conversation.id,
                    provider_message_id = %event.provider_message_id,
                    "duplicate inbound message, short-circuiting"
                );
                return Ok(Ingestion::Duplicate);
            }
        }

        self.merge_lead_profile(&conversation, event)?;

        let mut status = conversation.status;

        // Deterministic rule: a phone number always forces waiting_call,
        // before the responder gets a say.
        if lead::find_phone(&event.text).is_some() && status != ConversationStatus::WaitingCall {
            tracing::info!(
                conversation_id = %conversation.id,
                from = %status,
                "phone number detected, forcing status to waiting_call"
            );
            self.conversations
                .update_status(&conversation.id, ConversationStatus::WaitingCall)?;
            status = ConversationStatus::WaitingCall;
        }

        match self.messages.append(
            &conversation.id,
            MessageSender::Customer,
            &event.text,
            Some(&event.provider_message_id),
            &event_metadata(event),
        ) {
            Ok(_) => {}
            // Unique-index backstop: a concurrent delivery won the race
            Err(ref e) if crate::db::message::is_unique_violation(e) => {
                tracing::debug!(
                    conversation_id = %conversation.id,
                    provider_message_id = %event.provider_message_id,
                    "provider message id already stored, short-circuiting"
                );
                return Ok(Ingestion::Duplicate);
            }
            Err(e) => return Err(e),
        }

        let mut replied = false;
        if !integration.ai_enabled {
            tracing::debug!(integration_id = %integration.id, "AI disabled, skipping reply");
        } else if status.suppresses_responder() {
            tracing::debug!(
                conversation_id = %conversation.id,
                status = %status,
                "status suppresses the responder, message stored only"
            );
        } else {
            replied = self
                .respond(integration, &conversation, event.connection_id.as_deref())
                .await?;
        }

        // Read-repair of the side channel, after anything that could have
        // changed status or profile.
        if let Err(e) = self.sync.reconcile(&conversation.id).await {
            tracing::warn!(conversation_id = %conversation.id, error = %e, "waiting-call sync failed");
        }

        Ok(Ingestion::Processed {
            conversation_id: conversation.id,
            replied,
        })
    }

    /// Extract a profile patch from the message and persist the merge
    fn merge_lead_profile(&self, conversation: &Conversation, event: &InboundEvent) -> Result<()> {
        let mut patch = lead::extract(&event.text);
        if let Some(username) = &event.sender_username {
            patch.username = Some(lead::normalize_username(username));
        }
        if patch.is_empty() {
            return Ok(());
        }

        let mut profile = conversation.lead_profile.clone();
        profile.merge(&patch);
        self.conversations.update_lead_profile(&conversation.id, &profile)
    }

    /// Run the responder orchestration for one turn
    ///
    /// Returns whether a visible reply was dispatched. Responder failures
    /// degrade to [`FALLBACK_REPLY`]; send failures are logged and the
    /// stored history stays authoritative.
    async fn respond(
        &self,
        integration: &Integration,
        conversation: &Conversation,
        connection_id: Option<&str>,
    ) -> Result<bool> {
        if let Err(e) = self
            .transport
            .send_typing(integration, conversation, connection_id)
            .await
        {
            tracing::debug!(error = %e, "typing indicator failed");
        }

        let history = self.build_context(&conversation.id)?;
        let system_prompt = integration
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let raw = match self
            .responder
            .generate(ResponderRequest {
                system_prompt,
                knowledge_base_url: integration.knowledge_base_url.as_deref(),
                history: &history,
            })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %e,
                    "responder failed, falling back"
                );
                FALLBACK_REPLY.to_string()
            }
        };

        let (visible, new_status) = directive::parse_reply(&raw);

        if let Some(new_status) = new_status {
            tracing::info!(
                conversation_id = %conversation.id,
                status = %new_status,
                "responder directed a status change"
            );
            self.conversations.update_status(&conversation.id, new_status)?;
        }

        // Directive-only turns still leave an audit trail
        let stored: &str = if visible.is_empty() {
            STATUS_UPDATE_PLACEHOLDER
        } else {
            &visible
        };
        self.messages.append(
            &conversation.id,
            MessageSender::Assistant,
            stored,
            None,
            &serde_json::json!({}),
        )?;

        if visible.is_empty() {
            return Ok(false);
        }

        let outbound = sanitize_responder_html(&visible);
        if let Err(e) = self
            .transport
            .send_reply(integration, conversation, &outbound, connection_id)
            .await
        {
            tracing::warn!(
                conversation_id = %conversation.id,
                error = %e,
                "outbound send failed, reply kept in history"
            );
        }

        Ok(true)
    }

    /// Bounded context window: newest messages, chronological, mapped to
    /// responder roles
    fn build_context(&self, conversation_id: &str) -> Result<Vec<ResponderMessage>> {
        let history = self.messages.recent(conversation_id, self.context_messages)?;

        Ok(history
            .into_iter()
            .map(|m| ResponderMessage {
                role: match m.sender {
                    MessageSender::Customer => ResponderRole::Customer,
                    MessageSender::Assistant | MessageSender::Operator => ResponderRole::Assistant,
                },
                content: m.content,
            })
            .collect())
    }
}

fn event_metadata(event: &InboundEvent) -> serde_json::Value {
    let mut metadata = serde_json::Map::new();
    if let Some(username) = &event.sender_username {
        metadata.insert("username".into(), serde_json::Value::String(username.clone()));
    }
    if let Some(connection_id) = &event.connection_id {
        metadata.insert(
            "connection_id".into(),
            serde_json::Value::String(connection_id.clone()),
        );
    }
    serde_json::Value::Object(metadata)
}
