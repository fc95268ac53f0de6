//! Waiting-call channel sync
//!
//! Conversations waiting for a human call get exactly one live profile card
//! on a dedicated Telegram channel. The card is reconciled - not notified -
//! after every pipeline event that could have changed status or profile:
//! edit the stored message if a reference exists, otherwise send a fresh one
//! while the conversation is still in `waiting_call`. A card left behind
//! after the status moved on is allowed to go stale but is never recreated.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::channels::TelegramChannel;
use crate::db::{Conversation, ConversationRepo, IntegrationRepo, Message, MessageRepo, MessageSender};
use crate::event::Platform;
use crate::lead;
use crate::status::ConversationStatus;
use crate::{Error, Result};

/// How much history feeds the card
const CARD_MESSAGE_WINDOW: usize = 30;

/// Longest rendered excerpt of the last customer message
const EXCERPT_CHAR_LIMIT: usize = 1200;

/// Reference to a delivered notification message
#[derive(Debug, Clone)]
pub struct SentCard {
    pub chat_id: String,
    pub message_id: i64,
}

/// Delivery seam for the notification channel
///
/// An edit that changes nothing must come back as `Ok` (the provider's
/// "not modified" rejection is a success), so reconciliation can run
/// repeatedly without cascading into duplicate sends.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Edit an existing card in place
    ///
    /// # Errors
    ///
    /// Returns error if the edit fails for any reason other than the text
    /// already matching
    async fn edit_card(&self, chat_id: &str, message_id: i64, text: &str) -> Result<()>;

    /// Send a fresh card
    ///
    /// # Errors
    ///
    /// Returns error if the send fails
    async fn send_card(&self, chat_id: &str, text: &str) -> Result<SentCard>;
}

/// Telegram notifier bot transport
pub struct TelegramNotifier {
    channel: TelegramChannel,
}

impl TelegramNotifier {
    /// Create a transport from the notifier bot token
    #[must_use]
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            channel: TelegramChannel::new(bot_token),
        }
    }

    fn parse_chat_id(chat_id: &str) -> Result<i64> {
        chat_id
            .parse()
            .map_err(|_| Error::Channel(format!("invalid notification chat id {chat_id}")))
    }
}

#[async_trait]
impl NotificationTransport for TelegramNotifier {
    async fn edit_card(&self, chat_id: &str, message_id: i64, text: &str) -> Result<()> {
        let chat_id = Self::parse_chat_id(chat_id)?;
        self.channel.edit_message_text(chat_id, message_id, text).await
    }

    async fn send_card(&self, chat_id: &str, text: &str) -> Result<SentCard> {
        let numeric = Self::parse_chat_id(chat_id)?;
        let (sent_chat, message_id) = self.channel.send_message_returning_id(numeric, text).await?;
        Ok(SentCard {
            chat_id: sent_chat.to_string(),
            message_id,
        })
    }
}

/// Reconciles waiting-call notification cards with conversation state
pub struct WaitingCallSync {
    conversations: ConversationRepo,
    messages: MessageRepo,
    integrations: IntegrationRepo,
    transport: Option<Arc<dyn NotificationTransport>>,
    channel_id: Option<String>,
}

impl WaitingCallSync {
    /// Create the sync step
    ///
    /// `transport`/`channel_id` are `None` when the waiting-call channel is
    /// not configured; reconciliation then degrades to a no-op.
    #[must_use]
    pub fn new(
        conversations: ConversationRepo,
        messages: MessageRepo,
        integrations: IntegrationRepo,
        transport: Option<Arc<dyn NotificationTransport>>,
        channel_id: Option<String>,
    ) -> Self {
        Self {
            conversations,
            messages,
            integrations,
            transport,
            channel_id,
        }
    }

    /// Bring the side channel in line with the conversation's current state
    ///
    /// # Errors
    ///
    /// Returns error on store failures or a failed fresh send; callers log
    /// and tolerate - the next triggering event repairs the card
    pub async fn reconcile(&self, conversation_id: &str) -> Result<()> {
        let Some(transport) = &self.transport else {
            tracing::debug!("waiting-call channel not configured, skipping sync");
            return Ok(());
        };

        let Some(conversation) = self.conversations.get(conversation_id)? else {
            tracing::warn!(conversation_id, "conversation vanished before sync");
            return Ok(());
        };

        let is_waiting = conversation.status == ConversationStatus::WaitingCall;
        let existing_ref = conversation.waiting_call_message_id;

        if !is_waiting && existing_ref.is_none() {
            return Ok(());
        }

        let Some(channel_id) = conversation
            .waiting_call_chat_id
            .clone()
            .or_else(|| self.channel_id.clone())
        else {
            tracing::warn!("waiting-call channel id missing, skipping sync");
            return Ok(());
        };

        let history = self.messages.recent(conversation_id, CARD_MESSAGE_WINDOW)?;
        let platform = self
            .integrations
            .get(&conversation.integration_id)?
            .map(|i| i.platform);
        let text = render_card(&conversation, &history, platform);

        if let Some(message_id) = existing_ref {
            match transport.edit_card(&channel_id, message_id, &text).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        conversation_id,
                        message_id,
                        error = %e,
                        "card edit failed, attempting fresh send"
                    );
                }
            }
        }

        // A fresh card only exists while the conversation still waits
        if !is_waiting {
            return Ok(());
        }

        let sent = transport.send_card(&channel_id, &text).await?;
        self.conversations
            .set_waiting_call_ref(conversation_id, &sent.chat_id, sent.message_id)?;

        tracing::info!(conversation_id, message_id = sent.message_id, "waiting-call card created");
        Ok(())
    }
}

/// Render the fixed-format profile card
#[must_use]
pub fn render_card(
    conversation: &Conversation,
    history: &[Message],
    platform: Option<Platform>,
) -> String {
    let profile = &conversation.lead_profile;

    let phone = profile
        .phone
        .clone()
        .or_else(|| {
            history
                .iter()
                .rev()
                .find_map(|m| lead::find_phone(&m.content).map(String::from))
        })
        .unwrap_or_else(|| "не найден".into());

    let username = profile
        .username
        .clone()
        .or_else(|| {
            history.iter().rev().find_map(|m| {
                if m.sender != MessageSender::Customer {
                    return None;
                }
                m.metadata
                    .get("username")
                    .and_then(|v| v.as_str())
                    .map(lead::normalize_username)
            })
        })
        .unwrap_or_else(|| "не указан".into());

    let last_customer_message = history
        .iter()
        .rev()
        .find(|m| m.sender == MessageSender::Customer)
        .map_or_else(|| "нет сообщений".into(), |m| m.content.clone());
    let excerpt: String = last_customer_message.chars().take(EXCERPT_CHAR_LIMIT).collect();

    let mut lines = vec![
        "📞 <b>Анкета клиента</b>".to_string(),
        String::new(),
        format!(
            "<b>Имя:</b> {}",
            escape_html(conversation.customer_name.as_deref().unwrap_or("Без имени"))
        ),
        format!(
            "<b>Платформа:</b> {}",
            platform.map_or("не определена", Platform::display_name)
        ),
        format!("<b>Внешний ID:</b> <code>{}</code>", escape_html(&conversation.external_chat_id)),
        format!("<b>Username:</b> {}", escape_html(&username)),
        format!("<b>Телефон:</b> <code>{}</code>", escape_html(&phone)),
    ];

    if let Some(client_type) = profile.client_type {
        let label = match client_type {
            lead::ClientType::Individual => "физлицо",
            lead::ClientType::Legal => "юрлицо",
        };
        lines.push(format!("<b>Тип клиента:</b> {label}"));
    }
    if let Some(power) = &profile.power {
        lines.push(format!("<b>Мощность:</b> {}", escape_html(power)));
    }
    if let Some(location) = &profile.location {
        lines.push(format!("<b>Локация:</b> {}", escape_html(location)));
    }
    if let Some(station_type) = &profile.station_type {
        lines.push(format!("<b>Тип станции:</b> {}", escape_html(station_type)));
    }
    if let Some(surface) = profile.installation_surface {
        let label = match surface {
            lead::InstallationSurface::Roof => "крыша",
            lead::InstallationSurface::Ground => "земля",
        };
        lines.push(format!("<b>Поверхность:</b> {label}"));
    }

    lines.push(format!("<b>Статус:</b> {}", conversation.status.card_label()));
    lines.push(format!("<b>Создан:</b> {}", format_timestamp(Some(conversation.created_at))));
    lines.push(format!(
        "<b>Последняя активность:</b> {}",
        format_timestamp(conversation.last_message_at)
    ));
    lines.push(String::new());
    lines.push(format!(
        "<b>Последнее сообщение клиента:</b>\n{}",
        escape_html(&excerpt)
    ));
    lines.push(String::new());
    lines.push(format!("Обновлено: {}", format_timestamp(Some(Utc::now()))));

    lines.join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn format_timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(
        || "не указано".into(),
        |dt| dt.format("%d.%m.%Y %H:%M UTC").to_string(),
    )
}
