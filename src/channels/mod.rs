//! Outbound messaging channels
//!
//! The pipeline speaks to customers through [`ReplyTransport`]; the
//! production implementation picks the platform leg from the integration
//! and owns the session bookkeeping each leg needs.

pub mod instagram;
pub mod telegram;

use async_trait::async_trait;

use crate::db::{Conversation, Integration, IntegrationRepo};
use crate::event::Platform;
use crate::{Error, Result};

pub use instagram::{InstagramRelay, SessionMaterial};
pub use telegram::{TelegramChannel, UpdateDedup, sanitize_responder_html};

/// Platform-specific outbound delivery
#[async_trait]
pub trait ReplyTransport: Send + Sync {
    /// Deliver a reply to the customer
    ///
    /// # Errors
    ///
    /// Returns error if the platform call fails; callers log and keep the
    /// already-persisted state
    async fn send_reply(
        &self,
        integration: &Integration,
        conversation: &Conversation,
        text: &str,
        connection_id: Option<&str>,
    ) -> Result<()>;

    /// Best-effort typing indicator; platforms without one are a no-op
    ///
    /// # Errors
    ///
    /// Returns error if the platform call fails
    async fn send_typing(
        &self,
        _integration: &Integration,
        _conversation: &Conversation,
        _connection_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Production dispatcher covering both platforms
pub struct PlatformDispatcher {
    relay: Option<InstagramRelay>,
    integrations: IntegrationRepo,
}

impl PlatformDispatcher {
    /// Create a dispatcher; `relay` is `None` when Instagram is not
    /// configured
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(relay: Option<InstagramRelay>, integrations: IntegrationRepo) -> Self {
        Self { relay, integrations }
    }

    fn telegram_leg(integration: &Integration) -> Result<TelegramChannel> {
        let token = integration
            .bot_token()
            .ok_or_else(|| Error::Channel("integration has no bot token".into()))?;
        Ok(TelegramChannel::new(token))
    }

    fn parse_chat_id(conversation: &Conversation) -> Result<i64> {
        conversation
            .external_chat_id
            .parse()
            .map_err(|_| Error::Channel(format!("invalid chat id {}", conversation.external_chat_id)))
    }
}

#[async_trait]
impl ReplyTransport for PlatformDispatcher {
    async fn send_reply(
        &self,
        integration: &Integration,
        conversation: &Conversation,
        text: &str,
        connection_id: Option<&str>,
    ) -> Result<()> {
        match integration.platform {
            Platform::TelegramBusiness => {
                let channel = Self::telegram_leg(integration)?;
                let chat_id = Self::parse_chat_id(conversation)?;
                let connection = connection_id.or_else(|| integration.business_connection_id());
                channel.send_message(chat_id, text, connection).await
            }
            Platform::Instagram => {
                let relay = self
                    .relay
                    .as_ref()
                    .ok_or_else(|| Error::Relay("instagram relay not configured".into()))?;
                let session = SessionMaterial::from_integration(integration)
                    .ok_or_else(|| Error::Relay("integration has no session material".into()))?;

                let refreshed = relay
                    .send_text(&session, &conversation.external_chat_id, text)
                    .await?;

                // The relay rotates session state occasionally; keep it
                if let Some(session_data) = refreshed {
                    self.integrations
                        .update_session_data(&integration.id, &session_data)?;
                }

                Ok(())
            }
        }
    }

    async fn send_typing(
        &self,
        integration: &Integration,
        conversation: &Conversation,
        connection_id: Option<&str>,
    ) -> Result<()> {
        match integration.platform {
            Platform::TelegramBusiness => {
                let channel = Self::telegram_leg(integration)?;
                let chat_id = Self::parse_chat_id(conversation)?;
                let connection = connection_id.or_else(|| integration.business_connection_id());
                channel.send_chat_action(chat_id, connection).await
            }
            Platform::Instagram => Ok(()),
        }
    }
}
