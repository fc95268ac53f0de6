//! Telegram Bot API client
//!
//! Replies to customers go out through each integration's own bot (with the
//! business-connection id when the chat runs over a business account); the
//! waiting-call notifier uses a dedicated bot and channel.

pub mod dedup;
pub mod html;
pub mod types;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

use self::types::{
    API_BASE, EditMessageTextRequest, SendChatActionRequest, SendMessageRequest,
    SentMessage, SetWebhookRequest, TelegramResponse,
};
use crate::{Error, Result};

pub use dedup::UpdateDedup;
pub use html::sanitize_responder_html;

/// Update types the webhook subscribes to
const ALLOWED_UPDATES: &[&str] = &[
    "message",
    "edited_message",
    "business_connection",
    "business_message",
    "edited_business_message",
];

/// Telegram Bot API client for one bot token
#[derive(Clone)]
pub struct TelegramChannel {
    token: String,
    client: Client,
}

impl TelegramChannel {
    /// Create a new client
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: Client::new(),
        }
    }

    /// Send a message to a chat
    ///
    /// Uses HTML parse mode with a plain-text retry, since responder output
    /// is only best-effort HTML.
    ///
    /// # Errors
    ///
    /// Returns error if both attempts fail
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        business_connection_id: Option<&str>,
    ) -> Result<()> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some("HTML"),
            business_connection_id,
            disable_web_page_preview: None,
        };

        let response: TelegramResponse<SentMessage> =
            self.call("sendMessage", &request).await?;

        if response.ok {
            tracing::debug!(chat_id, "Telegram message sent");
            return Ok(());
        }

        // HTML parse errors are recoverable; retry once without parse mode
        let description = response.description.unwrap_or_default();
        tracing::warn!(chat_id, error = %description, "HTML send failed, retrying as plain text");

        let fallback = SendMessageRequest {
            chat_id,
            text,
            parse_mode: None,
            business_connection_id,
            disable_web_page_preview: None,
        };

        let response: TelegramResponse<SentMessage> =
            self.call("sendMessage", &fallback).await?;

        if response.ok {
            Ok(())
        } else {
            Err(Error::Channel(format!(
                "Telegram sendMessage failed: {}",
                response.description.unwrap_or_default()
            )))
        }
    }

    /// Send a message and return its (chat id, message id) pair
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails or the response lacks an id
    pub async fn send_message_returning_id(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<(i64, i64)> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some("HTML"),
            business_connection_id: None,
            disable_web_page_preview: Some(true),
        };

        let response: TelegramResponse<SentMessage> =
            self.call("sendMessage", &request).await?;

        match response.result {
            Some(sent) if response.ok => {
                let sent_chat = sent.chat.map_or(chat_id, |c| c.id);
                Ok((sent_chat, sent.message_id))
            }
            _ => Err(Error::Channel(format!(
                "Telegram sendMessage failed: {}",
                response.description.unwrap_or_default()
            ))),
        }
    }

    /// Edit a previously sent message in place
    ///
    /// A "message is not modified" rejection means the text already matches
    /// and is treated as success.
    ///
    /// # Errors
    ///
    /// Returns error for any other API failure
    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
            parse_mode: Some("HTML"),
            disable_web_page_preview: Some(true),
        };

        let response: TelegramResponse<SentMessage> =
            self.call("editMessageText", &request).await?;

        if response.ok {
            return Ok(());
        }

        let description = response.description.unwrap_or_default();
        if description.to_lowercase().contains("message is not modified") {
            tracing::debug!(chat_id, message_id, "edit was a no-op");
            return Ok(());
        }

        Err(Error::Channel(format!("Telegram editMessageText failed: {description}")))
    }

    /// Show the "typing..." indicator in a chat
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails
    pub async fn send_chat_action(
        &self,
        chat_id: i64,
        business_connection_id: Option<&str>,
    ) -> Result<()> {
        let request = SendChatActionRequest {
            chat_id,
            action: "typing",
            business_connection_id,
        };

        let _: TelegramResponse<bool> = self.call("sendChatAction", &request).await?;
        Ok(())
    }

    /// Register the webhook URL for this bot
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails
    pub async fn set_webhook(&self, url: &str) -> Result<()> {
        let request = SetWebhookRequest {
            url,
            allowed_updates: ALLOWED_UPDATES,
        };

        let response: TelegramResponse<bool> = self.call("setWebhook", &request).await?;

        if response.ok {
            tracing::info!(url, "Telegram webhook set");
            Ok(())
        } else {
            Err(Error::Channel(format!(
                "Telegram setWebhook failed: {}",
                response.description.unwrap_or_default()
            )))
        }
    }

    /// POST one Bot API method and decode the response envelope
    async fn call<B, R>(&self, method: &str, body: &B) -> Result<TelegramResponse<R>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{API_BASE}{}/{method}", self.token);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram API error: {e}")))?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::Channel(format!("Telegram response read error: {e}")))?;

        serde_json::from_str(&body)
            .map_err(|e| Error::Channel(format!("Telegram response parse error: {e} - {body}")))
    }
}
