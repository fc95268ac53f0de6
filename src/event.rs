//! Canonical inbound event model
//!
//! Channel adapters decode provider payloads at the boundary and hand the
//! pipeline one of these. Raw provider shapes never travel further than the
//! adapter that received them.

/// Messaging platform an integration is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Telegram business account reached through a bot webhook
    TelegramBusiness,
    /// Instagram direct messages reached through a session relay
    Instagram,
}

impl Platform {
    /// Stable identifier stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TelegramBusiness => "telegram_business",
            Self::Instagram => "instagram",
        }
    }

    /// Parse a stored identifier
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telegram_business" => Some(Self::TelegramBusiness),
            "instagram" => Some(Self::Instagram),
            _ => None,
        }
    }

    /// Human-readable platform name for the notification card
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::TelegramBusiness => "Telegram",
            Self::Instagram => "Instagram",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized customer message, ready for ingestion
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Platform the message arrived on
    pub platform: Platform,
    /// Provider-specific chat/thread identifier
    pub external_chat_id: String,
    /// Provider-assigned message identifier (the dedup key)
    pub provider_message_id: String,
    /// Customer display name as reported by the provider
    pub sender_name: String,
    /// Customer username, when the provider exposes one
    pub sender_username: Option<String>,
    /// Message text
    pub text: String,
    /// Telegram business-connection id carried inside the message, if any
    pub connection_id: Option<String>,
}
