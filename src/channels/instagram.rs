//! Instagram session-relay client
//!
//! Instagram is reached through a separate relay process that holds the web
//! session: the gateway posts the session material (a raw `sessionid` or a
//! structured cookie set) plus an API key, and the relay talks to Instagram.
//! The relay may hand back rotated session state, which callers must persist
//! onto the integration.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::db::Integration;
use crate::{Error, Result};

/// One cookie from an exported browser cookie set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayCookie {
    pub name: String,
    pub value: String,
}

/// Session material forwarded to the relay
#[derive(Debug, Clone)]
pub enum SessionMaterial {
    /// Raw `sessionid` cookie value
    SessionId(String),
    /// Full cookie set exported from a logged-in browser
    Cookies(Vec<RelayCookie>),
}

impl SessionMaterial {
    /// Build session material from an integration's opaque blobs
    ///
    /// A structured cookie set in the session blob wins over a raw session
    /// id; the credential blob is the fallback for first contact before any
    /// session state was persisted.
    #[must_use]
    pub fn from_integration(integration: &Integration) -> Option<Self> {
        let cookies = integration.session_data.get("cookies");
        if let Some(cookies) = cookies {
            if let Ok(cookies) = serde_json::from_value::<Vec<RelayCookie>>(cookies.clone()) {
                if !cookies.is_empty() {
                    return Some(Self::Cookies(cookies));
                }
            }
        }

        let session_id = integration
            .session_data
            .get("sessionid")
            .and_then(|v| v.as_str())
            .or_else(|| integration.credentials.get("sessionid").and_then(|v| v.as_str()));

        session_id.map(|id| Self::SessionId(id.to_string()))
    }

    fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionId(id) => Some(id),
            Self::Cookies(_) => None,
        }
    }

    fn cookies(&self) -> Option<&[RelayCookie]> {
        match self {
            Self::SessionId(_) => None,
            Self::Cookies(cookies) => Some(cookies),
        }
    }
}

/// A direct thread from the relay's inbox snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct RelayThread {
    pub thread_id: String,
    #[serde(default)]
    pub users: Vec<RelayThreadUser>,
    /// Most recent items first
    #[serde(default)]
    pub items: Vec<RelayItem>,
}

/// A participant in a direct thread
#[derive(Debug, Clone, Deserialize)]
pub struct RelayThreadUser {
    pub pk: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// One item inside a thread
#[derive(Debug, Clone, Deserialize)]
pub struct RelayItem {
    pub item_id: String,
    pub user_id: i64,
    pub item_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Inbox snapshot returned by the relay
#[derive(Debug, Deserialize)]
pub struct InboxSnapshot {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub threads: Vec<RelayThread>,
    /// Account id of the integration's own user, for self-filtering
    #[serde(rename = "myUserId", default)]
    pub my_user_id: Option<String>,
    /// Rotated session state to persist, when the relay refreshed it
    #[serde(rename = "refreshedSession", default)]
    pub refreshed_session: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "refreshedSession", default)]
    refreshed_session: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct CheckMessagesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    sessionid: Option<&'a str>,
    #[serde(rename = "cookiesJson", skip_serializing_if = "Option::is_none")]
    cookies_json: Option<&'a [RelayCookie]>,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    sessionid: Option<&'a str>,
    #[serde(rename = "cookiesJson", skip_serializing_if = "Option::is_none")]
    cookies_json: Option<&'a [RelayCookie]>,
    #[serde(rename = "threadId")]
    thread_id: &'a str,
    text: &'a str,
}

/// HTTP client for the session relay
#[derive(Clone)]
pub struct InstagramRelay {
    base_url: String,
    api_key: String,
    client: Client,
}

impl InstagramRelay {
    /// Create a new relay client
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    /// Fetch the inbox snapshot for one account
    ///
    /// # Errors
    ///
    /// Returns error if the relay is unreachable or reports a failure
    pub async fn check_inbox(&self, session: &SessionMaterial) -> Result<InboxSnapshot> {
        let request = CheckMessagesRequest {
            sessionid: session.session_id(),
            cookies_json: session.cookies(),
        };

        let snapshot: InboxSnapshot = self.post("/api/ig/check_messages", &request).await?;

        if snapshot.success {
            Ok(snapshot)
        } else {
            Err(Error::Relay(
                snapshot.error.unwrap_or_else(|| "relay reported failure".into()),
            ))
        }
    }

    /// Send a text reply into a thread
    ///
    /// Returns rotated session state when the relay refreshed it.
    ///
    /// # Errors
    ///
    /// Returns error if the relay is unreachable or reports a failure
    pub async fn send_text(
        &self,
        session: &SessionMaterial,
        thread_id: &str,
        text: &str,
    ) -> Result<Option<serde_json::Value>> {
        let request = SendMessageRequest {
            sessionid: session.session_id(),
            cookies_json: session.cookies(),
            thread_id,
            text,
        };

        let response: SendResponse = self.post("/api/ig/send_message", &request).await?;

        if response.success {
            Ok(response.refreshed_session)
        } else {
            Err(Error::Relay(
                response.error.unwrap_or_else(|| "relay reported failure".into()),
            ))
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Relay(format!("relay request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Relay(format!("relay response read error: {e}")))?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(200).collect();
            return Err(Error::Relay(format!("relay {status}: {excerpt}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Relay(format!("relay response parse error: {e}")))
    }
}
