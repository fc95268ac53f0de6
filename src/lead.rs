//! Lead profile extraction
//!
//! Pure text heuristics that turn a free-form customer message into a
//! partial profile patch. Each heuristic is independent; a message may fill
//! any subset of fields. Patches are merged field-wise onto the
//! conversation's aggregate profile (last non-empty write wins, nothing is
//! ever cleared), so replaying history is always safe.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+|\b)(?:998|7|8)\d{9}\b|\+?\d{10,15}").expect("valid regex")
});

static LEGAL_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:юрлиц|юридическ|\bооо\b|\bип\b|компани|организаци|бизнес)")
        .expect("valid regex")
});

static INDIVIDUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:физлиц|физическ|частн(?:ый|ая)|для дома|\bдом\b)").expect("valid regex")
});

static ROOF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:крыш|кровл)").expect("valid regex"));

static GROUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:земл|на участке|грунт|\bполе\b)").expect("valid regex")
});

/// Labeled form first ("мощность: 10 кВт"), bare quantity second
static POWER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)мощност[ьи]\s*[:\-]?\s*(\d+(?:[.,]\d+)?\s*(?:квт|kw|киловатт\w*))")
            .expect("valid regex"),
        Regex::new(r"(?i)(\d+(?:[.,]\d+)?\s*(?:квт|kw|киловатт\w*))").expect("valid regex"),
    ]
});

static LOCATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)локаци[яи]\s*[:\-]?\s*([^\n,.]{2,80})").expect("valid regex"),
        Regex::new(r"(?i)(?:город|г\.|область|район|адрес)\s*[:\-]?\s*([^\n,.]{2,80})")
            .expect("valid regex"),
        Regex::new(r"(?i)(?:нахожусь|находимся|установк[аи]\s+в)\s+([^\n,.]{2,80})")
            .expect("valid regex"),
    ]
});

static STATION_TYPE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)тип(?:\s+станции)?\s*[:\-]\s*([^\n,.]{2,80})").expect("valid regex"),
        Regex::new(r"(?i)((?:сетев\w+|гибридн\w+|автономн\w+)\s*(?:станци\w+|сэс)?)")
            .expect("valid regex"),
    ]
});

/// Whether the customer buys as a person or as a company
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Individual,
    Legal,
}

/// Where the installation would be mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationSurface {
    Roof,
    Ground,
}

/// Structured lead data accumulated over a conversation
///
/// Also used as the per-message extraction patch; `merge` folds a patch
/// into the aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_surface: Option<InstallationSurface>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl LeadProfile {
    /// True when no field is set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.client_type.is_none()
            && self.power.is_none()
            && self.location.is_none()
            && self.station_type.is_none()
            && self.installation_surface.is_none()
            && self.username.is_none()
    }

    /// Fold a patch into this profile
    ///
    /// A set field in the patch overwrites; an unset field is a no-op. A
    /// field once set can therefore never revert to empty.
    pub fn merge(&mut self, patch: &Self) {
        if patch.phone.is_some() {
            self.phone.clone_from(&patch.phone);
        }
        if patch.client_type.is_some() {
            self.client_type = patch.client_type;
        }
        if patch.power.is_some() {
            self.power.clone_from(&patch.power);
        }
        if patch.location.is_some() {
            self.location.clone_from(&patch.location);
        }
        if patch.station_type.is_some() {
            self.station_type.clone_from(&patch.station_type);
        }
        if patch.installation_surface.is_some() {
            self.installation_surface = patch.installation_surface;
        }
        if patch.username.is_some() {
            self.username.clone_from(&patch.username);
        }
    }
}

/// First phone-looking substring in the text, if any
///
/// Shared with the deterministic status rule: a message that contains a
/// phone number forces the conversation into `waiting_call`.
#[must_use]
pub fn find_phone(text: &str) -> Option<&str> {
    PHONE.find(text).map(|m| m.as_str())
}

/// Extract a profile patch from one message
#[must_use]
pub fn extract(text: &str) -> LeadProfile {
    let normalized = compact_spaces(text);
    if normalized.is_empty() {
        return LeadProfile::default();
    }

    let mut patch = LeadProfile::default();

    if let Some(phone) = find_phone(&normalized) {
        patch.phone = Some(phone.to_string());
    }

    // Legal-entity vocabulary is checked first; a message mentioning both
    // sides classifies as legal.
    if LEGAL_ENTITY.is_match(&normalized) {
        patch.client_type = Some(ClientType::Legal);
    } else if INDIVIDUAL.is_match(&normalized) {
        patch.client_type = Some(ClientType::Individual);
    }

    if ROOF.is_match(&normalized) {
        patch.installation_surface = Some(InstallationSurface::Roof);
    } else if GROUND.is_match(&normalized) {
        patch.installation_surface = Some(InstallationSurface::Ground);
    }

    patch.power = first_match(&normalized, &POWER);
    patch.location = first_match(&normalized, &LOCATION);
    patch.station_type = first_match(&normalized, &STATION_TYPE);

    patch
}

/// Normalize a username to the `@name` form
#[must_use]
pub fn normalize_username(username: &str) -> String {
    if username.starts_with('@') {
        username.to_string()
    } else {
        format!("@{username}")
    }
}

fn compact_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First non-empty capture (or whole match) across an ordered alternative list
fn first_match(text: &str, patterns: &[Regex]) -> Option<String> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(text) {
            let value = caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str());
            if let Some(value) = value {
                let value = compact_spaces(value);
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}
