//! Status directive parsing
//!
//! The responder may embed one control token of the form
//! `[[UPDATE_STATUS: <status>]]` anywhere in its output. This module is the
//! only place that knows the token syntax: it extracts the directive and
//! strips it from the user-visible text, so the syntax can change without
//! touching the state machine.

use std::sync::LazyLock;

use regex::Regex;

use crate::status::ConversationStatus;

static DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[UPDATE_STATUS:\s*([a-z_]+)\s*\]\]").expect("valid regex"));

/// Split raw responder output into visible text and an optional status
///
/// The directive token is stripped from the visible text whether or not its
/// status name is recognized; unknown names are logged and ignored.
#[must_use]
pub fn parse_reply(raw: &str) -> (String, Option<ConversationStatus>) {
    let Some(caps) = DIRECTIVE.captures(raw) else {
        return (raw.trim().to_string(), None);
    };

    let visible = DIRECTIVE.replace_all(raw, "").trim().to_string();
    let name = &caps[1];

    match ConversationStatus::parse(name) {
        Some(status) => (visible, Some(status)),
        None => {
            tracing::warn!(directive = name, "unknown status directive, ignoring");
            (visible, None)
        }
    }
}
