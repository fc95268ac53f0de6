//! Conversation status state machine
//!
//! The transition graph is deliberately permissive - any status may move to
//! any other. Two transition sources exist: the deterministic phone rule
//! (applied in the pipeline before the responder runs, always wins) and
//! AI-directed transitions parsed out of responder output. Statuses past the
//! human hand-off point suppress the responder but keep ingesting messages.

/// Sales-pipeline status of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    New,
    Interested,
    WaitingCall,
    Scheduled,
    ClosedWon,
    ClosedLost,
}

impl ConversationStatus {
    /// Status assigned to a freshly created conversation
    #[must_use]
    pub const fn initial() -> Self {
        Self::New
    }

    /// Stable identifier stored in the database and used in directives
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Interested => "interested",
            Self::WaitingCall => "waiting_call",
            Self::Scheduled => "scheduled",
            Self::ClosedWon => "closed_won",
            Self::ClosedLost => "closed_lost",
        }
    }

    /// Parse a stored identifier or directive token
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "interested" => Some(Self::Interested),
            "waiting_call" => Some(Self::WaitingCall),
            "scheduled" => Some(Self::Scheduled),
            "closed_won" => Some(Self::ClosedWon),
            "closed_lost" => Some(Self::ClosedLost),
            _ => None,
        }
    }

    /// Whether the responder must be suppressed in this status
    ///
    /// Once a conversation reaches a human hand-off or a deal outcome the
    /// bot stops replying; inbound messages are still stored and
    /// lead-extracted.
    #[must_use]
    pub const fn suppresses_responder(self) -> bool {
        matches!(
            self,
            Self::WaitingCall | Self::Scheduled | Self::ClosedWon | Self::ClosedLost
        )
    }

    /// Russian label shown on the waiting-call notification card
    #[must_use]
    pub const fn card_label(self) -> &'static str {
        match self {
            Self::New => "Новый",
            Self::Interested => "Интерес",
            Self::WaitingCall => "Ждет звонка",
            Self::Scheduled => "Запись",
            Self::ClosedWon => "Продажа",
            Self::ClosedLost => "Отказ",
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        for status in [
            ConversationStatus::New,
            ConversationStatus::Interested,
            ConversationStatus::WaitingCall,
            ConversationStatus::Scheduled,
            ConversationStatus::ClosedWon,
            ConversationStatus::ClosedLost,
        ] {
            assert_eq!(ConversationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ConversationStatus::parse("garbage"), None);
    }

    #[test]
    fn suppression_covers_handoff_and_outcomes() {
        assert!(!ConversationStatus::New.suppresses_responder());
        assert!(!ConversationStatus::Interested.suppresses_responder());
        assert!(ConversationStatus::WaitingCall.suppresses_responder());
        assert!(ConversationStatus::Scheduled.suppresses_responder());
        assert!(ConversationStatus::ClosedWon.suppresses_responder());
        assert!(ConversationStatus::ClosedLost.suppresses_responder());
    }

    #[test]
    fn initial_status_is_new() {
        assert_eq!(ConversationStatus::initial(), ConversationStatus::New);
    }
}
