//! Core types — Event, Visibility, Utterance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Visibility ──

/// Where a conversation is held: the shared channel or a direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

// ── Event ──

/// One stimulus to a conversation. A message carries `text`; a timeout
/// tick synthesized by the scheduler does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub user: String,
    pub visibility: Visibility,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub addressed_to_bot: bool,
}

impl Event {
    pub fn message(
        user: impl Into<String>,
        visibility: Visibility,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
        addressed_to_bot: bool,
    ) -> Self {
        Self {
            user: user.into(),
            visibility,
            timestamp,
            text: Some(text.into()),
            addressed_to_bot,
        }
    }

    pub fn tick(user: impl Into<String>, visibility: Visibility, timestamp: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            visibility,
            timestamp,
            text: None,
            addressed_to_bot: false,
        }
    }

    pub fn is_tick(&self) -> bool {
        self.text.is_none()
    }

    /// Trimmed message text, or `None` for ticks and blank messages.
    pub fn usable_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

// ── Utterance ──

/// A line the bot wants to say to `user`, routed by `visibility`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub user: String,
    pub visibility: Visibility,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_text_trims_and_rejects_blank() {
        let now = Utc::now();
        let msg = Event::message("ann", Visibility::Public, now, "  hi  ", true);
        assert_eq!(msg.usable_text(), Some("hi"));

        let blank = Event::message("ann", Visibility::Public, now, "   ", true);
        assert_eq!(blank.usable_text(), None);

        let tick = Event::tick("ann", Visibility::Public, now);
        assert!(tick.is_tick());
        assert_eq!(tick.usable_text(), None);
    }

    #[test]
    fn test_visibility_display() {
        assert_eq!(Visibility::Public.to_string(), "public");
        assert_eq!(Visibility::Private.to_string(), "private");
    }
}
