use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{seed_messages, Message};
use super::{generate_id, time};
use crate::constants::{DEFAULT_RECIPIENT_LOCATION, DEFAULT_RECIPIENT_NAME, DEFAULT_THREAD_TITLE};

/// Display metadata of the simulated other party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub location: String,
}

impl Default for Recipient {
    fn default() -> Self {
        Self {
            name: DEFAULT_RECIPIENT_NAME.to_string(),
            location: DEFAULT_RECIPIENT_LOCATION.to_string(),
        }
    }
}

impl Recipient {
    /// Merge trimmed fields. Returns true if anything changed.
    pub fn merge(&mut self, patch: &RecipientPatch) -> bool {
        let mut changed = false;
        if let Some(name) = patch.name.as_deref().map(str::trim) {
            if name != self.name {
                self.name = name.to_string();
                changed = true;
            }
        }
        if let Some(location) = patch.location.as_deref().map(str::trim) {
            if location != self.location {
                self.location = location.to_string();
                changed = true;
            }
        }
        changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientPatch {
    pub name: Option<String>,
    pub location: Option<String>,
}

/// One conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    /// User override; `None` means "derive from recipient"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub messages: Vec<Message>,
    pub recipient: Recipient,
    #[serde(with = "time::iso8601")]
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation; drives list ordering
    #[serde(with = "time::iso8601")]
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Fresh thread holding the demo conversation
    pub fn seeded(now: DateTime<Utc>) -> Self {
        Self::with_content(seed_messages(now), Recipient::default(), now)
    }

    pub fn with_content(messages: Vec<Message>, recipient: Recipient, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_id("thread"),
            name: None,
            messages,
            recipient,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name;
        }
        let recipient = self.recipient.name.trim();
        if recipient.is_empty() {
            DEFAULT_THREAD_TITLE
        } else {
            recipient
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        // Never move backwards, even if the clock does
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    pub fn message_index(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }
}
