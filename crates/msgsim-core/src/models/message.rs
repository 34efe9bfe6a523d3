use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{generate_id, time};
use crate::constants::DEFAULT_MESSAGES;

/// Which side of the conversation a bubble belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "self")]
    User,
    #[serde(rename = "other")]
    Other,
}

impl Sender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "self" => Some(Sender::User),
            "other" => Some(Sender::Other),
            _ => None,
        }
    }
}

/// Image inserted into a message. `src` is self-contained (e.g. a data URI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub src: String,
}

impl Image {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            id: generate_id("img"),
            src: src.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    /// May be empty while a card is being composed
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(with = "time::iso8601")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Empty placeholder card from the user's side
    pub fn blank(now: DateTime<Utc>) -> Self {
        Self {
            id: generate_id("msg"),
            sender: Sender::User,
            message: String::new(),
            images: Vec::new(),
            timestamp: now,
        }
    }

    /// Copy with fresh message and image ids
    pub fn with_new_ids(&self) -> Self {
        Self {
            id: generate_id("msg"),
            images: self
                .images
                .iter()
                .map(|img| Image::new(img.src.clone()))
                .collect(),
            ..self.clone()
        }
    }

    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(text) = patch.message {
            self.message = text;
        }
        if let Some(sender) = patch.sender {
            self.sender = sender;
        }
        if let Some(images) = patch.images {
            self.images = images;
        }
    }
}

/// Partial update for `ThreadRepository::update_message`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub message: Option<String>,
    pub sender: Option<Sender>,
    pub images: Option<Vec<Image>>,
}

impl MessagePatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }
}

/// The canned demo conversation, one second apart starting at `now`
pub fn seed_messages(now: DateTime<Utc>) -> Vec<Message> {
    DEFAULT_MESSAGES
        .iter()
        .enumerate()
        .map(|(i, (sender, text))| Message {
            id: generate_id("msg"),
            sender: *sender,
            message: (*text).to_string(),
            images: Vec::new(),
            timestamp: now + Duration::seconds(i as i64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_wire_names() {
        assert_eq!(serde_json::to_string(&Sender::User).unwrap(), "\"self\"");
        assert_eq!(Sender::parse("other"), Some(Sender::Other));
        assert_eq!(Sender::parse("nope"), None);
    }

    #[test]
    fn test_text_only_message_omits_images() {
        let msg = Message::blank(time::now());
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("images").is_none());
        assert_eq!(json["message"], "");
    }

    #[test]
    fn test_seed_messages_are_ordered_and_unique() {
        let now = time::now();
        let seeded = seed_messages(now);
        assert_eq!(seeded.len(), DEFAULT_MESSAGES.len());
        assert!(seeded.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_ne!(seeded[0].id, seeded[1].id);
    }

    #[test]
    fn test_with_new_ids_keeps_content() {
        let mut msg = Message::blank(time::now());
        msg.message = "hi".to_string();
        msg.images.push(Image::new("data:image/png;base64,abc"));
        let copy = msg.with_new_ids();
        assert_ne!(copy.id, msg.id);
        assert_ne!(copy.images[0].id, msg.images[0].id);
        assert_eq!(copy.images[0].src, msg.images[0].src);
        assert_eq!(copy.message, "hi");
    }
}
