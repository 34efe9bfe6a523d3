//! Schema migration for persisted and imported payloads.
//!
//! Known shapes, oldest first:
//! - schema 0: bare `Message[]`
//! - schema 1: `{ version: 1, messages, recipient? }`, one conversation
//! - schema 2: `{ version: 2, threads: Thread[] }`
//!
//! Every shape goes through the same repair pass: numeric timestamps become
//! ISO strings, missing ids are generated, missing timestamps are synthesized
//! one second apart so untimed legacy messages keep their relative order.
//! Records that are structurally wrong are dropped, never invented.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::constants::{CURRENT_SCHEMA_VERSION, LEGACY_SINGLE_THREAD_VERSION};
use crate::models::{generate_id, time, Image, Message, Recipient, Sender, Thread};

/// Persisted payload decoded by shape and explicit `version`
#[derive(Debug, Clone, PartialEq)]
pub enum PersistedPayload {
    /// Earliest schema: a bare message array
    Bare(Vec<Value>),
    /// Pre-thread schema: one conversation
    SingleThread {
        messages: Vec<Value>,
        recipient: Option<Value>,
    },
    /// Current schema
    Threads(Vec<Value>),
    Unrecognized,
}

impl PersistedPayload {
    pub fn classify(value: Value) -> Self {
        let mut obj = match value {
            Value::Array(items) => return PersistedPayload::Bare(items),
            Value::Object(obj) => obj,
            _ => return PersistedPayload::Unrecognized,
        };

        match obj.get("version").and_then(Value::as_u64) {
            Some(LEGACY_SINGLE_THREAD_VERSION) => match obj.remove("messages") {
                Some(Value::Array(messages)) => PersistedPayload::SingleThread {
                    messages,
                    recipient: obj.remove("recipient"),
                },
                _ => PersistedPayload::Unrecognized,
            },
            Some(CURRENT_SCHEMA_VERSION) => match obj.remove("threads") {
                Some(Value::Array(threads)) => PersistedPayload::Threads(threads),
                _ => PersistedPayload::Unrecognized,
            },
            _ => PersistedPayload::Unrecognized,
        }
    }
}

/// Import input: a bare message array or `{ messages, recipient? }`
#[derive(Debug, Clone, PartialEq)]
pub enum ImportPayload {
    Bare(Vec<Value>),
    Wrapped {
        messages: Vec<Value>,
        recipient: Option<Value>,
    },
}

impl ImportPayload {
    pub fn decode(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(ImportPayload::Bare(items)),
            Value::Object(mut obj) => match obj.remove("messages") {
                Some(Value::Array(messages)) => Some(ImportPayload::Wrapped {
                    messages,
                    recipient: obj.remove("recipient"),
                }),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn into_parts(self) -> (Vec<Value>, Option<Value>) {
        match self {
            ImportPayload::Bare(messages) => (messages, None),
            ImportPayload::Wrapped {
                messages,
                recipient,
            } => (messages, recipient),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub threads: Vec<Thread>,
    /// True iff anything was added, dropped or rewritten. The repository
    /// only re-persists when this is set.
    pub migrated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairedMessages {
    pub messages: Vec<Message>,
    pub migrated: bool,
}

/// Translate a persisted payload into the current shape.
/// `None` means the payload is unrecognized and defaults should be seeded.
pub fn migrate(value: Value, now: DateTime<Utc>) -> Option<Migration> {
    match PersistedPayload::classify(value) {
        PersistedPayload::Bare(items) => {
            debug!("Migrating bare message array ({} items)", items.len());
            let repaired = repair_messages(items, now);
            let thread = Thread::with_content(repaired.messages, Recipient::default(), now);
            Some(Migration {
                threads: vec![thread],
                migrated: true,
            })
        }
        PersistedPayload::SingleThread {
            messages,
            recipient,
        } => {
            debug!("Migrating single-thread payload ({} messages)", messages.len());
            let repaired = repair_messages(messages, now);
            let (recipient, _) = repair_recipient(recipient.as_ref());
            let thread = Thread::with_content(repaired.messages, recipient, now);
            Some(Migration {
                threads: vec![thread],
                migrated: true,
            })
        }
        PersistedPayload::Threads(items) => {
            let mut migrated = false;
            let mut seen = HashSet::new();
            let mut threads = Vec::with_capacity(items.len());
            for item in items {
                match repair_thread(item, now) {
                    Some((thread, changed)) => {
                        if !seen.insert(thread.id.clone()) {
                            warn!("Dropping duplicate thread id {}", thread.id);
                            migrated = true;
                            continue;
                        }
                        migrated |= changed;
                        threads.push(thread);
                    }
                    None => {
                        warn!("Dropping structurally invalid thread");
                        migrated = true;
                    }
                }
            }
            Some(Migration { threads, migrated })
        }
        PersistedPayload::Unrecognized => None,
    }
}

/// Validate and repair a list of raw messages.
pub fn repair_messages(items: Vec<Value>, now: DateTime<Utc>) -> RepairedMessages {
    let mut migrated = false;
    let mut messages = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let fallback = now + Duration::seconds(i as i64);
        match repair_message(item, fallback) {
            Some((message, changed)) => {
                migrated |= changed;
                messages.push(message);
            }
            None => {
                debug!("Dropping invalid message at index {}", i);
                migrated = true;
            }
        }
    }
    RepairedMessages { messages, migrated }
}

/// Returns the repaired message and whether anything had to change.
fn repair_message(item: Value, fallback_ts: DateTime<Utc>) -> Option<(Message, bool)> {
    let Value::Object(mut obj) = item else {
        return None;
    };

    let text = match obj.remove("message") {
        Some(Value::String(text)) => text,
        _ => return None,
    };
    let sender = obj.get("sender").and_then(Value::as_str).and_then(Sender::parse)?;

    let (id, id_changed) = repair_id(obj.remove("id"), "msg")?;
    let (timestamp, ts_changed) = repair_timestamp(obj.remove("timestamp"), fallback_ts)?;
    let (images, images_changed) = repair_images(obj.remove("images"))?;

    Some((
        Message {
            id,
            sender,
            message: text,
            images,
            timestamp,
        },
        id_changed || ts_changed || images_changed,
    ))
}

/// Missing, null or empty ids are regenerated; any other non-string is invalid.
fn repair_id(raw: Option<Value>, prefix: &str) -> Option<(String, bool)> {
    match raw {
        Some(Value::String(id)) if !id.is_empty() => Some((id, false)),
        None | Some(Value::Null) => Some((generate_id(prefix), true)),
        Some(Value::String(_)) => Some((generate_id(prefix), true)),
        Some(_) => None,
    }
}

fn repair_timestamp(
    raw: Option<Value>,
    fallback: DateTime<Utc>,
) -> Option<(DateTime<Utc>, bool)> {
    match raw {
        Some(Value::String(s)) => match time::parse_iso(&s) {
            Some(ts) => {
                let canonical = time::to_iso(&ts) == s;
                Some((ts, !canonical))
            }
            None => Some((fallback, true)),
        },
        Some(Value::Number(n)) => {
            let ts = n.as_f64().and_then(time::from_epoch_millis).unwrap_or(fallback);
            Some((ts, true))
        }
        None | Some(Value::Null) => Some((fallback, true)),
        Some(_) => None,
    }
}

fn repair_images(raw: Option<Value>) -> Option<(Vec<Image>, bool)> {
    let items = match raw {
        None | Some(Value::Null) => return Some((Vec::new(), false)),
        Some(Value::Array(items)) => items,
        Some(_) => return None,
    };

    let mut changed = false;
    let mut images = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(mut obj) = item else {
            changed = true;
            continue;
        };
        let src = match obj.remove("src") {
            Some(Value::String(src)) if !src.is_empty() => src,
            _ => {
                changed = true;
                continue;
            }
        };
        match repair_id(obj.remove("id"), "img") {
            Some((id, id_changed)) => {
                changed |= id_changed;
                images.push(Image { id, src });
            }
            None => changed = true,
        }
    }
    Some((images, changed))
}

/// Recipient block, falling back field by field to defaults. Values are trimmed.
pub fn repair_recipient(raw: Option<&Value>) -> (Recipient, bool) {
    let defaults = Recipient::default();
    let Some(Value::Object(obj)) = raw else {
        return (defaults, true);
    };

    let field = |key: &str, default: String| -> (String, bool) {
        match obj.get(key) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                (trimmed.to_string(), trimmed != s)
            }
            _ => (default, true),
        }
    };

    let (name, name_changed) = field("name", defaults.name);
    let (location, location_changed) = field("location", defaults.location);
    (Recipient { name, location }, name_changed || location_changed)
}

fn repair_thread(item: Value, now: DateTime<Utc>) -> Option<(Thread, bool)> {
    let Value::Object(mut obj) = item else {
        return None;
    };

    let id = match obj.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => return None,
    };
    let raw_messages = match obj.remove("messages") {
        Some(Value::Array(messages)) => messages,
        _ => return None,
    };

    let mut changed = false;

    let name = match obj.remove("name") {
        Some(Value::String(name)) => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                changed = true;
                None
            } else {
                changed |= trimmed != name;
                Some(trimmed.to_string())
            }
        }
        None | Some(Value::Null) => None,
        Some(_) => {
            changed = true;
            None
        }
    };

    let (recipient, recipient_changed) = repair_recipient(obj.get("recipient"));
    changed |= recipient_changed;

    let repaired = repair_messages(raw_messages, now);
    changed |= repaired.migrated;

    let (created_at, created_changed) = thread_timestamp(&mut obj, "createdAt", now);
    let (updated_at, updated_changed) = thread_timestamp(&mut obj, "updatedAt", created_at);
    changed |= created_changed || updated_changed;

    Some((
        Thread {
            id,
            name,
            messages: repaired.messages,
            recipient,
            created_at,
            updated_at,
        },
        changed,
    ))
}

fn thread_timestamp(
    obj: &mut Map<String, Value>,
    key: &str,
    fallback: DateTime<Utc>,
) -> (DateTime<Utc>, bool) {
    // Wrong-typed thread timestamps are repaired rather than dropping the thread
    repair_timestamp(obj.remove(key), fallback).unwrap_or((fallback, true))
}
