//! Application-wide constants
//!
//! Storage keys, schema versions and the canned demo conversation that seeds
//! every fresh thread.

use crate::models::Sender;

/// Storage key of the versioned thread collection payload
pub const THREADS_STORAGE_KEY: &str = "message-simulator:threads";

/// Storage key of the last-active thread pointer (plain string, unversioned)
pub const LAST_THREAD_KEY: &str = "message-simulator:last-thread";

/// Query parameter that carries the navigation reference
pub const THREAD_QUERY_PARAM: &str = "thread";

// Schema versions of the persisted payload.
// 0 is the bare message array, which never carried a version field.
pub const LEGACY_SINGLE_THREAD_VERSION: u64 = 1;
pub const CURRENT_SCHEMA_VERSION: u64 = 2;

// Thread defaults
pub const DEFAULT_THREAD_TITLE: &str = "Untitled";
pub const COPY_SUFFIX: &str = " (Copy)";

// Recipient defaults
pub const DEFAULT_RECIPIENT_NAME: &str = "Dreamer";
pub const DEFAULT_RECIPIENT_LOCATION: &str = "Somewhere";

/// Seed conversation for new threads, `clear()` and first launch.
pub const DEFAULT_MESSAGES: &[(Sender, &str)] = &[
    (Sender::Other, "Hi"),
    (Sender::Other, "Hello"),
    (Sender::User, "What is this?"),
    (Sender::Other, "I had a dream that I was building an iMessage simulator"),
    (Sender::Other, "When I woke up I decided that I should build it"),
    (Sender::User, "What do I do with it?"),
    (Sender::Other, "Flip the switch beside the input to change senders"),
    (Sender::Other, "Use the plus menu to clear, export, and import"),
    (Sender::User, "No like, what is it for?"),
    (Sender::Other, "Lol idk"),
];
