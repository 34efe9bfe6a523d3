pub mod message;
pub mod thread;
pub mod time;

pub use message::{Image, Message, MessagePatch, Sender};
pub use thread::{Recipient, RecipientPatch, Thread};

use uuid::Uuid;

/// Generate a unique identifier with a readable prefix, e.g. `thread-<uuid>`
pub(crate) fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}
