//! Externally visible address of the current thread.
//!
//! `HistoryBackend` is the host's session history. `NavigationState` reads and
//! writes the `thread` query parameter on top of it.

mod history;
mod state;

pub use history::{HistoryBackend, MemoryHistory};
pub use state::NavigationState;
