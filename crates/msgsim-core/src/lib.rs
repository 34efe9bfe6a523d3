pub mod config;
pub mod constants;
pub mod events;
pub mod migrate;
pub mod models;
pub mod navigation;
pub mod reconcile;
pub mod storage;
pub mod store;
pub mod tracing_setup;

pub use config::CoreConfig;
pub use events::{ChangeReason, MessagesChanged, StoreEvent, Subscription};
pub use models::{Image, Message, MessagePatch, Recipient, RecipientPatch, Sender, Thread};
pub use navigation::{HistoryBackend, MemoryHistory, NavigationState};
pub use reconcile::{
    AddressAction, LastActivePointer, Reconciler, ReconcilerSession, Resolution, ResolutionSource,
};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use store::{FrameDebouncer, ImportError, StoreError, ThreadRepository};
