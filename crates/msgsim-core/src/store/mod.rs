pub mod debounce;
pub mod repository;

pub use debounce::FrameDebouncer;
pub use repository::{ImportError, StoreError, ThreadRepository};
