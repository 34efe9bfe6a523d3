use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    /// Byte budget of the persistence medium; `None` means unbounded
    pub storage_quota_bytes: Option<usize>,
    /// Minimum delay between a mutation and its write. Zero means "next frame".
    pub save_debounce: Duration,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            storage_quota_bytes: None,
            save_debounce: Duration::ZERO,
        }
    }

    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.storage_quota_bytes = Some(bytes);
        self
    }

    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.save_debounce = delay;
        self
    }
}
