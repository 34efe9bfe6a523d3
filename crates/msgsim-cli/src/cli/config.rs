use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use msgsim_core::CoreConfig;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "msgsim";

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Directory holding one JSON file per storage key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Byte budget across all stored values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_quota_bytes: Option<usize>,

    /// Delay between a mutation and its write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_debounce_ms: Option<u64>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize config")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    /// Resolve into a core config. `data_dir` (from a flag) wins over the file.
    pub fn core_config(&self, data_dir: Option<PathBuf>) -> CoreConfig {
        let dir = data_dir
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(default_data_dir);
        let mut config = CoreConfig::new(dir);
        if let Some(bytes) = self.storage_quota_bytes {
            config = config.with_quota(bytes);
        }
        if let Some(ms) = self.save_debounce_ms {
            config = config.with_debounce(Duration::from_millis(ms));
        }
        config
    }
}

/// `<platform data dir>/msgsim`, or `./msgsim` when the platform has none
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_full() {
        let json = r#"{
            "dataDir": "/tmp/msgsim-test",
            "storageQuotaBytes": 5242880,
            "saveDebounceMs": 16
        }"#;
        let config: CliConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/msgsim-test")));
        assert_eq!(config.storage_quota_bytes, Some(5_242_880));

        let core = config.core_config(None);
        assert_eq!(core.data_dir, PathBuf::from("/tmp/msgsim-test"));
        assert_eq!(core.storage_quota_bytes, Some(5_242_880));
        assert_eq!(core.save_debounce, Duration::from_millis(16));
    }

    #[test]
    fn test_parse_config_minimal() {
        let config: CliConfig = serde_json::from_str("{}").unwrap();
        assert!(config.data_dir.is_none());
        let core = config.core_config(None);
        assert_eq!(core.data_dir, default_data_dir());
        assert!(core.storage_quota_bytes.is_none());
        assert_eq!(core.save_debounce, Duration::ZERO);
    }

    #[test]
    fn test_flag_overrides_file() {
        let config = CliConfig {
            data_dir: Some(PathBuf::from("/from/file")),
            ..Default::default()
        };
        let core = config.core_config(Some(PathBuf::from("/from/flag")));
        assert_eq!(core.data_dir, PathBuf::from("/from/flag"));
    }

    #[test]
    fn test_json_round_trip_skips_unset() {
        let config = CliConfig {
            storage_quota_bytes: Some(1024),
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(json, r#"{"storageQuotaBytes":1024}"#);
        let back = CliConfig::from_json(&json).unwrap();
        assert_eq!(back.storage_quota_bytes, Some(1024));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = CliConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}
