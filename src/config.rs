use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::cipher::MIN_KEY_CHARS;

pub const DEFAULT_CONFIG_PATH: &str = "bkjobs.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Extensions whose copies get encrypted, without the leading dot
    pub encrypted_extensions: Vec<String>,
    /// Extensions processed before every other file of a job
    pub priority_extensions: Vec<String>,
    /// Process name that suspends all backups while it runs
    pub business_software: Option<String>,
    pub business_poll_interval_ms: u64,
    pub big_file_threshold_kb: u64,
    /// 0 means no limit
    pub max_concurrent_jobs: usize,
    pub encryption_key: Option<String>,
    pub encryption_lock_path: PathBuf,
    pub database_path: PathBuf,
    pub log_directory: PathBuf,
    pub state_file: Option<PathBuf>,
    pub rpc_bind: SocketAddr,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encrypted_extensions: Vec::new(),
            priority_extensions: Vec::new(),
            business_software: None,
            business_poll_interval_ms: 1000,
            big_file_threshold_kb: 1024,
            max_concurrent_jobs: 0,
            encryption_key: None,
            encryption_lock_path: std::env::temp_dir().join("bkjobs-encryption.lock"),
            database_path: PathBuf::from("bkjobs.db"),
            log_directory: PathBuf::from("logs"),
            state_file: Some(PathBuf::from("state.json")),
            rpc_bind: SocketAddr::from(([127, 0, 0, 1], 9595)),
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file (if present), `BKJOBS_*` environment
    /// variables and finally any CLI overrides.
    pub fn new<T: Serialize>(path: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BKJOBS_"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.big_file_threshold_kb == 0 {
            anyhow::bail!("big_file_threshold_kb must be greater than zero");
        }

        if !self.encrypted_extensions.is_empty() {
            let key = self
                .encryption_key
                .as_deref()
                .context("encryption_key is required when encrypted_extensions is set")?;
            if key.chars().count() < MIN_KEY_CHARS {
                anyhow::bail!("encryption_key must be at least {MIN_KEY_CHARS} characters");
            }
        }

        Ok(())
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

/// Case-insensitive set of file extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionList(Vec<String>);

impl ExtensionList {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        list.dedup();
        Self(list)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .is_some_and(|e| self.0.contains(&e))
    }
}
