use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub base_url: String,
    pub port: u16,
    /// Honor the `x-test-now-ms` request header.
    #[serde(default)]
    pub test_mode: bool,
    pub storage: Storage,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
    pub kind: StorageKind,
    pub file: Option<FileStorage>,
    pub sql: Option<SqlStorage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileStorage {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlStorage {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    File,
    Sql,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    /// Run housekeeping this often while serving. Disabled when unset.
    pub purge_interval_secs: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_upload_size: default_max_upload_size(),
            health_timeout_ms: default_health_timeout_ms(),
            purge_interval_secs: None,
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_upload_size() -> usize {
    1024 * 1024
}

fn default_health_timeout_ms() -> u64 {
    2000
}

impl Config {
    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(text).context("failed to deserialize config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self.storage.kind {
            StorageKind::Memory => {}
            StorageKind::File => {
                self.storage
                    .file
                    .as_ref()
                    .context("storage.kind is \"file\" but [storage.file] is missing")?;
            }
            StorageKind::Sql => {
                self.storage
                    .sql
                    .as_ref()
                    .context("storage.kind is \"sql\" but [storage.sql] is missing")?;
            }
        }
        Ok(())
    }

    /// Retrieval URL for a paste id.
    pub fn paste_url(&self, id: &str) -> String {
        format!("{}/p/{id}", self.base_url.trim_end_matches('/'))
    }
}
