use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{CrawlOptions, FingerprintMode};
use crate::extract::ExtractorKind;
use crate::search::{BackendKind, BackendSettings, MAX_RESULTS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("invalid config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub catalog: CatalogConfig,
    pub crawl: CrawlConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// SurrealKV directory. Defaults to `<data_dir>/catalog.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrawlConfig {
    pub concurrency: usize,
    pub extract_timeout_secs: u64,
    pub fingerprint: FingerprintMode,
    pub extractor: ExtractorKind,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            extract_timeout_secs: 30,
            fingerprint: FingerprintMode::Path,
            extractor: ExtractorKind::Fs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: BackendKind,
    pub name: String,
    pub url: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_results: usize,
    /// Index directory of the local backend. Defaults to `<data_dir>/index`.
    pub local_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            name: "emc".into(),
            url: "http://localhost:9200".into(),
            batch_size: 500,
            timeout_secs: 30,
            max_results: MAX_RESULTS,
            local_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(default_data_dir())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mc")
}

/// `<config_dir>/mc/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mc").join("config.toml"))
}

impl Config {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            catalog: CatalogConfig::default(),
            crawl: CrawlConfig::default(),
            index: IndexConfig::default(),
        }
    }

    /// Load from `explicit` (which must exist) or from the default location
    /// (which may not).
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                path.to_path_buf()
            }
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;

        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.crawl.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "crawl.concurrency",
                message: "must be at least 1".into(),
            });
        }
        if self.index.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "index.batch_size",
                message: "must be at least 1".into(),
            });
        }
        if self.index.max_results == 0 || self.index.max_results > MAX_RESULTS {
            return Err(ConfigError::Invalid {
                key: "index.max_results",
                message: format!("must be between 1 and {MAX_RESULTS}"),
            });
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("catalog.db"))
    }

    pub fn local_index_path(&self) -> PathBuf {
        self.index
            .local_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("index"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("mc.log")
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index.timeout_secs)
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            concurrency: self.crawl.concurrency,
            extract_timeout: Duration::from_secs(self.crawl.extract_timeout_secs),
            fingerprint: self.crawl.fingerprint,
        }
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            kind: self.index.backend,
            index: self.index.name.clone(),
            url: self.index.url.clone(),
            local_path: Some(self.local_index_path()),
            timeout: self.index_timeout(),
        }
    }
}
