use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kbob_core::models::Field;
use kbob_core::normalize::Normalizer;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Xlsx,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `http://`, `https://` or `file://` location of the dataset.
    pub dataset_url: String,
    #[serde(default = "default_format")]
    pub format: SourceFormat,
    /// Worksheet to read, 0-based, in workbook order.
    #[serde(default)]
    pub sheet_index: usize,
    /// Row holding the column headers, 1-based.
    #[serde(default = "default_header_row")]
    pub header_row: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_link_timeout_secs")]
    pub link_timeout_secs: u64,
    /// Auxiliary source links reported by `/api/kbob/source-status`.
    #[serde(default)]
    pub links: Vec<String>,
    /// Source header → canonical field key.
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

fn default_format() -> SourceFormat {
    SourceFormat::Xlsx
}
fn default_header_row() -> usize {
    1
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_link_timeout_secs() -> u64 {
    10
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_secs(self.link_timeout_secs)
    }

    /// A normalizer carrying the configured column aliases.
    pub fn normalizer(&self) -> Result<Normalizer> {
        let mut normalizer = Normalizer::new();
        for (header, key) in &self.columns {
            let field = Field::from_key(key).with_context(|| {
                format!(
                    "source.columns.\"{}\" maps to unknown field '{}'",
                    header, key
                )
            })?;
            normalizer = normalizer.with_alias(header, field);
        }
        Ok(normalizer)
    }
}

/// What a second `run_ingestion` call does while one is running.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Fail fast with `IngestionInProgress`.
    #[default]
    Reject,
    /// Wait and share the in-flight run's outcome.
    Wait,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Scheduler period; `0` disables scheduled runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
    #[serde(default)]
    pub overlap: OverlapPolicy,
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_startup: true,
            overlap: OverlapPolicy::Reject,
            persist_path: None,
        }
    }
}

/// Longest accepted scheduler period: one year.
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    50
}
fn default_max_page_size() -> usize {
    500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate source
    let url = config.source.dataset_url.as_str();
    if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://"))
    {
        bail!(
            "source.dataset_url must be an http(s):// or file:// URL, got '{}'",
            url
        );
    }
    if config.source.timeout_secs == 0 {
        bail!("source.timeout_secs must be > 0");
    }
    if config.source.link_timeout_secs == 0 {
        bail!("source.link_timeout_secs must be > 0");
    }
    if config.source.header_row == 0 {
        bail!("source.header_row is 1-based and must be >= 1");
    }
    config.source.normalizer()?;

    // Validate ingestion
    if config.ingestion.interval_secs > MAX_INTERVAL_SECS {
        bail!(
            "ingestion.interval_secs must not exceed {} (one year), got {}",
            MAX_INTERVAL_SECS,
            config.ingestion.interval_secs
        );
    }

    // Validate query
    if config.query.default_page_size == 0 {
        bail!("query.default_page_size must be >= 1");
    }
    if config.query.default_page_size > config.query.max_page_size {
        bail!(
            "query.default_page_size ({}) must not exceed query.max_page_size ({})",
            config.query.default_page_size,
            config.query.max_page_size
        );
    }

    Ok(config)
}
