//! TOML configuration for the ingestion pipeline.
//!
//! Tunables are read once into an [`IngestConfig`] and handed to the
//! [`Ingestor`](crate::ingest::Ingestor) explicitly. Nothing in the pipeline
//! reads ambient global settings.
//!
//! ```toml
//! [storage]
//! root = "/var/lib/clipvault"
//!
//! [ingest]
//! auto_detect_links = true
//! auto_archive_urls = false
//! gate_capacity = 12
//!
//! [web]
//! timeout_secs = 60
//! max_redirects = 4
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestOptions,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of the per-item directory tree.
    pub root: PathBuf,
}

/// Behavior switches for new imports.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestOptions {
    /// Replace text representations that hold a bare http(s) URL with a
    /// synthetic URL representation.
    #[serde(default)]
    pub auto_detect_links: bool,
    /// Add a frozen web archive component next to every URL.
    #[serde(default)]
    pub auto_archive_urls: bool,
    /// Upper bound on concurrently running heavy classification bodies.
    #[serde(default = "default_gate_capacity")]
    pub gate_capacity: usize,
    /// Create one item per (source, type identifier) instead of one per source.
    #[serde(default)]
    pub separate_items: bool,
    /// File URLs pull in the referenced file or directory contents.
    #[serde(default)]
    pub read_local_files: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            auto_detect_links: false,
            auto_archive_urls: false,
            gate_capacity: default_gate_capacity(),
            separate_items: false,
            read_local_files: false,
        }
    }
}

fn default_gate_capacity() -> usize {
    crate::gate::DEFAULT_GATE_CAPACITY
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    /// Text payloads larger than this are never inspected for a bare link.
    #[serde(default = "default_max_link_bytes")]
    pub max_link_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            max_link_bytes: default_max_link_bytes(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_max_redirects() -> usize {
    4
}
fn default_user_agent() -> String {
    format!(
        "Mozilla/5.0 (compatible; clipvault/{})",
        env!("CARGO_PKG_VERSION")
    )
}
fn default_accept_language() -> String {
    "en-GB".to_string()
}
fn default_max_link_bytes() -> usize {
    16384
}

impl WebConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl IngestConfig {
    /// Configuration with all defaults rooted at `root`. Mostly useful in tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig { root: root.into() },
            ingest: IngestOptions::default(),
            web: WebConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<IngestConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: IngestConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &IngestConfig) -> Result<()> {
    if config.storage.root.as_os_str().is_empty() {
        anyhow::bail!("storage.root must not be empty");
    }

    if config.ingest.gate_capacity == 0 {
        anyhow::bail!("ingest.gate_capacity must be > 0");
    }

    if config.web.timeout_secs == 0 {
        anyhow::bail!("web.timeout_secs must be > 0");
    }

    if config.web.user_agent.trim().is_empty() {
        anyhow::bail!("web.user_agent must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config("[storage]\nroot = \"/tmp/vault\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/tmp/vault"));
        assert_eq!(config.ingest.gate_capacity, 12);
        assert_eq!(
            config.ingest.gate_capacity,
            crate::gate::DEFAULT_GATE_CAPACITY
        );
        assert!(!config.ingest.auto_detect_links);
        assert!(!config.ingest.auto_archive_urls);
        assert_eq!(config.web.max_redirects, 4);
        assert_eq!(config.web.timeout(), Duration::from_secs(60));
        assert_eq!(config.web.max_link_bytes, 16384);
    }

    #[test]
    fn overrides_are_read() {
        let file = write_config(
            r#"
[storage]
root = "/data"

[ingest]
auto_detect_links = true
auto_archive_urls = true
gate_capacity = 3
separate_items = true

[web]
timeout_secs = 5
user_agent = "test-agent"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert!(config.ingest.auto_detect_links);
        assert!(config.ingest.auto_archive_urls);
        assert!(config.ingest.separate_items);
        assert_eq!(config.ingest.gate_capacity, 3);
        assert_eq!(config.web.timeout_secs, 5);
        assert_eq!(config.web.user_agent, "test-agent");
    }

    #[test]
    fn zero_gate_capacity_is_rejected() {
        let file = write_config("[storage]\nroot = \"/x\"\n[ingest]\ngate_capacity = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("gate_capacity"));
    }

    #[test]
    fn missing_storage_is_a_parse_error() {
        let file = write_config("[ingest]\nauto_detect_links = true\n");
        assert!(load_config(file.path()).is_err());
    }
}
