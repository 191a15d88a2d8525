use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Daemon-wide configuration, loaded once at startup from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub tail_service: TailServiceConfig,
    pub indexer: IndexerConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Directory subtree that is indexed and tailed from.
    pub root: PathBuf,
    /// Address the websocket transport upgrade hook listens on.
    pub listen_addr: String,
    /// Per-client bounded outbound queue capacity.
    pub client_buffer_size: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Directory the rolling tracing log is written under.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_log_dir() -> String {
    "./log".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TailServiceConfig {
    /// Tail budget in bytes; 0 disables (follow from current end-of-file only).
    pub bytes: u64,
    /// Per-channel backlog capacity, in lines.
    pub lines: usize,
    pub max_line_size: usize,
    pub poll: bool,
    pub trace: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_true")]
    pub recursive: bool,
    pub poll_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Config {
    /// Load and parse the configuration file, validating that `general.root` exists.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {:?}", path))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("parsing configuration file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let root = &self.general.root;
        let meta = fs::metadata(root)
            .with_context(|| format!("general.root {:?} does not exist", root))?;
        anyhow::ensure!(meta.is_dir(), "general.root {:?} is not a directory", root);
        Ok(())
    }
}
