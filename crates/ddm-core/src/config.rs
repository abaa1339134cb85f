use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/ddm/config.toml`.
///
/// This is intentionally minimal for the initial milestone and will be
/// extended with more tuning parameters (per-host policy, retry policy,
/// bandwidth cap, etc.) in later steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdmConfig {
    /// Maximum total concurrent HTTP connections across all jobs.
    pub max_total_connections: usize,
    /// Maximum concurrent HTTP connections per host.
    pub max_connections_per_host: usize,
    /// Minimum number of segments per job.
    pub min_segments: usize,
    /// Maximum number of segments per job.
    pub max_segments: usize,
    /// Default number of items the queue will run at once.
    #[serde(default = "default_queue_max_concurrent")]
    pub default_queue_max_concurrent: usize,
    /// Default chunk size (bytes) used for the engine's speed probe.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,
}

fn default_queue_max_concurrent() -> usize {
    3
}

fn default_chunk_size() -> u64 {
    256 * 1024
}

impl Default for DdmConfig {
    fn default() -> Self {
        Self {
            max_total_connections: 64,
            max_connections_per_host: 16,
            min_segments: 4,
            max_segments: 16,
            default_queue_max_concurrent: default_queue_max_concurrent(),
            default_chunk_size: default_chunk_size(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
