use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CairnError, CairnResult};

/// Repository configuration (loaded from `<repo>/cairn.toml` when present)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub dedup: DedupConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Fixed block size used by the block index and sequence finder
    pub block_size: u64,
    /// Shortest run of matching blocks worth turning into a recipe piece
    pub min_match_blocks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Use the bloblist cache when the repository has a stable identifier
    pub enabled: bool,
    /// Directory holding cache databases (default: OS temp dir)
    pub dir: Option<PathBuf>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            min_match_blocks: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl CairnConfig {
    /// Parse a TOML document and check the values make sense.
    pub fn from_toml(text: &str) -> CairnResult<Self> {
        let config: CairnConfig =
            toml::from_str(text).map_err(|e| CairnError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> CairnResult<Self> {
        if !path.exists() {
            return Ok(CairnConfig::default());
        }
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading config");
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> CairnResult<()> {
        if self.dedup.block_size == 0 {
            return Err(CairnError::Config("dedup.block_size must be positive".into()));
        }
        if self.dedup.min_match_blocks == 0 {
            return Err(CairnError::Config(
                "dedup.min_match_blocks must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
