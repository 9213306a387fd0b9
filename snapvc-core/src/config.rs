//! Repository configuration
//!
//! Stored at `<repo>/config.json`. Every field has a default so a missing
//! file, or a file written by an older version, still loads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which branch heads a backup captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupScope {
    #[default]
    PrimaryBranch,
    AllBranches,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Branch used for a content item's first commit when none is named
    pub default_branch: String,
    /// Days a backup stays restorable
    pub backup_retention_days: u32,
    pub backup_scope: BackupScope,
    /// Cached diffs; zero disables the cache
    pub diff_cache_capacity: usize,
    /// Period of the scheduled-backup loop
    pub scheduled_backup_interval_secs: u64,
    pub hooks_enabled: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            backup_retention_days: 30,
            backup_scope: BackupScope::PrimaryBranch,
            diff_cache_capacity: 256,
            scheduled_backup_interval_secs: 3600,
            hooks_enabled: true,
        }
    }
}

impl RepositoryConfig {
    /// Load config from a repository path.
    pub fn load(repo_path: &Path) -> Result<Self> {
        let config_path = repo_path.join("config.json");
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        let config: RepositoryConfig =
            serde_json::from_str(&data).with_context(|| "Failed to parse config JSON")?;
        crate::branch::validate_branch_name(&config.default_branch)
            .with_context(|| "Invalid default_branch in config")?;
        Ok(config)
    }

    /// Save config to a repository path.
    pub fn save(&self, repo_path: &Path) -> Result<()> {
        let config_path = repo_path.join("config.json");
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }
}
