use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Patterns ignored by a freshly initialized repository.
pub const DEFAULT_IGNORE: [&str; 3] = ["*.blend1", "*.blend@", "__pycache__"];

/// Repository configuration stored in `.DFM/config.toml`.
///
/// Every section is optional on disk; missing keys take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Identity used when no user is given explicitly.
    pub user: UserConfig,
    /// Working tree and mutex settings.
    pub core: CoreConfig,
    /// Garbage collection settings.
    pub gc: GcConfig,
    /// Stash behaviour.
    pub stash: StashConfig,
    /// Advisory lock defaults.
    pub locks: LockConfig,
    /// Compare scratch location.
    pub compare: CompareConfig,
}

/// `[user]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Default author and lock owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `[core]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Glob-style patterns excluded from status, add and stash.
    pub ignore: Vec<String>,
    /// Seconds to wait for the repository mutex before giving up.
    pub lock_timeout_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ignore: DEFAULT_IGNORE.iter().map(|p| (*p).to_string()).collect(),
            lock_timeout_secs: 30,
        }
    }
}

/// `[gc]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Reflog entries younger than this keep their commits alive.
    pub reflog_expire_days: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            reflog_expire_days: 90,
        }
    }
}

/// What `stash apply` does when the working tree diverged from the stash base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StashConflictPolicy {
    /// Refuse and report every conflicting path.
    #[default]
    Fail,
    /// Write the stashed content regardless.
    Overwrite,
}

/// `[stash]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Conflict handling for apply and pop.
    pub conflict: StashConflictPolicy,
}

/// `[locks]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Expiry applied when a lock is taken without one; 0 means never.
    pub default_expire_hours: u32,
}

/// `[compare]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Root for compare scratch directories, replacing `.DFM/compare`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Reads and writes `config.toml` inside a `.DFM` directory.
pub struct ConfigStore {
    /// Path to the configuration file.
    path: PathBuf,
}

impl ConfigStore {
    /// File name of the configuration within `.DFM`.
    pub const FILE_NAME: &'static str = "config.toml";

    /// Create a store for the given `.DFM` directory.
    pub fn new(dfm_dir: &Path) -> Self {
        Self {
            path: dfm_dir.join(Self::FILE_NAME),
        }
    }

    /// Load the configuration, falling back to defaults when the file is absent.
    pub fn load(&self) -> Result<RepoConfig> {
        if !self.path.exists() {
            return Ok(RepoConfig::default());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file {}", self.path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", self.path.display()))?;
        Ok(config)
    }

    /// Persist the configuration.
    pub fn save(&self, config: &RepoConfig) -> Result<()> {
        let encoded = toml::to_string(config).context("Failed to encode configuration")?;
        fs::write(&self.path, encoded)
            .with_context(|| format!("Failed to write config file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_config_uses_defaults() {
        let tmp = tempdir().unwrap();
        let config = ConfigStore::new(tmp.path()).load().unwrap();

        assert_eq!(config.core.lock_timeout_secs, 30);
        assert_eq!(config.gc.reflog_expire_days, 90);
        assert_eq!(config.stash.conflict, StashConflictPolicy::Fail);
        assert!(config.core.ignore.iter().any(|p| p == "*.blend1"));
    }

    #[test]
    fn config_round_trip() {
        let tmp = tempdir().unwrap();
        let store = ConfigStore::new(tmp.path());

        let mut config = RepoConfig::default();
        config.user.name = Some("ana".to_string());
        config.stash.conflict = StashConflictPolicy::Overwrite;
        config.compare.dir = Some(PathBuf::from("/tmp/compare"));

        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join(ConfigStore::FILE_NAME),
            "[stash]\nconflict = \"overwrite\"\n",
        )
        .unwrap();

        let config = ConfigStore::new(tmp.path()).load().unwrap();
        assert_eq!(config.stash.conflict, StashConflictPolicy::Overwrite);
        assert_eq!(config.core.lock_timeout_secs, 30);
    }

    #[test]
    fn malformed_config_reports_path() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join(ConfigStore::FILE_NAME), "[core\n").unwrap();

        let err = ConfigStore::new(tmp.path()).load().unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
