//! Discovery configuration.
//!
//! Where to look for devices is an explicit value handed to every discovery
//! call; there is no process-wide setter.

use crate::error::{Result, UioError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What discovery does when one device's metadata cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Skip the entry and report it in [`crate::Discovery::skipped`].
    #[default]
    SkipInvalid,
    /// Fail the whole scan on the first bad entry.
    Abort,
}

/// Configuration for device discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// sysfs mount point; devices are enumerated under `<sysfs_root>/class/uio`.
    pub sysfs_root: PathBuf,
    /// Directory holding the device nodes (`<dev_root>/uioN`).
    pub dev_root: PathBuf,
    pub policy: ScanPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(paths::DEFAULT_SYSFS_ROOT),
            dev_root: PathBuf::from(paths::DEFAULT_DEV_ROOT),
            policy: ScanPolicy::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Build a configuration honouring `UIO_SYSFS_ROOT` and `UIO_DEV_ROOT`.
    pub fn from_env() -> Self {
        Self { sysfs_root: paths::sysfs_root(), dev_root: paths::dev_root(), ..Self::default() }
    }

    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| UioError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&content).map_err(|e| UioError::InvalidConfig {
            reason: format!("Failed to parse config {}: {}", path.display(), e),
        })
    }

    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    pub fn with_dev_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dev_root = root.into();
        self
    }

    pub fn with_policy(mut self, policy: ScanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Directory enumerated by discovery.
    pub fn class_dir(&self) -> PathBuf {
        paths::uio_class_dir(&self.sysfs_root)
    }
}
