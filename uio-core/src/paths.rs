//! Centralized path configuration for UIO discovery.
//!
//! All sysfs and device node paths go through this module so that discovery
//! can be pointed at a different sysfs mount or a fake tree.

use std::path::{Path, PathBuf};

/// Default sysfs mount point.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Default directory holding the `/dev/uioN` nodes.
pub const DEFAULT_DEV_ROOT: &str = "/dev";

/// Environment variable overriding the sysfs mount point.
pub const SYSFS_ROOT_ENV: &str = "UIO_SYSFS_ROOT";

/// Environment variable overriding the device node directory.
pub const DEV_ROOT_ENV: &str = "UIO_DEV_ROOT";

/// Get the sysfs mount point.
///
/// Resolution order:
/// 1. `UIO_SYSFS_ROOT` environment variable
/// 2. `/sys`
pub fn sysfs_root() -> PathBuf {
    if let Ok(dir) = std::env::var(SYSFS_ROOT_ENV) {
        return PathBuf::from(dir);
    }

    PathBuf::from(DEFAULT_SYSFS_ROOT)
}

/// Get the device node directory.
///
/// Resolution order:
/// 1. `UIO_DEV_ROOT` environment variable
/// 2. `/dev`
pub fn dev_root() -> PathBuf {
    if let Ok(dir) = std::env::var(DEV_ROOT_ENV) {
        return PathBuf::from(dir);
    }

    PathBuf::from(DEFAULT_DEV_ROOT)
}

/// Get the UIO class directory under a sysfs mount point.
pub fn uio_class_dir(sysfs_root: &Path) -> PathBuf {
    sysfs_root.join("class").join("uio")
}

/// Get the region directory of map `index` for a device directory.
pub fn map_dir(device_dir: &Path, index: usize) -> PathBuf {
    device_dir.join("maps").join(format!("map{}", index))
}

/// Serializes tests that modify the process environment.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
