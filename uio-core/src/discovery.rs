//! UIO device discovery.
//!
//! Scans `<sysfs_root>/class/uio` and builds one [`UioDevice`] per entry.

use crate::config::{DiscoveryConfig, ScanPolicy};
use crate::device::{is_valid_entry_name, UioDevice};
use crate::error::{Result, UioError};
use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use tracing::{debug, instrument, warn};

/// An entry that was present but could not be turned into a device.
#[derive(Debug)]
pub struct SkippedEntry {
    pub name: String,
    pub error: UioError,
}

/// Result of a discovery scan.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Devices in lexicographic order of their entry names.
    pub devices: Vec<UioDevice>,
    /// Entries skipped under [`ScanPolicy::SkipInvalid`].
    pub skipped: Vec<SkippedEntry>,
}

impl Discovery {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UioDevice> {
        self.devices.iter()
    }

    pub fn into_devices(self) -> Vec<UioDevice> {
        self.devices
    }
}

impl IntoIterator for Discovery {
    type Item = UioDevice;
    type IntoIter = std::vec::IntoIter<UioDevice>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

/// Find all UIO devices.
///
/// Fails if the class directory cannot be enumerated. An empty directory is
/// a successful scan with no devices.
#[instrument(skip(config), fields(sysfs_root = %config.sysfs_root.display()))]
pub fn find_devices(config: &DiscoveryConfig) -> Result<Discovery> {
    let class_dir = config.class_dir();

    let mut names = Vec::new();
    for entry in
        fs::read_dir(&class_dir).map_err(|e| UioError::IoError { path: class_dir.clone(), source: e })?
    {
        let entry = entry.map_err(|e| UioError::IoError { path: class_dir.clone(), source: e })?;
        let name = entry.file_name();
        if name.as_bytes().starts_with(b".") {
            continue;
        }
        names.push(name);
    }
    names.sort();

    let mut devices = Vec::new();
    devices
        .try_reserve_exact(names.len())
        .map_err(|_| UioError::OutOfMemory { requested: names.len() })?;
    let mut skipped = Vec::new();

    for raw in names {
        let (name, result) = match raw.into_string() {
            Ok(name) => {
                let result = UioDevice::from_sysfs(&class_dir, &name, &config.dev_root);
                (name, result)
            }
            Err(raw) => (raw.to_string_lossy().into_owned(), Err(non_utf8_entry(&class_dir, raw))),
        };

        match result {
            Ok(device) => devices.push(device),
            Err(error) => match config.policy {
                ScanPolicy::Abort => return Err(error),
                ScanPolicy::SkipInvalid => {
                    warn!(entry = %name, error = %error, "Skipping unreadable UIO device");
                    skipped.push(SkippedEntry { name, error });
                }
            },
        }
    }

    debug!(found = devices.len(), skipped = skipped.len(), "UIO discovery complete");

    Ok(Discovery { devices, skipped })
}

fn non_utf8_entry(class_dir: &std::path::Path, raw: OsString) -> UioError {
    UioError::InvalidAttribute {
        path: class_dir.join(raw),
        reason: "entry name is not valid UTF-8".to_string(),
    }
}

/// Find a device by entry name, e.g. `uio3`.
///
/// Any name [`find_devices`] can return is accepted, including entries that
/// do not follow the `uioN` pattern.
pub fn find_device_by_name(config: &DiscoveryConfig, uio_name: &str) -> Result<UioDevice> {
    if !is_valid_entry_name(uio_name) {
        return Err(UioError::invalid(format!("Invalid UIO device name: {:?}", uio_name)));
    }

    UioDevice::from_sysfs(&config.class_dir(), uio_name, &config.dev_root)
}

/// Find device `uio<number>`.
pub fn find_device_by_number(config: &DiscoveryConfig, number: u32) -> Result<UioDevice> {
    find_device_by_name(config, &format!("uio{}", number))
}

/// Find all devices whose driver-supplied name equals `name`.
pub fn find_devices_by_driver_name(config: &DiscoveryConfig, name: &str) -> Result<Vec<UioDevice>> {
    let found: Vec<UioDevice> =
        find_devices(config)?.into_iter().filter(|d| d.name() == name).collect();

    if found.is_empty() {
        return Err(UioError::DeviceNotFound { name: name.to_string() });
    }
    Ok(found)
}
