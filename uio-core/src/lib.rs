//! UIO Core Library
//!
//! Discovery, memory mapping and interrupt handling for Linux userspace-I/O
//! (UIO) devices.
//!
//! ```rust,ignore
//! use uio_core::{find_devices, DiscoveryConfig};
//! use std::time::Duration;
//!
//! let mut device = find_devices(&DiscoveryConfig::from_env())?.into_devices().remove(0);
//! device.open()?;
//! let status = device.region(0).and_then(|r| r.read_u32(0));
//! device.enable_interrupt()?;
//! let outcome = device.wait_interrupt(Duration::from_millis(100))?;
//! device.close()?;
//! ```

pub mod config;
pub mod error;
pub mod paths;

#[cfg(target_os = "linux")]
mod device;
#[cfg(target_os = "linux")]
mod discovery;
#[cfg(target_os = "linux")]
mod irq;
#[cfg(target_os = "linux")]
mod region;
#[cfg(target_os = "linux")]
pub mod sysfs;

// Re-export commonly used items
pub use config::{DiscoveryConfig, ScanPolicy};
pub use error::{ErrorKind, Result, UioError};

#[cfg(target_os = "linux")]
pub use device::{
    is_valid_entry_name, is_valid_uio_name, DeviceId, DeviceInfo, RegionInfo, UioDevice,
};
#[cfg(target_os = "linux")]
pub use discovery::{
    find_device_by_name, find_device_by_number, find_devices, find_devices_by_driver_name,
    Discovery, SkippedEntry,
};
#[cfg(target_os = "linux")]
pub use irq::{Deadline, WaitOutcome, IRQ_WORD_LEN};
#[cfg(target_os = "linux")]
pub use region::{page_size, MapState, Mapping, Region};
