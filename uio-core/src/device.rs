//! UIO device handle.
//!
//! A [`UioDevice`] carries the identity of one device and its regions, and
//! owns the open device node and region mappings between [`UioDevice::open`]
//! and [`UioDevice::close`].

use crate::error::{Result, UioError};
use crate::region::{MapState, Region};
use crate::sysfs;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, instrument, warn};

/// UIO device directory names: uio0, uio1, ...
static UIO_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^uio(\d+)$").expect("Invalid UIO name regex"));

/// Device number of a character device (major/minor pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn new(major: u32, minor: u32) -> Self {
        Self(libc::makedev(major, minor) as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn major(self) -> u32 {
        libc::major(self.0 as libc::dev_t) as u32
    }

    pub fn minor(self) -> u32 {
        libc::minor(self.0 as libc::dev_t) as u32
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Check whether `name` looks like a UIO device entry (`uioN`).
pub fn is_valid_uio_name(name: &str) -> bool {
    UIO_NAME_REGEX.is_match(name)
}

/// Check whether `name` can be a class directory entry: a single path
/// component that is not hidden.
pub fn is_valid_entry_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\0'])
}

/// Known metadata for one region of a [`DeviceInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionInfo {
    pub size: usize,
    /// Physical (bus) address.
    pub addr: u64,
    pub name: Option<String>,
    /// Byte offset of `addr` within its page.
    pub page_offset: usize,
}

impl RegionInfo {
    pub fn new(size: usize, addr: u64) -> Self {
        Self { size, addr, ..Default::default() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_page_offset(mut self, page_offset: usize) -> Self {
        self.page_offset = page_offset;
        self
    }
}

/// Known metadata for building a [`UioDevice`] without reading sysfs.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Entry name, e.g. `uio0`.
    pub uio_name: String,
    /// Driver-supplied device name.
    pub name: String,
    pub version: String,
    pub dev_path: PathBuf,
    pub devid: DeviceId,
    /// Regions in index order.
    pub regions: Vec<RegionInfo>,
}

/// Handle for one UIO device.
///
/// Constructed closed. Not `Clone`: an open handle exclusively owns its
/// descriptor and mappings. Dropping an open handle releases both.
pub struct UioDevice {
    uio_name: String,
    name: String,
    version: String,
    dev_path: PathBuf,
    devid: DeviceId,
    sysfs_path: Option<PathBuf>,
    regions: Vec<Region>,
    file: Option<File>,
}

impl UioDevice {
    /// Build a closed handle from known metadata.
    pub fn new(info: DeviceInfo) -> Self {
        let regions = info
            .regions
            .into_iter()
            .enumerate()
            .map(|(index, r)| {
                Region::new(index, r.size, r.addr)
                    .with_name(r.name)
                    .with_page_offset(r.page_offset)
            })
            .collect();

        Self {
            uio_name: info.uio_name,
            name: info.name,
            version: info.version,
            dev_path: info.dev_path,
            devid: info.devid,
            sysfs_path: None,
            regions,
            file: None,
        }
    }

    /// Read a device from `class_dir/<entry>`; its node is `dev_root/<entry>`.
    pub fn from_sysfs(class_dir: &Path, entry: &str, dev_root: &Path) -> Result<Self> {
        let sysfs_path = class_dir.join(entry);
        if !sysfs_path.is_dir() {
            return Err(UioError::DeviceNotFound { name: entry.to_string() });
        }

        let name = sysfs::read_attr(&sysfs_path.join("name"))?;
        let version = sysfs::read_attr(&sysfs_path.join("version"))?;
        let devid = sysfs::read_devid(&sysfs_path)?;
        let regions = sysfs::read_regions(&sysfs_path)?;
        let dev_path = dev_root.join(entry);

        debug!(
            device = %entry,
            name = %name,
            version = %version,
            devid = %devid,
            regions = regions.len(),
            "Read UIO device info"
        );

        Ok(Self {
            uio_name: entry.to_string(),
            name,
            version,
            dev_path,
            devid,
            sysfs_path: Some(sysfs_path),
            regions,
            file: None,
        })
    }

    /// Entry name, e.g. `uio0`.
    pub fn uio_name(&self) -> &str {
        &self.uio_name
    }

    /// The `N` of `uioN`, when the entry follows the kernel naming.
    pub fn number(&self) -> Option<u32> {
        UIO_NAME_REGEX.captures(&self.uio_name).and_then(|c| c[1].parse().ok())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dev_path(&self) -> &Path {
        &self.dev_path
    }

    pub fn devid(&self) -> DeviceId {
        self.devid
    }

    pub fn major(&self) -> u32 {
        self.devid.major()
    }

    pub fn minor(&self) -> u32 {
        self.devid.minor()
    }

    /// sysfs directory this handle was read from.
    pub fn sysfs_path(&self) -> Option<&Path> {
        self.sysfs_path.as_deref()
    }

    /// Number of regions. Fixed for the lifetime of the handle.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn region_mut(&mut self, index: usize) -> Option<&mut Region> {
        self.regions.get_mut(index)
    }

    pub fn region_size(&self, index: usize) -> Option<usize> {
        self.region(index).map(Region::size)
    }

    pub fn region_offset(&self, index: usize) -> Option<usize> {
        self.region(index).map(Region::offset)
    }

    pub fn region_addr(&self, index: usize) -> Option<u64> {
        self.region(index).map(Region::addr)
    }

    /// Start of region `index`'s mapping, if the device is open and it mapped.
    pub fn region_map(&self, index: usize) -> Option<NonNull<u8>> {
        self.region(index).and_then(Region::as_ptr)
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Open the device node and try to map every region.
    ///
    /// Succeeds once the node is open; each region records its own mapping
    /// outcome, so check [`Region::is_mapped`] before use.
    #[instrument(skip(self), fields(device = %self.uio_name))]
    pub fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Err(UioError::invalid(format!("{} is already open", self.uio_name)));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.dev_path)
            .map_err(|e| UioError::IoError { path: self.dev_path.clone(), source: e })?;

        for region in &mut self.regions {
            region.map_from(file.as_fd());
        }

        debug!(
            path = %self.dev_path.display(),
            mapped = self.regions.iter().filter(|r| r.is_mapped()).count(),
            regions = self.regions.len(),
            "Opened UIO device"
        );

        self.file = Some(file);
        Ok(())
    }

    /// Unmap every region and release the device node.
    ///
    /// Every region is released and the node closed even if an unmap fails;
    /// the first `munmap` error is returned.
    #[instrument(skip(self), fields(device = %self.uio_name))]
    pub fn close(&mut self) -> Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| UioError::invalid(format!("{} is not open", self.uio_name)))?;

        let mut first_error = None;
        for region in &mut self.regions {
            if let Err(e) = region.release() {
                warn!(region = region.index(), error = %e, "munmap failed");
                first_error.get_or_insert(e);
            }
        }
        drop(file);

        debug!("Closed UIO device");
        match first_error {
            Some(source) => Err(UioError::Os { operation: "munmap", source }),
            None => Ok(()),
        }
    }

    /// Map (or remap) a single region of an open device.
    pub fn map_region(&mut self, index: usize) -> Result<()> {
        let fd = self.file.as_ref().ok_or_else(|| self.not_open())?.as_fd();
        let count = self.regions.len();
        let region = self.regions.get_mut(index).ok_or_else(|| {
            UioError::invalid(format!("region {} out of range ({} regions)", index, count))
        })?;

        region.map_from(fd);
        match region.state() {
            MapState::Failed(errno) => Err(UioError::Os {
                operation: "mmap",
                source: std::io::Error::from_raw_os_error(*errno),
            }),
            _ => Ok(()),
        }
    }

    /// Unmap a single region of an open device.
    pub fn unmap_region(&mut self, index: usize) -> Result<()> {
        if self.file.is_none() {
            return Err(self.not_open());
        }
        let count = self.regions.len();
        let region = self.regions.get_mut(index).ok_or_else(|| {
            UioError::invalid(format!("region {} out of range ({} regions)", index, count))
        })?;
        region.release().map_err(|source| UioError::Os { operation: "munmap", source })
    }

    pub(crate) fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or_else(|| self.not_open())
    }

    pub(crate) fn fd(&self) -> Result<BorrowedFd<'_>> {
        self.file().map(|file| file.as_fd())
    }

    fn not_open(&self) -> UioError {
        UioError::invalid(format!("{} is not open", self.uio_name))
    }
}

impl fmt::Debug for UioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UioDevice")
            .field("uio_name", &self.uio_name)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dev_path", &self.dev_path)
            .field("devid", &self.devid)
            .field("regions", &self.regions)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for UioDevice {
    fn drop(&mut self) {
        if self.file.is_some() {
            debug!(device = %self.uio_name, "Dropping open UIO device, releasing mappings");
            for region in &mut self.regions {
                if let Err(e) = region.release() {
                    debug!(region = region.index(), error = %e, "munmap failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{page_size, Mapping};
    use std::os::fd::AsRawFd;

    fn device_with_node(dir: &Path, regions: Vec<(usize, u64)>) -> UioDevice {
        let regions = regions.into_iter().map(|(size, addr)| RegionInfo::new(size, addr)).collect();
        let dev_path = dir.join("uio0");
        std::fs::write(&dev_path, vec![0u8; 4 * page_size()]).unwrap();
        UioDevice::new(DeviceInfo {
            uio_name: "uio0".to_string(),
            name: "test".to_string(),
            version: "1.0".to_string(),
            dev_path,
            devid: DeviceId::new(243, 0),
            regions,
        })
    }

    #[test]
    fn test_uio_name_validation() {
        assert!(is_valid_uio_name("uio0"));
        assert!(is_valid_uio_name("uio12"));
        assert!(!is_valid_uio_name("uio"));
        assert!(!is_valid_uio_name("uio1a"));
        assert!(!is_valid_uio_name("../uio0"));
    }

    #[test]
    fn test_entry_name_validation() {
        assert!(is_valid_entry_name("uio0"));
        assert!(is_valid_entry_name("fpga-uio"));
        assert!(!is_valid_entry_name(""));
        assert!(!is_valid_entry_name("."));
        assert!(!is_valid_entry_name(".."));
        assert!(!is_valid_entry_name(".hidden"));
        assert!(!is_valid_entry_name("../uio0"));
        assert!(!is_valid_entry_name("uio0/maps"));
    }

    #[test]
    fn test_device_id_split() {
        let id = DeviceId::new(243, 5);
        assert_eq!(id.major(), 243);
        assert_eq!(id.minor(), 5);
        assert_eq!(DeviceId::from_raw(id.raw()), id);
        assert_eq!(id.to_string(), "243:5");
    }

    #[test]
    fn test_accessors_in_and_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let device = device_with_node(dir.path(), vec![(4096, 0x1000), (8192, 0x4000)]);

        assert_eq!(device.region_count(), 2);
        assert_eq!(device.number(), Some(0));
        assert_eq!(device.major(), 243);
        assert_eq!(device.region_size(1), Some(8192));
        assert_eq!(device.region_offset(1), Some(1));
        assert_eq!(device.region_addr(0), Some(0x1000));
        assert_eq!(device.region_map(0), None);

        assert_eq!(device.region_size(2), None);
        assert_eq!(device.region_offset(2), None);
        assert_eq!(device.region_addr(2), None);
        assert_eq!(device.region_map(2), None);
        assert!(device.region(usize::MAX).is_none());
    }

    #[test]
    fn test_open_close_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        // Region 1 has zero size and cannot map.
        let mut device = device_with_node(dir.path(), vec![(page_size(), 0), (0, 0)]);

        device.open().unwrap();
        assert!(device.is_open());
        assert!(device.region(0).unwrap().is_mapped());
        assert!(device.region(1).unwrap().map_error().is_some());

        device.close().unwrap();
        assert!(!device.is_open());
        for region in device.regions() {
            assert!(matches!(region.state(), MapState::Unmapped));
        }
        assert_eq!(device.region_count(), 2);
    }

    #[test]
    fn test_close_never_opened() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_node(dir.path(), vec![(4096, 0)]);

        let err = device.close().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_open_twice_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_node(dir.path(), vec![(4096, 0)]);

        device.open().unwrap();
        assert_eq!(device.open().unwrap_err().kind(), crate::ErrorKind::InvalidArgument);
        device.close().unwrap();
        assert_eq!(device.close().unwrap_err().kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_open_missing_node() {
        let mut device = UioDevice::new(DeviceInfo {
            uio_name: "uio9".to_string(),
            dev_path: PathBuf::from("/nonexistent/uio9"),
            regions: vec![RegionInfo::new(4096, 0)],
            ..Default::default()
        });

        let err = device.open().unwrap_err();
        assert!(matches!(err, UioError::IoError { .. }));
        assert!(!device.is_open());
        assert!(!device.region(0).unwrap().is_mapped());
    }

    #[test]
    fn test_single_region_map_unmap() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_node(dir.path(), vec![(page_size(), 0)]);

        assert!(device.map_region(0).is_err());

        device.open().unwrap();
        device.unmap_region(0).unwrap();
        assert!(device.region_map(0).is_none());
        device.map_region(0).unwrap();
        assert!(device.region_map(0).is_some());
        assert!(device.map_region(1).is_err());
        device.close().unwrap();
    }

    #[test]
    fn test_mapping_is_shared_with_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_node(dir.path(), vec![(page_size(), 0)]);

        device.open().unwrap();
        device.region_mut(0).unwrap().write_u32(8, 0x1234_5678).unwrap();
        device.close().unwrap();

        let contents = std::fs::read(dir.path().join("uio0")).unwrap();
        assert_eq!(&contents[8..12], &0x1234_5678u32.to_ne_bytes());
    }

    #[test]
    fn test_region_info_carries_name_and_page_offset() {
        let device = UioDevice::new(DeviceInfo {
            uio_name: "uio0".to_string(),
            regions: vec![
                RegionInfo::new(4096, 0xfe00_0000).with_name("regs").with_page_offset(0x80),
                RegionInfo::new(8192, 0),
            ],
            ..Default::default()
        });

        let regs = device.region(0).unwrap();
        assert_eq!(regs.name(), Some("regs"));
        assert_eq!(regs.page_offset(), 0x80);
        assert_eq!(regs.addr(), 0xfe00_0000);

        let second = device.region(1).unwrap();
        assert_eq!(second.name(), None);
        assert_eq!(second.page_offset(), 0);
        assert_eq!(second.offset(), 1);
    }

    #[test]
    fn test_close_reports_unmap_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_node(dir.path(), vec![(page_size(), 0), (page_size(), 0)]);

        device.open().unwrap();
        let real = device
            .region_mut(0)
            .unwrap()
            .replace_state(MapState::Mapped(Mapping::misaligned(page_size())));
        drop(real);

        let err = device.close().unwrap_err();
        assert!(matches!(err, UioError::Os { operation: "munmap", .. }));
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

        assert!(!device.is_open());
        for region in device.regions() {
            assert!(matches!(region.state(), MapState::Unmapped));
        }
    }

    #[test]
    fn test_unmap_region_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_node(dir.path(), vec![(page_size(), 0)]);

        device.open().unwrap();
        drop(
            device
                .region_mut(0)
                .unwrap()
                .replace_state(MapState::Mapped(Mapping::misaligned(page_size()))),
        );

        let err = device.unmap_region(0).unwrap_err();
        assert!(matches!(err, UioError::Os { operation: "munmap", .. }));
        assert!(device.is_open());
        device.close().unwrap();
    }

    #[test]
    fn test_drop_releases_descriptor_and_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_node(dir.path(), vec![(page_size(), 0)]);

        device.open().unwrap();
        let fd = device.fd().unwrap().as_raw_fd();
        let map = device.region_map(0).unwrap();
        drop(device);

        // SAFETY: F_GETFD only inspects the descriptor table.
        let ret = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        let fcntl_err = std::io::Error::last_os_error();
        // SAFETY: msync on an unmapped range fails with ENOMEM and touches nothing.
        let synced = unsafe { libc::msync(map.as_ptr().cast(), page_size(), libc::MS_ASYNC) };
        let msync_err = std::io::Error::last_os_error();

        assert_eq!(ret, -1);
        assert_eq!(fcntl_err.raw_os_error(), Some(libc::EBADF));
        assert_eq!(synced, -1);
        assert_eq!(msync_err.raw_os_error(), Some(libc::ENOMEM));
    }
}
