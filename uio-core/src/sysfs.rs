//! Readers for the attributes the kernel exports under `/sys/class/uio`.
//!
//! Layout consumed per device directory:
//!
//! ```text
//! uioN/
//! ├── name          driver-supplied device name
//! ├── version       driver version string
//! ├── dev           "MAJOR:MINOR"
//! └── maps/
//!     ├── map0/{addr,size,offset,name}
//!     └── map1/...
//! ```

use crate::device::DeviceId;
use crate::error::{Result, UioError};
use crate::paths;
use crate::region::Region;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Read a required attribute, trimming the trailing newline.
pub fn read_attr(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| UioError::IoError { path: path.to_path_buf(), source: e })
}

/// Read an attribute that older kernels or drivers may not provide.
pub fn read_optional_attr(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse a numeric attribute. Accepts `0x`-prefixed hex or plain decimal.
pub fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Parse a `dev` attribute of the form `MAJOR:MINOR`.
pub fn parse_devid(text: &str) -> Option<DeviceId> {
    let (major, minor) = text.trim().split_once(':')?;
    Some(DeviceId::new(major.parse().ok()?, minor.parse().ok()?))
}

/// Read and parse a required numeric attribute.
pub fn read_u64_attr(path: &Path) -> Result<u64> {
    let text = read_attr(path)?;
    parse_u64(&text).ok_or_else(|| UioError::InvalidAttribute {
        path: path.to_path_buf(),
        reason: format!("expected a number, got {:?}", text),
    })
}

/// Read the `dev` attribute of a device directory.
pub fn read_devid(device_dir: &Path) -> Result<DeviceId> {
    let path = device_dir.join("dev");
    let text = read_attr(&path)?;
    parse_devid(&text).ok_or_else(|| UioError::InvalidAttribute {
        path,
        reason: format!("expected MAJOR:MINOR, got {:?}", text),
    })
}

/// Read a single region description from `maps/mapN`.
pub fn read_region(map_dir: &Path, index: usize) -> Result<Region> {
    let size = read_u64_attr(&map_dir.join("size"))?;
    let addr = read_u64_attr(&map_dir.join("addr"))?;
    let page_offset = match read_optional_attr(&map_dir.join("offset")) {
        Some(text) => parse_u64(&text).ok_or_else(|| UioError::InvalidAttribute {
            path: map_dir.join("offset"),
            reason: format!("expected a number, got {:?}", text),
        })?,
        None => 0,
    };
    let name = read_optional_attr(&map_dir.join("name"));

    let size = usize::try_from(size).map_err(|_| UioError::InvalidAttribute {
        path: map_dir.join("size"),
        reason: format!("size {:#x} does not fit the address space", size),
    })?;

    Ok(Region::new(index, size, addr).with_name(name).with_page_offset(page_offset as usize))
}

/// Read all regions of a device. Regions are numbered contiguously from
/// `map0`; the first missing index ends the list.
pub fn read_regions(device_dir: &Path) -> Result<Vec<Region>> {
    let mut regions = Vec::new();

    loop {
        let map_dir = paths::map_dir(device_dir, regions.len());
        if !map_dir.is_dir() {
            break;
        }
        regions.push(read_region(&map_dir, regions.len())?);
    }

    debug!(device = %device_dir.display(), regions = regions.len(), "Read UIO regions");

    Ok(regions)
}
