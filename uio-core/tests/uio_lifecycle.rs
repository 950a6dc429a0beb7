//! Integration tests for discovery and the device lifecycle.
//!
//! These tests build a fake sysfs tree and device nodes in a temp directory:
//! - regular files stand in for `/dev/uioN` when mapping is exercised
//! - FIFOs stand in for `/dev/uioN` when interrupts are exercised

#![cfg(target_os = "linux")]

use nix::sys::stat::Mode;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use uio_core::{
    find_devices, page_size, paths, Deadline, DiscoveryConfig, ErrorKind, MapState, WaitOutcome,
};

/// Fake sysfs + /dev layout rooted in a temp directory.
struct FakeUio {
    root: TempDir,
}

impl FakeUio {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(paths::uio_class_dir(&root.path().join("sys"))).unwrap();
        fs::create_dir_all(root.path().join("dev")).unwrap();
        Self { root }
    }

    fn config(&self) -> DiscoveryConfig {
        DiscoveryConfig::default()
            .with_sysfs_root(self.root.path().join("sys"))
            .with_dev_root(self.root.path().join("dev"))
    }

    fn add_device(&self, entry: &str, name: &str, minor: u32, sizes: &[usize]) {
        let dir = paths::uio_class_dir(&self.root.path().join("sys")).join(entry);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
        fs::write(dir.join("version"), "1.2\n").unwrap();
        fs::write(dir.join("dev"), format!("243:{}\n", minor)).unwrap();

        for (index, size) in sizes.iter().enumerate() {
            let map = paths::map_dir(&dir, index);
            fs::create_dir_all(&map).unwrap();
            fs::write(map.join("name"), format!("map{}\n", index)).unwrap();
            fs::write(map.join("addr"), format!("{:#x}\n", 0xfe20_0000u64 + index as u64 * 0x10000)).unwrap();
            fs::write(map.join("size"), format!("{:#x}\n", size)).unwrap();
            fs::write(map.join("offset"), "0x0\n").unwrap();
        }
    }

    fn add_file_node(&self, entry: &str, len: usize) {
        fs::write(self.dev_node(entry), vec![0u8; len]).unwrap();
    }

    fn add_fifo_node(&self, entry: &str) {
        nix::unistd::mkfifo(&self.dev_node(entry), Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
    }

    fn dev_node(&self, entry: &str) -> std::path::PathBuf {
        self.root.path().join("dev").join(entry)
    }
}

#[test]
fn test_end_to_end_two_devices() {
    let fake = FakeUio::new();
    fake.add_device("uio1", "dma-engine", 1, &[4096, 8192]);
    fake.add_device("uio0", "timer", 0, &[4096]);
    fake.add_file_node("uio0", page_size().max(4096));

    let found = find_devices(&fake.config()).unwrap();
    assert!(found.skipped.is_empty());
    let mut devices = found.into_devices();
    assert_eq!(devices.len(), 2);

    assert_eq!(devices[0].uio_name(), "uio0");
    assert_eq!(devices[0].name(), "timer");
    assert_eq!(devices[0].version(), "1.2");
    assert_eq!(devices[0].region_count(), 1);

    assert_eq!(devices[1].uio_name(), "uio1");
    assert_eq!(devices[1].minor(), 1);
    assert_eq!(devices[1].region_count(), 2);
    assert_eq!(devices[1].region_size(0), Some(4096));
    assert_eq!(devices[1].region_size(1), Some(8192));
    assert_eq!(devices[1].region_offset(0), Some(0));
    assert_eq!(devices[1].region_offset(1), Some(1));
    assert_eq!(devices[1].region_addr(1), Some(0xfe21_0000));
    assert_eq!(devices[1].region(1).unwrap().name(), Some("map1"));

    let uio0 = &mut devices[0];
    uio0.open().unwrap();
    let region = uio0.region(0).unwrap();
    assert!(region.is_mapped());
    assert_eq!(region.as_slice().unwrap().len(), 4096);
    assert!(uio0.region_map(0).is_some());

    uio0.close().unwrap();
    assert!(!uio0.is_open());
    assert!(matches!(uio0.region(0).unwrap().state(), MapState::Unmapped));
    assert!(uio0.region_map(0).is_none());
}

#[test]
fn test_inaccessible_root_fails() {
    let config = DiscoveryConfig::default().with_sysfs_root("/nonexistent/sysfs");
    let err = find_devices(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_empty_root_succeeds() {
    let fake = FakeUio::new();
    let found = find_devices(&fake.config()).unwrap();
    assert!(found.is_empty());
    assert!(found.skipped.is_empty());
}

#[test]
fn test_open_close_with_failed_regions() {
    let fake = FakeUio::new();
    fake.add_device("uio0", "fifo-backed", 0, &[4096, 4096]);
    fake.add_fifo_node("uio0");

    let mut device = find_devices(&fake.config()).unwrap().into_devices().remove(0);
    device.open().unwrap();
    assert!(device.is_open());
    for region in device.regions() {
        assert!(!region.is_mapped());
        assert!(region.map_error().is_some());
    }

    device.close().unwrap();
    for region in device.regions() {
        assert!(matches!(region.state(), MapState::Unmapped));
    }
    assert_eq!(device.close().unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_interrupt_round_trip() {
    let fake = FakeUio::new();
    fake.add_device("uio0", "irq-only", 0, &[]);
    fake.add_fifo_node("uio0");

    let mut device = find_devices(&fake.config()).unwrap().into_devices().remove(0);
    device.open().unwrap();

    assert_eq!(device.wait_interrupt(Deadline::Immediate).unwrap(), WaitOutcome::TimedOut);

    device.enable_interrupt().unwrap();
    let outcome = device.wait_interrupt(Some(Duration::from_millis(50))).unwrap();
    assert!(outcome.is_interrupt());

    let err = device.wait_interrupt_timeout(Duration::from_millis(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    device.close().unwrap();
    assert_eq!(device.enable_interrupt().unwrap_err().kind(), ErrorKind::InvalidArgument);
}
