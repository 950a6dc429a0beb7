//! `lsuio list` command

use anyhow::Result;
use uio_core::{find_devices, DiscoveryConfig, UioDevice};

/// List all UIO devices.
///
/// With `maps`, prints every region below its device. With `mmap`, opens each
/// device and reports whether each region could be mapped.
pub fn list(config: &DiscoveryConfig, maps: bool, mmap: bool) -> Result<()> {
    let found = find_devices(config)?;

    for skipped in &found.skipped {
        eprintln!("warning: skipped {}: {}", skipped.name, skipped.error);
    }

    if found.is_empty() {
        println!("No UIO devices found");
        return Ok(());
    }

    println!("{:<8} {:<24} {:<12} {:<10} {:<6}", "DEVICE", "NAME", "VERSION", "DEV", "MAPS");
    println!("{}", "-".repeat(64));

    let total = found.len();
    for mut device in found {
        println!(
            "{:<8} {:<24} {:<12} {:<10} {:<6}",
            device.uio_name(),
            truncate(device.name(), 24),
            truncate(device.version(), 12),
            device.devid().to_string(),
            device.region_count()
        );

        if maps || mmap {
            print_regions(&mut device, mmap);
        }
    }

    println!();
    println!("Total: {} device(s)", total);

    Ok(())
}

fn print_regions(device: &mut UioDevice, mmap: bool) {
    let open_error = if mmap { device.open().err() } else { None };
    if let Some(e) = &open_error {
        println!("    cannot open {}: {}", device.dev_path().display(), e);
    }

    for region in device.regions() {
        let mut line = format!(
            "    map{:<3} addr {:#014x}  size {:>10}",
            region.index(),
            region.addr(),
            format_size(region.size())
        );
        if let Some(name) = region.name() {
            line.push_str(&format!("  {}", name));
        }
        if mmap && open_error.is_none() {
            match region.map_error() {
                None => line.push_str("  [mmap ok]"),
                Some(e) => line.push_str(&format!("  [mmap failed: {}]", e)),
            }
        }
        println!("{}", line);
    }

    if device.is_open() {
        if let Err(e) = device.close() {
            println!("    close failed: {}", e);
        }
    }
}

/// Truncate string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len < 3 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

/// Format a byte count in human-readable form.
fn format_size(bytes: usize) -> String {
    const KIB: usize = 1024;
    const MIB: usize = 1024 * KIB;

    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{} B", bytes)
    }
}
