//! `lsuio irq` command

use anyhow::{Context, Result};
use std::time::Duration;
use uio_core::{find_device_by_name, Deadline, DiscoveryConfig, WaitOutcome};

/// Open `device_name`, optionally enable its interrupt, and wait for `count`
/// interrupts. A timed-out wait is reported and counts toward `count`.
pub fn irq(
    config: &DiscoveryConfig,
    device_name: &str,
    timeout_ms: Option<u64>,
    count: u32,
    enable: bool,
) -> Result<()> {
    let mut device = find_device_by_name(config, device_name)?;
    device.open().with_context(|| format!("Failed to open {}", device.dev_path().display()))?;

    let deadline = Deadline::from(timeout_ms.map(Duration::from_millis));
    let result = wait_loop(&device, deadline, count, enable);

    device.close()?;
    result
}

fn wait_loop(device: &uio_core::UioDevice, deadline: Deadline, count: u32, enable: bool) -> Result<()> {
    for _ in 0..count {
        if enable {
            device.enable_interrupt().context("Failed to enable interrupt")?;
        }

        match device.wait_interrupt(deadline)? {
            WaitOutcome::Interrupt { count } => {
                println!("{}: interrupt (total {})", device.uio_name(), count)
            }
            WaitOutcome::TimedOut => println!("{}: timed out", device.uio_name()),
        }
    }

    Ok(())
}
