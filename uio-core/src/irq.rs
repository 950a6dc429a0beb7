//! Interrupt control and wait on an open UIO device.
//!
//! The kernel protocol on the device node:
//! - writing a 4-byte word of `1` / `0` enables / disables the interrupt;
//! - reading 4 bytes blocks until an interrupt arrives and returns the
//!   total interrupt count.

use crate::device::UioDevice;
use crate::error::{Result, UioError};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;
use tracing::{debug, instrument};

/// Size of the control word and of the interrupt counter.
pub const IRQ_WORD_LEN: usize = 4;

/// How long [`UioDevice::wait_interrupt`] may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Only consume an interrupt that is already pending.
    Immediate,
    /// Block at most this long.
    Within(Duration),
    /// Block until an interrupt arrives.
    Infinite,
}

impl From<Duration> for Deadline {
    fn from(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Deadline::Immediate
        } else {
            Deadline::Within(timeout)
        }
    }
}

impl From<Option<Duration>> for Deadline {
    fn from(timeout: Option<Duration>) -> Self {
        timeout.map_or(Deadline::Infinite, Deadline::from)
    }
}

impl Deadline {
    /// poll(2) timeout in milliseconds. Sub-millisecond remainders round up.
    fn poll_timeout_ms(self) -> Option<libc::c_int> {
        match self {
            Deadline::Immediate => Some(0),
            Deadline::Within(timeout) => {
                let mut ms = timeout.as_millis();
                if timeout.subsec_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                Some(libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX))
            }
            Deadline::Infinite => None,
        }
    }
}

/// Result of waiting for an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// An interrupt was consumed; `count` is the kernel's running total.
    Interrupt { count: u32 },
    /// The deadline passed with no interrupt pending.
    TimedOut,
}

impl WaitOutcome {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, WaitOutcome::Interrupt { .. })
    }

    pub fn count(&self) -> Option<u32> {
        match self {
            WaitOutcome::Interrupt { count } => Some(*count),
            WaitOutcome::TimedOut => None,
        }
    }
}

/// Write the control word in a single `write`. No retry on short writes.
pub(crate) fn write_control_word<W: Write>(writer: &mut W, enable: bool) -> Result<()> {
    let word = u32::from(enable).to_ne_bytes();
    match writer.write(&word) {
        Ok(IRQ_WORD_LEN) => Ok(()),
        Ok(actual) => Err(UioError::ShortTransfer {
            operation: "interrupt control write",
            expected: IRQ_WORD_LEN,
            actual,
        }),
        Err(e) => Err(UioError::Os { operation: "interrupt control write", source: e }),
    }
}

/// Read the interrupt counter in a single `read`.
pub(crate) fn read_counter<R: Read>(reader: &mut R) -> Result<u32> {
    let mut word = [0u8; IRQ_WORD_LEN];
    match reader.read(&mut word) {
        Ok(IRQ_WORD_LEN) => Ok(u32::from_ne_bytes(word)),
        Ok(actual) => Err(UioError::ShortTransfer {
            operation: "interrupt counter read",
            expected: IRQ_WORD_LEN,
            actual,
        }),
        Err(e) => Err(UioError::Os { operation: "interrupt counter read", source: e }),
    }
}

/// Wait until `fd` is readable. `Ok(false)` means the timeout elapsed.
fn poll_readable(fd: BorrowedFd<'_>, timeout_ms: libc::c_int) -> Result<bool> {
    let mut pfd = libc::pollfd { fd: fd.as_raw_fd(), events: libc::POLLIN, revents: 0 };

    // SAFETY: pfd is a single valid pollfd for the duration of the call.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    match ret {
        0 => Ok(false),
        n if n > 0 => Ok(true),
        _ => Err(UioError::Os { operation: "poll", source: std::io::Error::last_os_error() }),
    }
}

impl UioDevice {
    /// Enable interrupt delivery.
    pub fn enable_interrupt(&self) -> Result<()> {
        let mut file = self.file()?;
        write_control_word(&mut file, true)?;
        debug!(device = %self.uio_name(), "Interrupt enabled");
        Ok(())
    }

    /// Disable interrupt delivery.
    pub fn disable_interrupt(&self) -> Result<()> {
        let mut file = self.file()?;
        write_control_word(&mut file, false)?;
        debug!(device = %self.uio_name(), "Interrupt disabled");
        Ok(())
    }

    /// Wait for the next interrupt.
    ///
    /// With a bounded deadline the descriptor is polled first, and the
    /// counter is read only once it is readable. With [`Deadline::Infinite`]
    /// the counter read itself blocks. Interrupted syscalls are reported,
    /// not retried.
    #[instrument(skip_all, fields(device = %self.uio_name()))]
    pub fn wait_interrupt(&self, deadline: impl Into<Deadline>) -> Result<WaitOutcome> {
        let deadline = deadline.into();
        let mut file = self.file()?;

        if let Some(timeout_ms) = deadline.poll_timeout_ms() {
            if !poll_readable(self.fd()?, timeout_ms)? {
                debug!(?deadline, "Interrupt wait timed out");
                return Ok(WaitOutcome::TimedOut);
            }
        }

        let count = read_counter(&mut file)?;
        debug!(count, "Interrupt received");
        Ok(WaitOutcome::Interrupt { count })
    }

    /// Wait at most `timeout` for an interrupt, treating a timeout as an error.
    pub fn wait_interrupt_timeout(&self, timeout: Duration) -> Result<u32> {
        match self.wait_interrupt(timeout)? {
            WaitOutcome::Interrupt { count } => Ok(count),
            WaitOutcome::TimedOut => Err(UioError::TimedOut { timeout }),
        }
    }
}
