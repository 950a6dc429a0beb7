//! Memory regions exposed by a UIO device.
//!
//! Each region is selected for mapping by its index: the kernel maps region
//! `N` when `mmap` is called with an offset of `N` pages on the device node.

use crate::error::{Result, UioError};
use once_cell::sync::Lazy;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::{self, NonNull};
use tracing::debug;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
});

/// System page size in bytes.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// An owned shared read/write mapping of one device region.
///
/// Not `Clone`: the range is unmapped exactly once, by [`Mapping::unmap`] or on drop.
#[derive(Debug)]
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain shared memory owned by this value; moving the
// owner to another thread does not invalidate it.
unsafe impl Send for Mapping {}

impl Mapping {
    /// Map `len` bytes of region `index` from the device descriptor.
    pub(crate) fn map(fd: BorrowedFd<'_>, len: usize, index: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let offset = index
            .checked_mul(page_size())
            .and_then(|o| libc::off_t::try_from(o).ok())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EOVERFLOW))?;

        // SAFETY: a fresh mapping chosen by the kernel (null hint) cannot alias
        // any existing Rust allocation; the result is checked against MAP_FAILED.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EFAULT))?;
        Ok(Self { ptr, len })
    }

    /// Release the mapping, reporting a failed `munmap`.
    pub(crate) fn unmap(self) -> io::Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: ptr/len describe a live mapping created by `map`, and
        // ManuallyDrop keeps Drop from unmapping it a second time.
        let ret = unsafe { libc::munmap(this.ptr.as_ptr().cast(), this.len) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// A mapping whose range the kernel will refuse to unmap.
    #[cfg(test)]
    pub(crate) fn misaligned(len: usize) -> Self {
        Self { ptr: NonNull::dangling(), len }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: see `unmap`.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

/// Mapping state of a region.
#[derive(Debug, Default)]
pub enum MapState {
    /// Not mapped (the device is closed or the region was unmapped).
    #[default]
    Unmapped,
    /// Mapped while the device is open.
    Mapped(Mapping),
    /// Mapping was attempted on open and failed with this errno.
    Failed(i32),
}

/// One memory region of a UIO device.
#[derive(Debug)]
pub struct Region {
    index: usize,
    name: Option<String>,
    size: usize,
    addr: u64,
    page_offset: usize,
    state: MapState,
}

impl Region {
    /// Describe region `index` of `size` bytes at physical address `addr`.
    pub fn new(index: usize, size: usize, addr: u64) -> Self {
        Self { index, name: None, size, addr, page_offset: 0, state: MapState::Unmapped }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_page_offset(mut self, page_offset: usize) -> Self {
        self.page_offset = page_offset;
        self
    }

    /// Index used to select this region when mapping.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Mapping offset of this region. Same value as [`Region::index`].
    pub fn offset(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Physical (bus) address. Informational only.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Byte offset of `addr` within its page, as reported by the kernel.
    pub fn page_offset(&self) -> usize {
        self.page_offset
    }

    pub fn state(&self) -> &MapState {
        &self.state
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.state, MapState::Mapped(_))
    }

    /// The errno of a failed mapping attempt, if the last attempt failed.
    pub fn map_error(&self) -> Option<io::Error> {
        match self.state {
            MapState::Failed(errno) => Some(io::Error::from_raw_os_error(errno)),
            _ => None,
        }
    }

    /// Start of the mapped range, or `None` when not mapped.
    pub fn as_ptr(&self) -> Option<NonNull<u8>> {
        match &self.state {
            MapState::Mapped(mapping) => Some(mapping.as_ptr()),
            _ => None,
        }
    }

    /// The mapped range as bytes.
    ///
    /// Prefer the volatile accessors for device registers; the slice view is
    /// for plain shared memory.
    pub fn as_slice(&self) -> Option<&[u8]> {
        match &self.state {
            // SAFETY: the mapping is live for as long as `self` is borrowed.
            MapState::Mapped(m) => {
                Some(unsafe { std::slice::from_raw_parts(m.as_ptr().as_ptr(), m.len()) })
            }
            _ => None,
        }
    }

    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.state {
            // SAFETY: the mapping is live and uniquely borrowed through `self`.
            MapState::Mapped(m) => {
                Some(unsafe { std::slice::from_raw_parts_mut(m.as_ptr().as_ptr(), m.len()) })
            }
            _ => None,
        }
    }

    /// Volatile 32-bit read at byte offset `off`.
    pub fn read_u32(&self, off: usize) -> Option<u32> {
        let ptr = self.checked_ptr(off, 4)?;
        // SAFETY: checked_ptr validated bounds and alignment on a live mapping.
        Some(unsafe { ptr::read_volatile(ptr.cast::<u32>()) })
    }

    /// Volatile 32-bit write at byte offset `off`.
    pub fn write_u32(&mut self, off: usize, value: u32) -> Result<()> {
        let ptr = self.checked_ptr(off, 4).ok_or_else(|| self.access_error(off, 4))?;
        // SAFETY: checked_ptr validated bounds and alignment on a live mapping.
        unsafe { ptr::write_volatile(ptr.cast::<u32>(), value) };
        Ok(())
    }

    /// Volatile byte read at offset `off`.
    pub fn read_u8(&self, off: usize) -> Option<u8> {
        let ptr = self.checked_ptr(off, 1)?;
        // SAFETY: in bounds of a live mapping.
        Some(unsafe { ptr::read_volatile(ptr) })
    }

    /// Volatile byte write at offset `off`.
    pub fn write_u8(&mut self, off: usize, value: u8) -> Result<()> {
        let ptr = self.checked_ptr(off, 1).ok_or_else(|| self.access_error(off, 1))?;
        // SAFETY: in bounds of a live mapping.
        unsafe { ptr::write_volatile(ptr, value) };
        Ok(())
    }

    fn checked_ptr(&self, off: usize, width: usize) -> Option<*mut u8> {
        let MapState::Mapped(mapping) = &self.state else {
            return None;
        };
        if off % width != 0 || off.checked_add(width)? > mapping.len() {
            return None;
        }
        // SAFETY: off + width <= len, so the result stays inside the mapping.
        Some(unsafe { mapping.as_ptr().as_ptr().add(off) })
    }

    fn access_error(&self, off: usize, width: usize) -> UioError {
        if !self.is_mapped() {
            return UioError::invalid(format!("region {} is not mapped", self.index));
        }
        UioError::invalid(format!(
            "{}-byte access at {:#x} is misaligned or outside region {} ({} bytes)",
            width, off, self.index, self.size
        ))
    }

    /// Try to map this region from `fd`, recording the outcome.
    pub(crate) fn map_from(&mut self, fd: BorrowedFd<'_>) {
        if let Err(e) = self.release() {
            debug!(region = self.index, error = %e, "munmap before remap failed");
        }
        self.state = match Mapping::map(fd, self.size, self.index) {
            Ok(mapping) => MapState::Mapped(mapping),
            Err(e) => {
                debug!(region = self.index, size = self.size, error = %e, "Region mapping failed");
                MapState::Failed(e.raw_os_error().unwrap_or(libc::EIO))
            }
        };
    }

    /// Unmap if mapped and reset to [`MapState::Unmapped`].
    ///
    /// The state is reset even when `munmap` fails.
    pub(crate) fn release(&mut self) -> io::Result<()> {
        match std::mem::take(&mut self.state) {
            MapState::Mapped(mapping) => mapping.unmap(),
            _ => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn replace_state(&mut self, state: MapState) -> MapState {
        std::mem::replace(&mut self.state, state)
    }
}
