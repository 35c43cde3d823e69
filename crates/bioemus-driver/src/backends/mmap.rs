//! Memory-mapped device region
//!
//! One owned mapping of a device file (`/dev/mem` for the register window,
//! a DMA proxy node for slot buffers). All unsafe code of the driver that
//! touches mapped memory lives here; everything above goes through
//! bounds-checked accessors.

use crate::error::{BioemusError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Memory-mapped device region
///
/// The mapping is released when the region is dropped; the file handle is
/// kept open for the lifetime of the mapping.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    size: usize,
    file: File,
    path: PathBuf,
    offset: u64,
}

impl MmapRegion {
    /// Open `path` read-write and map `size` bytes starting at `offset`.
    ///
    /// `sync` opens the file with `O_SYNC`, required for `/dev/mem` so that
    /// register accesses are not cached.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the device file doesn't exist
    /// - the file cannot be opened
    /// - mmap fails
    pub fn open(path: impl AsRef<Path>, offset: u64, size: usize, sync: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BioemusError::device_not_found(path));
        }
        if size == 0 {
            return Err(BioemusError::map_failed(
                path.display().to_string(),
                "zero-sized mapping",
            ));
        }

        tracing::debug!("Mapping {} @ {offset:#x} ({size:#x} bytes)", path.display());

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if sync {
            options.custom_flags(libc::O_SYNC);
        }
        let file = options.open(path)?;

        // SAFETY: mmap is unsafe but we validate all preconditions:
        // - File descriptor is valid (just opened via OpenOptions)
        // - Size is non-zero (checked above)
        // - PROT_READ|PROT_WRITE for device access, MAP_SHARED so writes reach the device
        // - The offset is page aligned for the fixed windows we map (register window
        //   base and DMA pool both start on page boundaries); the kernel rejects
        //   anything else with EINVAL, surfaced as an error
        // - We store file in struct to keep fd open for lifetime of mapping
        // - We unmap in Drop impl
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                offset,
            )
        }
        .map_err(|e| BioemusError::map_failed(path.display().to_string(), e))?;

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            BioemusError::map_failed(path.display().to_string(), "mmap returned null")
        })?;

        tracing::info!("Mapped {} ({size:#x} bytes at {ptr:p})", path.display());

        Ok(Self {
            ptr,
            size,
            file,
            path: path.to_path_buf(),
            offset,
        })
    }

    fn check(&self, offset: usize, len: usize, op: &str) -> Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(BioemusError::invalid_argument(format!(
                "Out of bounds {op}: offset={offset:#x}, size={len}, limit={:#x}",
                self.size
            )));
        }
        Ok(())
    }

    /// Read 32-bit word at byte offset
    ///
    /// # Errors
    ///
    /// Returns error if offset is out of bounds
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4, "read")?;

        // SAFETY: Volatile read from mapped device memory.
        // - Bounds validated above: offset + 4 <= self.size
        // - ptr is valid (from successful mmap, stored in NonNull)
        // - Callers only use 4-byte aligned offsets (register index × 4, slot fields)
        // - read_volatile: the device changes these words behind our back
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe {
            let ptr = self.ptr.as_ptr().add(offset).cast::<u32>();
            ptr.read_volatile()
        };

        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        Ok(value)
    }

    /// Write 32-bit word at byte offset
    ///
    /// # Errors
    ///
    /// Returns error if offset is out of bounds
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4, "write")?;

        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");

        // SAFETY: Volatile write to mapped device memory.
        // - Bounds validated above: offset + 4 <= self.size
        // - ptr is valid (from successful mmap, stored in NonNull)
        // - Callers only use 4-byte aligned offsets
        // - write_volatile: each write is a discrete event for the fabric and
        //   must be neither merged nor reordered
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            let ptr = self.ptr.as_ptr().add(offset).cast::<u32>();
            ptr.write_volatile(value);
        }

        Ok(())
    }

    /// Borrow `len` bytes at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the range exceeds the mapping
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check(offset, len, "read")?;

        // SAFETY: from_raw_parts requires a valid, initialised range that is not
        // mutated for the lifetime of the slice:
        // - Bounds validated above, range lies inside the live mapping
        // - u8 has alignment 1
        // - Mutation through this region needs &mut self, which the borrow
        //   checker excludes while the slice lives; the device only writes a
        //   slot while it is submitted, and slot owners refuse access then
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) })
    }

    /// Mutably borrow `len` bytes at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the range exceeds the mapping
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        self.check(offset, len, "write")?;

        // SAFETY: as for `bytes`, with exclusivity guaranteed by &mut self.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) })
    }

    /// Raw descriptor of the backing device file (for ioctl)
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Get region size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Device file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the mapping within the device file
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        tracing::debug!(
            "Unmapping {} @ {:#x} ({:#x} bytes)",
            self.path.display(),
            self.offset,
            self.size
        );

        // SAFETY: munmap requires:
        // - addr must be a pointer returned by mmap
        // - length must match the length passed to mmap
        // Invariants that hold:
        // - self.ptr was created from successful mmap in open()
        // - self.size matches the size passed to mmap in open()
        // - No slice borrowed from the region can outlive it
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: Send implementation is safe because:
// - MmapRegion owns the mapped memory exclusively (no other references exist)
// - The mapped memory is valid for the lifetime of the MmapRegion (file kept open)
// - Moving MmapRegion between threads doesn't invalidate the mapping
unsafe impl Send for MmapRegion {}

// SAFETY: Sync implementation is safe because:
// - Writes and mutable slices require &mut self (exclusive access enforced by borrow checker)
// - Reads through &self are bounds-checked volatile loads or immutable slices
// - No internal mutable state without synchronization (size, ptr, file are immutable)
unsafe impl Sync for MmapRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_device_is_reported() {
        let err = MmapRegion::open("/dev/does-not-exist-bioemus", 0, 4096, false).unwrap_err();
        assert!(matches!(err, BioemusError::DeviceNotFound { .. }));
    }

    #[test]
    fn maps_regular_file_with_bounds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 4096]).unwrap();
        file.flush().unwrap();

        let mut region = MmapRegion::open(file.path(), 0, 4096, false).unwrap();
        region.write_u32(8, 0xDEAD_BEEF).unwrap();
        assert_eq!(region.read_u32(8).unwrap(), 0xDEAD_BEEF);
        assert_eq!(region.bytes(8, 4).unwrap(), &0xDEAD_BEEFu32.to_ne_bytes());
        region.bytes_mut(16, 2).unwrap().copy_from_slice(&[1, 2]);
        assert_eq!(region.bytes(16, 2).unwrap(), &[1, 2]);

        assert!(region.read_u32(4094).is_err());
        assert!(region.bytes(4000, 200).is_err());
        assert!(region.write_u32(usize::MAX - 1, 0).is_err());
    }
}
