//! dma-proxy character device channel
//!
//! The kernel module exposes each channel as `/dev/dma_proxy_<name>`. Its
//! buffer pool is an array of slots mapped at offset 0:
//!
//! ```text
//! struct channel_buffer {
//!     u32 buffer[32768];     // payload, 128 KiB
//!     u32 status;            // 0 ok, 1 busy, 2 timeout, 3 error
//!     u32 length;            // transfer length in bytes
//! } __aligned(1024);         // stride 132096
//! ```
//!
//! A transfer is started with `START_XFER` and waited for with
//! `FINISH_XFER`, both taking a pointer to the slot index.

// ioctl request numbers and slot indices cross the C ABI as fixed-width ints
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use super::{DmaTransport, SlotStatus, SlotTracker};
use crate::backends::mmap::MmapRegion;
use crate::error::{BioemusError, Result};
use std::os::raw::c_ulong;
use std::path::Path;

/// Payload bytes per slot.
pub const BUFFER_SIZE: usize = 128 * 1024;
/// Byte offset of the status word in a slot.
pub const STATUS_OFFSET: usize = BUFFER_SIZE;
/// Byte offset of the length word in a slot.
pub const LENGTH_OFFSET: usize = BUFFER_SIZE + 4;
/// Distance between consecutive slots.
pub const SLOT_STRIDE: usize = (LENGTH_OFFSET + 4).div_ceil(1024) * 1024;

/// Spike receive channel device.
pub const RX_SPIKES: &str = "/dev/dma_proxy_rx_spk";
/// Vmem receive channel device.
pub const RX_VMEM: &str = "/dev/dma_proxy_rx_vmem";
/// Stimulus transmit channel device.
pub const TX_STIMULUS: &str = "/dev/dma_proxy_tx_ext_stim";
/// Slots of each receive channel.
pub const RX_BUFFER_COUNT: usize = 32;
/// Slots of the transmit channel.
pub const TX_BUFFER_COUNT: usize = 1;

/// dma-proxy ioctl request numbers.
pub mod ioctls {
    use std::os::raw::c_ulong;

    /// `_IOW(ty, nr, size)`
    const fn iow(ty: u8, nr: u8, size: usize) -> c_ulong {
        (1 << 30) | ((size as c_ulong) << 16) | ((ty as c_ulong) << 8) | (nr as c_ulong)
    }

    const PTR: usize = std::mem::size_of::<*const i32>();

    /// Wait for the transfer on a slot.
    pub const FINISH_XFER: c_ulong = iow(b'a', b'a', PTR);
    /// Start a transfer on a slot.
    pub const START_XFER: c_ulong = iow(b'a', b'b', PTR);
}

/// One dma-proxy channel, exclusively owned by a streaming loop.
#[derive(Debug)]
pub struct DmaChannel {
    name: String,
    region: MmapRegion,
    slots: SlotTracker,
    slot_count: usize,
}

impl DmaChannel {
    /// Open `path` and map its `slots` buffers.
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or cannot be mapped.
    pub fn open(path: impl AsRef<Path>, slots: usize) -> Result<Self> {
        let path = path.as_ref();
        if slots == 0 {
            return Err(BioemusError::invalid_argument("DMA channel needs at least one slot"));
        }
        let region = MmapRegion::open(path, 0, SLOT_STRIDE * slots, false)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        tracing::info!("Open DMA proxy device file {} ({slots} slots)", path.display());
        Ok(Self {
            name,
            region,
            slots: SlotTracker::new(slots, BUFFER_SIZE),
            slot_count: slots,
        })
    }

    fn request(&self, request: c_ulong, slot: usize) -> Result<()> {
        let mut index = slot as i32;
        // SAFETY: dma-proxy START/FINISH ioctls read one i32 slot index.
        // Invariants: (1) fd is open for the lifetime of `region`; (2) the
        // pointer targets a live local i32; (3) the driver only reads it.
        let ret = unsafe {
            libc::ioctl(
                self.region.raw_fd(),
                request as _,
                std::ptr::addr_of_mut!(index),
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(BioemusError::transfer_failed(format!(
                "{} slot {slot}: ioctl failed: {err}",
                self.name
            )));
        }
        Ok(())
    }
}

impl DmaTransport for DmaChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn slot_capacity(&self) -> usize {
        BUFFER_SIZE
    }

    fn submit(&mut self, slot: usize, len: usize) -> Result<()> {
        self.slots.begin(slot, len)?;
        let base = slot * SLOT_STRIDE;
        self.region.write_u32(base + LENGTH_OFFSET, len as u32)?;
        if let Err(e) = self.request(ioctls::START_XFER, slot) {
            self.slots.end(slot)?;
            return Err(e);
        }
        tracing::trace!("{}: start slot {slot} ({len} bytes)", self.name);
        Ok(())
    }

    fn await_completion(&mut self, slot: usize) -> Result<SlotStatus> {
        let waited = self.request(ioctls::FINISH_XFER, slot);
        self.slots.end(slot)?;
        waited?;
        let status = SlotStatus::from_raw(self.region.read_u32(slot * SLOT_STRIDE + STATUS_OFFSET)?);
        tracing::trace!("{}: slot {slot} done ({status:?})", self.name);
        Ok(status)
    }

    fn payload(&self, slot: usize, len: usize) -> Result<&[u8]> {
        self.slots.idle(slot, len)?;
        self.region.bytes(slot * SLOT_STRIDE, len)
    }

    fn payload_mut(&mut self, slot: usize, len: usize) -> Result<&mut [u8]> {
        self.slots.idle(slot, len)?;
        self.region.bytes_mut(slot * SLOT_STRIDE, len)
    }
}
