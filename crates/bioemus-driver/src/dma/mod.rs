//! DMA slot rings
//!
//! A channel is a fixed ring of fixed-size slots shared with a kernel
//! driver. A slot handed to the driver with [`DmaTransport::submit`] belongs
//! to the driver until the matching [`DmaTransport::await_completion`]
//! returns; implementations refuse payload access to an in-flight slot.
//!
//! ```text
//! DmaChannel       dma-proxy character device (target board)
//! SimDmaChannel    in-process ring with a scripted device (tests, CI)
//! ```

pub mod proxy;
pub mod sim;

pub use proxy::DmaChannel;
pub use sim::{SimDmaChannel, SimDmaJournal, SimTransfer};

use crate::error::{BioemusError, Result};
use std::fmt::Debug;

/// Completion status of a slot, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Transfer completed.
    Ok,
    /// Transfer still running.
    Busy,
    /// Driver gave up waiting.
    Timeout,
    /// Transfer failed.
    Error,
}

impl SlotStatus {
    /// Decode the status word of a slot. Unknown values are errors.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::Busy,
            2 => Self::Timeout,
            _ => Self::Error,
        }
    }

    /// Status word as written by the driver.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Busy => 1,
            Self::Timeout => 2,
            Self::Error => 3,
        }
    }
}

/// Slot ring of one DMA channel.
pub trait DmaTransport: Debug + Send {
    /// Channel name for logs.
    fn name(&self) -> &str;

    /// Number of slots in the ring.
    fn slot_count(&self) -> usize;

    /// Payload capacity of one slot in bytes.
    fn slot_capacity(&self) -> usize;

    /// Hand `slot` to the driver for a transfer of `len` bytes.
    ///
    /// # Errors
    ///
    /// [`BioemusError::SlotMisuse`] if the slot is out of range, already in
    /// flight, or `len` exceeds the capacity; I/O errors from the driver.
    fn submit(&mut self, slot: usize, len: usize) -> Result<()>;

    /// Block until the transfer on `slot` finishes and return its status.
    ///
    /// # Errors
    ///
    /// [`BioemusError::SlotMisuse`] if nothing was submitted on the slot;
    /// I/O errors from the driver.
    fn await_completion(&mut self, slot: usize) -> Result<SlotStatus>;

    /// First `len` payload bytes of an idle slot.
    ///
    /// # Errors
    ///
    /// [`BioemusError::SlotMisuse`] for an in-flight or out-of-range slot.
    fn payload(&self, slot: usize, len: usize) -> Result<&[u8]>;

    /// Mutable payload of an idle slot.
    ///
    /// # Errors
    ///
    /// [`BioemusError::SlotMisuse`] for an in-flight or out-of-range slot.
    fn payload_mut(&mut self, slot: usize, len: usize) -> Result<&mut [u8]>;

    /// Submit, await and check one transfer.
    ///
    /// # Errors
    ///
    /// [`BioemusError::TransferFailed`] for a non-ok status.
    fn transfer(&mut self, slot: usize, len: usize) -> Result<()> {
        self.submit(slot, len)?;
        match self.await_completion(slot)? {
            SlotStatus::Ok => Ok(()),
            status => Err(BioemusError::transfer_failed(format!(
                "{} slot {slot}: status {status:?}",
                self.name()
            ))),
        }
    }
}

/// In-flight bookkeeping shared by the channel implementations.
#[derive(Debug, Clone)]
pub(crate) struct SlotTracker {
    in_flight: Vec<bool>,
    capacity: usize,
}

impl SlotTracker {
    pub(crate) fn new(slots: usize, capacity: usize) -> Self {
        Self {
            in_flight: vec![false; slots],
            capacity,
        }
    }

    fn check_range(&self, slot: usize, len: usize) -> Result<()> {
        if slot >= self.in_flight.len() {
            return Err(BioemusError::slot_misuse(
                slot,
                format!("ring has {} slots", self.in_flight.len()),
            ));
        }
        if len > self.capacity {
            return Err(BioemusError::slot_misuse(
                slot,
                format!("{len} bytes exceed slot capacity {}", self.capacity),
            ));
        }
        Ok(())
    }

    pub(crate) fn begin(&mut self, slot: usize, len: usize) -> Result<()> {
        self.check_range(slot, len)?;
        if self.in_flight[slot] {
            return Err(BioemusError::slot_misuse(slot, "submitted twice"));
        }
        self.in_flight[slot] = true;
        Ok(())
    }

    pub(crate) fn end(&mut self, slot: usize) -> Result<()> {
        self.check_range(slot, 0)?;
        if !self.in_flight[slot] {
            return Err(BioemusError::slot_misuse(slot, "awaited without submit"));
        }
        self.in_flight[slot] = false;
        Ok(())
    }

    pub(crate) fn idle(&self, slot: usize, len: usize) -> Result<()> {
        self.check_range(slot, len)?;
        if self.in_flight[slot] {
            return Err(BioemusError::slot_misuse(slot, "payload accessed while in flight"));
        }
        Ok(())
    }
}
