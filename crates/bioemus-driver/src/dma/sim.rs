//! Simulated DMA channel
//!
//! A scripted device stands in for the fabric: on completion of each
//! transfer it may fill the slot (receive channels) and reports a status.
//! A channel built with [`SimDmaChannel::with_journal`] records every
//! completed transfer with the slot bytes, so transmit channels can be
//! checked for what they sent.

use super::{DmaTransport, SlotStatus, SlotTracker};
use crate::error::{BioemusError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Device behaviour: called with the transfer sequence number and the slot
/// bytes of the transfer, returns the completion status.
pub type DeviceFn = Box<dyn FnMut(u64, &mut [u8]) -> SlotStatus + Send>;

/// One completed simulated transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTransfer {
    /// Slot used.
    pub slot: usize,
    /// Requested length.
    pub len: usize,
    /// Reported status.
    pub status: SlotStatus,
    /// Slot bytes after completion.
    pub data: Vec<u8>,
}

/// Shared view of a simulated channel's journal.
#[derive(Debug, Clone, Default)]
pub struct SimDmaJournal(Arc<Mutex<Vec<SimTransfer>>>);

impl SimDmaJournal {
    /// All completed transfers.
    #[must_use]
    pub fn transfers(&self) -> Vec<SimTransfer> {
        self.0.lock().clone()
    }

    /// Slots in completion order.
    #[must_use]
    pub fn slots(&self) -> Vec<usize> {
        self.0.lock().iter().map(|t| t.slot).collect()
    }

    /// Number of completed transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether no transfer completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// In-process DMA slot ring.
pub struct SimDmaChannel {
    name: String,
    buffers: Vec<Vec<u8>>,
    pending: Vec<usize>,
    slots: SlotTracker,
    device: Option<DeviceFn>,
    latency: Duration,
    sequence: u64,
    journal: Option<SimDmaJournal>,
}

impl std::fmt::Debug for SimDmaChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDmaChannel")
            .field("name", &self.name)
            .field("slots", &self.buffers.len())
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl SimDmaChannel {
    /// Ring of `slots` slots of `capacity` bytes; transfers complete ok and
    /// leave the slot untouched.
    #[must_use]
    pub fn new(name: impl Into<String>, slots: usize, capacity: usize) -> Self {
        Self {
            name: name.into(),
            buffers: vec![vec![0; capacity]; slots],
            pending: vec![0; slots],
            slots: SlotTracker::new(slots, capacity),
            device: None,
            latency: Duration::ZERO,
            sequence: 0,
            journal: None,
        }
    }

    /// Script the device.
    #[must_use]
    pub fn with_device(
        mut self,
        device: impl FnMut(u64, &mut [u8]) -> SlotStatus + Send + 'static,
    ) -> Self {
        self.device = Some(Box::new(device));
        self
    }

    /// Make every completion take `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Record every completed transfer.
    #[must_use]
    pub fn with_journal(mut self) -> Self {
        self.journal.get_or_insert_with(SimDmaJournal::default);
        self
    }

    /// Handle on the transfer journal; empty unless built
    /// [`with_journal`](Self::with_journal).
    #[must_use]
    pub fn journal(&self) -> SimDmaJournal {
        self.journal.clone().unwrap_or_default()
    }
}

impl DmaTransport for SimDmaChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn slot_count(&self) -> usize {
        self.buffers.len()
    }

    fn slot_capacity(&self) -> usize {
        self.buffers.first().map_or(0, Vec::len)
    }

    fn submit(&mut self, slot: usize, len: usize) -> Result<()> {
        self.slots.begin(slot, len)?;
        self.pending[slot] = len;
        Ok(())
    }

    fn await_completion(&mut self, slot: usize) -> Result<SlotStatus> {
        self.slots.end(slot)?;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let len = self.pending[slot];
        let data = &mut self.buffers[slot][..len];
        let status = match self.device.as_mut() {
            Some(device) => device(self.sequence, data),
            None => SlotStatus::Ok,
        };
        self.sequence += 1;
        if let Some(journal) = &self.journal {
            journal.0.lock().push(SimTransfer {
                slot,
                len,
                status,
                data: data.to_vec(),
            });
        }
        Ok(status)
    }

    fn payload(&self, slot: usize, len: usize) -> Result<&[u8]> {
        self.slots.idle(slot, len)?;
        self.buffers
            .get(slot)
            .map(|b| &b[..len])
            .ok_or_else(|| BioemusError::slot_misuse(slot, "no such slot"))
    }

    fn payload_mut(&mut self, slot: usize, len: usize) -> Result<&mut [u8]> {
        self.slots.idle(slot, len)?;
        self.buffers
            .get_mut(slot)
            .map(|b| &mut b[..len])
            .ok_or_else(|| BioemusError::slot_misuse(slot, "no such slot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_fills_slot_on_completion() {
        let mut ch = SimDmaChannel::new("rx", 2, 16)
            .with_journal()
            .with_device(|seq, buf| {
                buf.fill(seq as u8 + 1);
                SlotStatus::Ok
            });
        let journal = ch.journal();
        ch.transfer(0, 4).unwrap();
        ch.transfer(1, 4).unwrap();
        assert_eq!(ch.payload(0, 4).unwrap(), &[1; 4]);
        assert_eq!(ch.payload(1, 4).unwrap(), &[2; 4]);
        assert_eq!(journal.slots(), vec![0, 1]);
    }

    #[test]
    fn in_flight_slot_is_not_readable() {
        let mut ch = SimDmaChannel::new("rx", 1, 16);
        ch.submit(0, 8).unwrap();
        assert!(matches!(ch.payload(0, 8), Err(BioemusError::SlotMisuse { .. })));
        assert!(ch.submit(0, 8).is_err());
        assert_eq!(ch.await_completion(0).unwrap(), SlotStatus::Ok);
        assert!(ch.payload(0, 8).is_ok());
    }

    #[test]
    fn failed_status_fails_transfer() {
        let mut ch = SimDmaChannel::new("rx", 1, 16).with_device(|_, _| SlotStatus::Timeout);
        assert!(matches!(ch.transfer(0, 8), Err(BioemusError::TransferFailed { .. })));
        assert!(ch.transfer(0, 17).is_err());
    }

    #[test]
    fn transmit_journal_records_payload() {
        let mut ch = SimDmaChannel::new("tx", 1, 8).with_journal();
        let journal = ch.journal();
        ch.payload_mut(0, 3).unwrap().copy_from_slice(&[7, 8, 9]);
        ch.transfer(0, 3).unwrap();
        assert_eq!(journal.transfers()[0].data, vec![7, 8, 9]);
    }

    #[test]
    fn untracked_channel_records_nothing() {
        let mut ch = SimDmaChannel::new("rx", 1, 16);
        let journal = ch.journal();
        ch.transfer(0, 16).unwrap();
        assert!(journal.is_empty());
        assert!(ch.payload(0, 16).is_ok());
    }
}
