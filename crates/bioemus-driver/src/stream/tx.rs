//! Transmit loop: bus → DMA ring

use super::plan::{TransferCount, TransferSpec};
use super::{LoopReport, LoopState, RunContext, StreamKind};
use crate::dma::DmaTransport;
use crate::error::{BioemusError, Result};
use tracing::{debug, info, trace, warn};

/// External stimulus injection.
///
/// The loop has no end of data of its own: it leaves on a stop request or
/// once every active receive loop has finished.
#[derive(Debug)]
pub struct StimulusLoop<'a> {
    spec: &'a TransferSpec,
    channel: &'a mut dyn DmaTransport,
    state: LoopState,
    slot: usize,
    transfers: u64,
}

impl<'a> StimulusLoop<'a> {
    /// Bind `spec` to `channel`.
    ///
    /// # Errors
    ///
    /// [`BioemusError::InvalidArgument`] for a receive stream or a transfer
    /// larger than a slot.
    pub fn new(spec: &'a TransferSpec, channel: &'a mut dyn DmaTransport) -> Result<Self> {
        if spec.kind != StreamKind::Stimulus {
            return Err(BioemusError::invalid_argument(format!("{} is not a transmit stream", spec.kind)));
        }
        if spec.transfer_bytes == 0 || spec.transfer_bytes > channel.slot_capacity() {
            return Err(BioemusError::invalid_argument(format!(
                "stimulus transfer of {} bytes does not fit a {}-byte slot of {}",
                spec.transfer_bytes,
                channel.slot_capacity(),
                channel.name()
            )));
        }
        Ok(Self {
            spec,
            channel,
            state: LoopState::Idle,
            slot: 0,
            transfers: 0,
        })
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    fn should_leave(&self, ctx: &RunContext) -> bool {
        if let TransferCount::Finite(n) = self.spec.count {
            if self.transfers >= n {
                return true;
            }
        }
        ctx.stop().is_stop_requested() || ctx.receivers_finished()
    }

    /// Forward payloads until stopped.
    ///
    /// # Errors
    ///
    /// Bus and transfer errors end the loop.
    pub fn run(mut self, ctx: &RunContext) -> Result<LoopReport> {
        let subscriber = ctx
            .subscriber()
            .ok_or_else(|| BioemusError::invalid_state("no bus endpoint for stimulus"))?;
        let len = self.spec.transfer_bytes;
        let slots = self.channel.slot_count();

        self.state = LoopState::Running;
        info!("stimulus: forwarding {len}-byte patterns from {}", subscriber.endpoint());
        while !self.should_leave(ctx) {
            let Some(message) = subscriber.recv()? else {
                continue;
            };
            if self.should_leave(ctx) {
                debug!("stimulus: pattern dropped at shutdown");
                break;
            }
            fill_slot(self.channel.payload_mut(self.slot, len)?, &message);
            self.channel.transfer(self.slot, len)?;
            trace!("stimulus: inserted pattern {}", self.transfers);
            self.transfers += 1;
            self.slot = (self.slot + 1) % slots;
        }

        let stopped_early = ctx.stop().is_stop_requested();
        if stopped_early {
            self.state = LoopState::Draining;
            debug!("stimulus: stop requested after {} patterns", self.transfers);
        }
        self.state = LoopState::Stopped;
        info!("stimulus: {} patterns inserted", self.transfers);
        Ok(LoopReport {
            kind: StreamKind::Stimulus,
            transfers: self.transfers,
            bytes: self.transfers * len as u64,
            stopped_early,
        })
    }
}

/// Copy `message` into `slot`, zero-padding or truncating to the slot size.
fn fill_slot(slot: &mut [u8], message: &[u8]) {
    let n = message.len().min(slot.len());
    if message.len() != slot.len() {
        warn!(
            "Stimulus pattern of {} bytes, expected {}; {}",
            message.len(),
            slot.len(),
            if message.len() < slot.len() { "zero-padded" } else { "truncated" }
        );
    }
    slot[..n].copy_from_slice(&message[..n]);
    slot[n..].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{memory_bus, Publisher};
    use crate::dma::SimDmaChannel;
    use crate::stream::{Endpoints, StopHandle};
    use std::time::Duration;

    fn stim_spec() -> TransferSpec {
        TransferSpec {
            kind: StreamKind::Stimulus,
            transfer_bytes: 8,
            count: TransferCount::UntilStopped,
            save: None,
            send: None,
        }
    }

    #[test]
    fn pads_and_truncates() {
        let mut slot = [0xAA; 4];
        fill_slot(&mut slot, &[1, 2]);
        assert_eq!(slot, [1, 2, 0, 0]);
        fill_slot(&mut slot, &[5, 6, 7, 8, 9]);
        assert_eq!(slot, [5, 6, 7, 8]);
    }

    #[test]
    fn forwards_until_receivers_finish() {
        let mut ch = SimDmaChannel::new("tx_ext_stim", 1, 64).with_journal();
        let journal = ch.journal();
        let (tx, rx) = memory_bus("mem://stim");
        let ctx = RunContext::new(
            StopHandle::new(),
            Endpoints {
                stimulus: Some(Box::new(rx.with_timeout(Duration::from_millis(10)))),
                ..Endpoints::default()
            },
        );
        ctx.mark_active(StreamKind::Spikes);
        let s = stim_spec();
        let looped = StimulusLoop::new(&s, &mut ch).unwrap();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| looped.run(&ctx));
            tx.send(&[1; 8]).unwrap();
            tx.send(&[2; 3]).unwrap();
            while journal.len() < 2 {
                std::thread::sleep(Duration::from_millis(1));
            }
            ctx.mark_done(StreamKind::Spikes);
            let report = handle.join().unwrap().unwrap();
            assert_eq!(report.transfers, 2);
            assert!(!report.stopped_early);
        });
        let sent = journal.transfers();
        assert_eq!(sent[0].data, vec![1; 8]);
        assert_eq!(sent[1].data, vec![2, 2, 2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn leaves_on_stop_without_receivers() {
        let mut ch = SimDmaChannel::new("tx_ext_stim", 1, 64);
        let (_tx, rx) = memory_bus("mem://stim");
        let stop = StopHandle::new();
        let ctx = RunContext::new(
            stop.clone(),
            Endpoints {
                stimulus: Some(Box::new(rx.with_timeout(Duration::from_millis(5)))),
                ..Endpoints::default()
            },
        );
        let s = stim_spec();
        let looped = StimulusLoop::new(&s, &mut ch).unwrap();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| looped.run(&ctx));
            std::thread::sleep(Duration::from_millis(20));
            assert!(!handle.is_finished());
            stop.request_stop();
            let report = handle.join().unwrap().unwrap();
            assert!(report.stopped_early);
            assert_eq!(report.transfers, 0);
        });
    }

    #[test]
    fn receive_spec_is_rejected() {
        let mut ch = SimDmaChannel::new("tx_ext_stim", 1, 64);
        let s = TransferSpec {
            kind: StreamKind::Vmem,
            ..stim_spec()
        };
        assert!(StimulusLoop::new(&s, &mut ch).is_err());
    }
}
