//! Receive loop: DMA ring → file and/or bus

use super::plan::{TransferCount, TransferSpec};
use super::sink::Sink;
use super::{DoneGuard, LoopReport, LoopState, OutputFormat, RunContext, StreamKind};
use crate::bus::Publisher;
use crate::dma::DmaTransport;
use crate::error::{BioemusError, Result};
use bioemus_hw::frames::{counts_to_bytes, SpikeFrames};
use tracing::{debug, error, info};

/// One receive loop bound to its channel.
#[derive(Debug)]
pub struct ReceiveLoop<'a> {
    spec: &'a TransferSpec,
    neurons: u32,
    channel: &'a mut dyn DmaTransport,
    sink: Option<Sink>,
    state: LoopState,
    slot: usize,
    transfers: u64,
    stopped_early: bool,
}

impl<'a> ReceiveLoop<'a> {
    /// Bind `spec` to `channel` and open the output file, if any.
    ///
    /// # Errors
    ///
    /// [`BioemusError::InvalidArgument`] for a non-receive stream or a
    /// transfer larger than a slot; sink creation errors.
    pub fn new(spec: &'a TransferSpec, neurons: u32, channel: &'a mut dyn DmaTransport) -> Result<Self> {
        if spec.kind == StreamKind::Stimulus {
            return Err(BioemusError::invalid_argument("stimulus is not a receive stream"));
        }
        if spec.transfer_bytes == 0 || spec.transfer_bytes > channel.slot_capacity() {
            return Err(BioemusError::invalid_argument(format!(
                "{} transfer of {} bytes does not fit a {}-byte slot of {}",
                spec.kind,
                spec.transfer_bytes,
                channel.slot_capacity(),
                channel.name()
            )));
        }
        let sink = match &spec.save {
            Some((path, format)) => Some(Sink::create(path, *format, spec.kind, neurons)?),
            None => None,
        };
        Ok(Self {
            spec,
            neurons,
            channel,
            sink,
            state: LoopState::Idle,
            slot: 0,
            transfers: 0,
            stopped_early: false,
        })
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    fn complete(&self) -> bool {
        match self.spec.count {
            TransferCount::Finite(n) => self.transfers >= n,
            TransferCount::UntilStopped => false,
        }
    }

    /// Run to completion or until stopped. The loop is marked done in `ctx`
    /// and the output file is flushed however it ends.
    ///
    /// # Errors
    ///
    /// Transfer, sink and bus errors end the loop. A failed flush after one
    /// of those is logged and the first error returned.
    pub fn run(mut self, ctx: &RunContext) -> Result<LoopReport> {
        let kind = self.spec.kind;
        let _done = DoneGuard::new(ctx, kind);
        let publisher = match self.spec.send {
            Some(format) => Some((
                format,
                ctx.publisher(kind)
                    .ok_or_else(|| BioemusError::invalid_state(format!("no bus endpoint for {kind}")))?,
            )),
            None => None,
        };
        let len = self.spec.transfer_bytes;

        self.state = LoopState::Running;
        info!("{kind}: receiving {:?} transfers of {len} bytes", self.spec.count);
        let pumped = self.pump(ctx, publisher);
        let finished = self.sink.take().map_or(Ok(()), Sink::finish);
        self.state = LoopState::Stopped;
        if let Err(e) = pumped {
            if let Err(f) = finished {
                error!("{kind}: closing output after failure: {f}");
            }
            return Err(e);
        }
        finished?;

        info!("{kind}: {} transfers done", self.transfers);
        Ok(LoopReport {
            kind,
            transfers: self.transfers,
            bytes: self.transfers * len as u64,
            stopped_early: self.stopped_early,
        })
    }

    fn pump(&mut self, ctx: &RunContext, publisher: Option<(OutputFormat, &dyn Publisher)>) -> Result<()> {
        let kind = self.spec.kind;
        let len = self.spec.transfer_bytes;
        let slots = self.channel.slot_count();
        while !self.complete() {
            if ctx.stop().is_stop_requested() {
                self.state = LoopState::Draining;
                self.stopped_early = true;
                debug!("{kind}: stop requested after {} transfers", self.transfers);
                break;
            }
            self.channel.transfer(self.slot, len)?;
            let payload = self.channel.payload(self.slot, len)?;
            if let Some(sink) = self.sink.as_mut() {
                sink.write_payload(payload)?;
            }
            if let Some((format, endpoint)) = publisher {
                forward(kind, format, payload, self.neurons, endpoint)?;
            }
            self.transfers += 1;
            self.slot = (self.slot + 1) % slots;
        }
        Ok(())
    }
}

fn forward(
    kind: StreamKind,
    format: OutputFormat,
    payload: &[u8],
    neurons: u32,
    endpoint: &dyn Publisher,
) -> Result<()> {
    match (kind, format) {
        (StreamKind::Spikes, OutputFormat::Text) => {
            endpoint.send(&counts_to_bytes(&SpikeFrames::new(payload, neurons).counts()))
        }
        _ => endpoint.send(payload),
    }
}
