//! Board-less transports for `run --simulate`
//!
//! DMA channels are simulated and complete at the pace the fabric would
//! produce data; bus endpoints are real ZeroMQ sockets so external
//! subscribers and stimulus sources can be exercised on a workstation.

use bioemus_driver::dma::proxy::{BUFFER_SIZE, RX_BUFFER_COUNT, TX_BUFFER_COUNT};
use bioemus_driver::dma::SlotStatus;
use bioemus_driver::{
    DmaTransport, Publisher, Result, SimDmaChannel, StreamKind, Subscriber, Transports,
    ZmqPublisher, ZmqSubscriber,
};
use bioemus_hw::frames::{spike_frame_bytes, SPIKE_SUBSAMPLING};
use bioemus_hw::HwGeometry;
use std::time::Duration;

/// Simulated DMA channels plus ZeroMQ endpoints.
pub struct SimTransports {
    geometry: HwGeometry,
    spike_frames: u32,
    vmem_steps: u32,
    context: zmq::Context,
}

impl SimTransports {
    /// Transports pacing spike transfers of `spike_frames` frames and vmem
    /// transfers of `vmem_steps` steps in emulated real time.
    pub fn new(geometry: HwGeometry, spike_frames: u32, vmem_steps: u32) -> Self {
        Self {
            geometry,
            spike_frames,
            vmem_steps,
            context: zmq::Context::new(),
        }
    }

    fn pace(&self, steps: u32) -> Duration {
        Duration::from_secs_f64(self.geometry.time_step_ms * f64::from(steps) / 1000.0)
    }
}

impl Transports for SimTransports {
    fn open_channel(&mut self, kind: StreamKind) -> Result<Box<dyn DmaTransport>> {
        let channel = match kind {
            StreamKind::Spikes => {
                let neurons = self.geometry.neurons;
                let frame = spike_frame_bytes(neurons);
                SimDmaChannel::new("sim_rx_spk", RX_BUFFER_COUNT, BUFFER_SIZE)
                    .with_latency(self.pace(self.spike_frames * SPIKE_SUBSAMPLING))
                    .with_device(move |seq, buf| {
                        fill_spike_frames(seq, buf, frame, neurons);
                        SlotStatus::Ok
                    })
            }
            StreamKind::Vmem => SimDmaChannel::new("sim_rx_vmem", RX_BUFFER_COUNT, BUFFER_SIZE)
                .with_latency(self.pace(self.vmem_steps)),
            StreamKind::Stimulus => SimDmaChannel::new("sim_tx_ext_stim", TX_BUFFER_COUNT, BUFFER_SIZE),
        };
        Ok(Box::new(channel))
    }

    fn bind_publisher(&mut self, _kind: StreamKind, endpoint: &str) -> Result<Box<dyn Publisher>> {
        Ok(Box::new(ZmqPublisher::bind(&self.context, endpoint)?))
    }

    fn connect_subscriber(&mut self, endpoint: &str) -> Result<Box<dyn Subscriber>> {
        Ok(Box::new(ZmqSubscriber::connect(&self.context, endpoint)?))
    }
}

/// One neuron fires per frame, sweeping the core.
#[allow(clippy::cast_possible_truncation)]
fn fill_spike_frames(seq: u64, buf: &mut [u8], frame: usize, neurons: u32) {
    let per_transfer = (buf.len() / frame) as u64;
    for (i, chunk) in buf.chunks_exact_mut(frame).enumerate() {
        let index = seq * per_transfer + i as u64;
        let time = (index * u64::from(SPIKE_SUBSAMPLING)) as u32;
        let neuron = (index % u64::from(neurons)) as usize;
        chunk.fill(0);
        chunk[..4].copy_from_slice(&time.to_le_bytes());
        let word = 4 + 4 * (neuron / 32);
        chunk[word..word + 4].copy_from_slice(&(1u32 << (neuron % 32)).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioemus_hw::frames::SpikeFrames;

    #[test]
    fn sweep_advances_across_transfers() {
        let frame = spike_frame_bytes(64);
        let mut buf = vec![0xFF; 3 * frame];
        fill_spike_frames(1, &mut buf, frame, 64);
        let events: Vec<_> = SpikeFrames::new(&buf, 64).events().collect();
        assert_eq!(events.len(), 3);
        assert_eq!((events[0].time, events[0].neuron), (96, 3));
        assert_eq!((events[2].time, events[2].neuron), (160, 5));
    }
}
