//! Monitoring frame layout.
//!
//! ## Spike frames
//!
//! ```text
//! word 0        timestamp
//! word 1 + k    bitfield k, bit b set → neuron 32k + b spiked
//! ```
//!
//! One frame covers [`SPIKE_SUBSAMPLING`] time steps. Words are
//! little-endian in the DMA payload.
//!
//! ## Vmem frames
//!
//! One 32-bit timestamp followed by [`VMEM_CHANNELS`] 32-bit samples per
//! time step.

/// Time steps aggregated into one spike frame.
pub const SPIKE_SUBSAMPLING: u32 = 32;
/// Maximum spike frames per monitoring packet.
pub const MAX_SPIKE_PACKETS: u32 = 256;
/// Vmem DMA channels.
pub const VMEM_CHANNELS: usize = 16;
/// Maximum vmem frames per monitoring packet.
pub const MAX_VMEM_PACKETS: u32 = 480;
/// DAC waveform channels.
pub const DAC_CHANNELS: usize = 8;

/// Bytes of one spike frame for `neurons`.
#[must_use]
pub const fn spike_frame_bytes(neurons: u32) -> usize {
    (32 + neurons as usize) / 8
}

/// Bytes of one vmem frame.
#[must_use]
pub const fn vmem_frame_bytes() -> usize {
    (32 + 32 * VMEM_CHANNELS) / 8
}

/// One (timestamp, neuron) spike event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpikeEvent {
    /// Frame timestamp.
    pub time: u32,
    /// Neuron id.
    pub neuron: u32,
}

fn word_at(bytes: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// View over a payload of whole spike frames.
#[derive(Debug, Clone, Copy)]
pub struct SpikeFrames<'a> {
    bytes: &'a [u8],
    words_per_frame: usize,
}

impl<'a> SpikeFrames<'a> {
    /// Wrap `payload` for `neurons`. A trailing partial frame is ignored.
    #[must_use]
    pub fn new(payload: &'a [u8], neurons: u32) -> Self {
        let words_per_frame = 1 + (neurons / 32) as usize;
        let whole = payload.len() / (words_per_frame * 4) * words_per_frame * 4;
        Self {
            bytes: &payload[..whole],
            words_per_frame,
        }
    }

    /// Number of whole frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / (self.words_per_frame * 4)
    }

    /// Whether there is no whole frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Timestamp of frame `i`.
    #[must_use]
    pub fn timestamp(&self, i: usize) -> u32 {
        word_at(self.bytes, i * self.words_per_frame)
    }

    /// Every spike event, frame by frame, neurons ascending.
    pub fn events(&self) -> impl Iterator<Item = SpikeEvent> + 'a {
        let bytes = self.bytes;
        let wpf = self.words_per_frame;
        let frames = self.len();
        (0..frames).flat_map(move |f| {
            let base = f * wpf;
            let time = word_at(bytes, base);
            (0..wpf - 1).flat_map(move |k| {
                let mut bits = word_at(bytes, base + 1 + k);
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let b = bits.trailing_zeros();
                    bits &= bits - 1;
                    #[allow(clippy::cast_possible_truncation)]
                    let neuron = (k as u32) * 32 + b;
                    Some(SpikeEvent { time, neuron })
                })
            })
        })
    }

    /// Per-neuron spike count across all frames.
    #[must_use]
    pub fn counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; (self.words_per_frame - 1) * 32];
        for ev in self.events() {
            counts[ev.neuron as usize] += 1;
        }
        counts
    }
}

/// Little-endian byte encoding of a per-neuron count vector.
#[must_use]
pub fn counts_to_bytes(counts: &[u32]) -> Vec<u8> {
    counts.iter().flat_map(|c| c.to_le_bytes()).collect()
}
