//! Synaptic matrix → RAM bank mapping.
//!
//! The `N × N` (source, destination) matrix of 16-bit entries is consumed by
//! `lanes` parallel multiply units. Destination `d` is served by lane
//! `d % lanes`; each lane owns three adjacent 16-bit sub-words of every RAM
//! row. Within a lane, destinations are stacked in groups of `lanes`, and
//! for each destination the `N` sources run through the sub-words before
//! advancing to the next row:
//!
//! ```text
//! p       = (dest / lanes) * N + src
//! address = p / 3
//! subword = p % 3
//! ```
//!
//! A full row is `lanes × 3 × 16` bits, which is exactly `banks × width`
//! bits. The little-endian byte stream of a row is cut into `banks` windows
//! of `width / 8` bytes, so the bank a sub-word lands in follows from its
//! byte offset.

use crate::geometry::SynRamGeometry;

/// Position of one synapse in the RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeightSlot {
    /// RAM row.
    pub address: u32,
    /// Multiply lane.
    pub lane: u32,
    /// 16-bit sub-word within the lane (0..3).
    pub subword: u8,
}

impl WeightSlot {
    /// Index of this entry in the row-major `u16` image.
    #[must_use]
    pub const fn entry_index(&self, geometry: &SynRamGeometry) -> usize {
        let per_row = geometry.lanes * SynRamGeometry::SUBWORDS;
        self.address as usize * per_row as usize
            + (self.lane * SynRamGeometry::SUBWORDS) as usize
            + self.subword as usize
    }

    /// Bank holding the low byte of this entry.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn bank(&self, geometry: &SynRamGeometry) -> u16 {
        let byte = ((self.lane * SynRamGeometry::SUBWORDS) as usize + self.subword as usize) * 2;
        (byte / geometry.bank_bytes()) as u16
    }
}

/// Map `(src, dest)` of an `neurons × neurons` matrix onto the RAM.
///
/// Callers are expected to have validated `geometry` for `neurons`; indices
/// outside `0..neurons` give slots past the populated region.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn locate(src: u32, dest: u32, neurons: u32, geometry: &SynRamGeometry) -> WeightSlot {
    let p = (dest / geometry.lanes) as u64 * neurons as u64 + src as u64;
    WeightSlot {
        address: (p / SynRamGeometry::SUBWORDS as u64) as u32,
        lane: dest % geometry.lanes,
        subword: (p % SynRamGeometry::SUBWORDS as u64) as u8,
    }
}

/// Inverse of [`locate`]: recover `(src, dest)` from a slot.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn source_of(slot: WeightSlot, neurons: u32, geometry: &SynRamGeometry) -> (u32, u32) {
    let p = slot.address as u64 * SynRamGeometry::SUBWORDS as u64 + slot.subword as u64;
    let src = (p % neurons as u64) as u32;
    let dest = (p / neurons as u64) as u32 * geometry.lanes + slot.lane;
    (src, dest)
}

/// Byte image of the whole synaptic RAM, row after row.
#[derive(Clone)]
pub struct SynRamImage {
    geometry: SynRamGeometry,
    bytes: Vec<u8>,
}

impl SynRamImage {
    /// Zeroed image covering the full RAM depth.
    #[must_use]
    pub fn new(geometry: SynRamGeometry) -> Self {
        let len = geometry.row_bytes() * geometry.depth as usize;
        Self {
            geometry,
            bytes: vec![0; len],
        }
    }

    /// RAM organisation of this image.
    #[must_use]
    pub const fn geometry(&self) -> &SynRamGeometry {
        &self.geometry
    }

    /// Store a 16-bit entry.
    pub fn set(&mut self, slot: WeightSlot, entry: u16) {
        let at = slot.entry_index(&self.geometry) * 2;
        self.bytes[at..at + 2].copy_from_slice(&entry.to_le_bytes());
    }

    /// Read back a 16-bit entry.
    #[must_use]
    pub fn get(&self, slot: WeightSlot) -> u16 {
        let at = slot.entry_index(&self.geometry) * 2;
        u16::from_le_bytes([self.bytes[at], self.bytes[at + 1]])
    }

    /// Staging words for `bank` of row `address`: bytes 0..4, 4..8 and the
    /// remaining bytes of the bank window, each little-endian.
    #[must_use]
    pub fn bank_words(&self, address: u32, bank: u16) -> [u32; 3] {
        let width = self.geometry.bank_bytes();
        let start = (address as usize * usize::from(self.geometry.banks) + usize::from(bank)) * width;
        let window = &self.bytes[start..start + width];
        let mut words = [0u32; 3];
        for (i, chunk) in window.chunks(4).take(3).enumerate() {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            words[i] = u32::from_le_bytes(buf);
        }
        words
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SynRamImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynRamImage")
            .field("geometry", &self.geometry)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
