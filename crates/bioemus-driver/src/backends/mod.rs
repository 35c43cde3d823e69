//! Register window backends
//!
//! Two backends available:
//! - **RegisterFile**: `/dev/mem` mapping of the AXI-Lite window (target board)
//! - **SimRegisterFile**: in-process model with handshake acknowledgement (CI)
//!
//! [`mmap::MmapRegion`] is shared with the DMA proxy channels.

pub mod mmap;
pub mod register_file;
pub mod sim;

pub use register_file::RegisterFile;
pub use sim::{AckRule, Acceptance, AddressSource, SimRegisterFile};
