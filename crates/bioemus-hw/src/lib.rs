//! Hardware model of the BioemuS emulation core.
//!
//! This crate has **no hardware access** and no `unsafe`. It is a
//! pure model of the FPGA build the host talks to: register indices and bit
//! positions, the signed fixed-point formats every register uses, the
//! synaptic RAM geometry, and the layout of the monitoring frames streamed
//! back over DMA.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | AXI-Lite register map (63 write, 9 read) and bit definitions |
//! | [`fixed`] | Q(I.F) codec shared by every numeric register |
//! | [`params`] | HH / synapse parameter field ids and their encodings |
//! | [`geometry`] | Hardware build parameters (neurons, table depths, RAM banks) |
//! | [`synram`] | Synaptic matrix → RAM bank mapping and image packing |
//! | [`frames`] | Spike / vmem frame layout and decoders |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod fixed;
pub mod frames;
pub mod geometry;
pub mod params;
pub mod regs;
pub mod synram;

pub use fixed::QFormat;
pub use geometry::{GeometryError, HwGeometry, SynRamGeometry};
pub use synram::WeightSlot;

/// Hardware version this model was established against.
pub const HW_VERSION: &str = "0.1.1";

/// FPGA architecture of the reference build.
pub const HW_FPGA_ARCH: &str = "ZYNQMP";
