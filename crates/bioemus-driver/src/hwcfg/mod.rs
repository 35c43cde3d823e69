//! Hardware configuration: file parser and handshake uploader
//!
//! [`HwConfig`] holds the parsed tables; [`ConfigProgrammer`] writes them
//! into the emulation core's RAM banks. Parsing completes before the first
//! register write, so a malformed file never leaves the core half loaded.

pub mod parser;
pub mod programmer;

pub use parser::{HwConfig, Synapse, SynapseMatrix};
pub use programmer::{ConfigProgrammer, NoiseSeeds};
