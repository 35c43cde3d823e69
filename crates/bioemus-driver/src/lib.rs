//! Host driver for the BioemuS FPGA neuromorphic emulator.
//!
//! The emulation core computes Hodgkin-Huxley neurons and their synapses in
//! real time. This crate is everything the host does around it: program the
//! parameter tables, drive run control, and pull spike and membrane-voltage
//! telemetry out of the DMA rings while the run is in progress.
//!
//! # Layers
//!
//! ```text
//! Session            : one run, bring-up to teardown (control thread)
//!   ├─ ConfigProgrammer   hwcfg file → handshake table uploads
//!   ├─ RunControl         reset / enable / stimulation trigger / LEDs
//!   ├─ MonitoringControl  vmem, DAC and spike selection
//!   └─ StreamingEngine    one thread per DMA loop, shared RunContext
//!
//! RegisterAccess     : RegisterFile (/dev/mem) | SimRegisterFile
//! DmaTransport       : DmaChannel (dma-proxy)   | SimDmaChannel
//! Publisher/Subscriber : ZeroMQ PUSH/PULL       | in-memory bus
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use bioemus_driver::{DeviceTransports, RegisterFile, RunSettings, Session, SessionOptions, StopHandle};
//! use bioemus_hw::HwGeometry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings: RunSettings = serde_json::from_str(&std::fs::read_to_string("swconfig.json")?)?;
//! let regs = RegisterFile::open_core0()?;
//! let mut session = Session::new(regs, HwGeometry::REFERENCE, SessionOptions::default())?;
//! let report = session.run(&settings, &mut DeviceTransports::new(), &StopHandle::new())?;
//! println!("{} loops, {:?}", report.loops.len(), report.elapsed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
pub mod bus;
pub mod control;
pub mod dma;
mod error;
pub mod handshake;
pub mod hwcfg;
pub mod monitoring;
pub mod session;
pub mod settings;
pub mod stream;

pub use backend::{BackendType, RegisterAccess, RegisterLayout};
pub use backends::{RegisterFile, SimRegisterFile};
pub use bus::{memory_bus, Publisher, Subscriber, ZmqPublisher, ZmqSubscriber};
pub use control::RunControl;
pub use dma::{DmaChannel, DmaTransport, SimDmaChannel, SlotStatus};
pub use error::{BioemusError, Result};
pub use handshake::HandshakePolicy;
pub use hwcfg::{ConfigProgrammer, HwConfig, NoiseSeeds};
pub use monitoring::MonitoringControl;
pub use session::{DeviceTransports, RunReport, Session, SessionOptions, Transports};
pub use settings::RunSettings;
pub use stream::{
    Endpoints, LoopReport, OutputFormat, RunContext, StopHandle, StreamKind, StreamingEngine,
    TransferPlan,
};

/// Host software version.
pub const SW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BioemusError, DeviceTransports, HandshakePolicy, NoiseSeeds, RegisterAccess, RegisterFile,
        Result, RunSettings, Session, SessionOptions, SimRegisterFile, StopHandle, StreamKind,
    };
}
