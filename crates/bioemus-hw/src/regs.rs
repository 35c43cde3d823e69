//! AXI-Lite register map of the emulation core (core 0).
//!
//! Indices are 32-bit word offsets into the register window, seen from the
//! host: "write" registers are driven by the host and read by the fabric,
//! "read" registers are driven by the fabric. Read registers follow the
//! write registers, so read index `i` lives at word `WRITE_COUNT + k`.
//!
//! ```text
//! 0x00 ── 0x3E   63 write registers  (control, staging, addresses, enables)
//! 0x3F ── 0x47    9 read registers   (vmem sample, last-accepted addresses)
//! ```
//!
//! Any change to the fabric register map needs a matching change here.

// ── Window ───────────────────────────────────────────────────────────────────

/// Physical base address of the register window on ZynqMP.
pub const BASE_ADDR_ZYNQMP: u64 = 0xA002_0000;
/// Size of the mapped window in bytes.
pub const RANGE_ZYNQMP: usize = 0x0001_0000;

/// Number of host-written registers.
pub const WRITE_COUNT: u16 = 63;
/// Number of fabric-written registers.
pub const READ_COUNT: u16 = 9;

// ── Write registers ──────────────────────────────────────────────────────────

/// Global control (reset, core enable, stimulation trigger).
pub const CONTROL: u16 = 0;
/// Monitoring control (stream enables, selection write-enables).
pub const CONTROL_MON: u16 = 1;
/// Synapse-rate table write-enables.
pub const SETUP_SYN: u16 = 2;
/// Ion-rate m table write-enables (bit per table).
pub const WEN_IONRATE_M: u16 = 3;
/// Ion-rate h table write-enables (bit per table).
pub const WEN_IONRATE_H: u16 = 4;
/// HH parameter RAM write-enable.
pub const WEN_HHPARAM: u16 = 5;
/// Synaptic RAM write-enables, banks 0..32.
pub const WEN_TWSYN_LSB: u16 = 6;
/// Synaptic RAM write-enables, banks 32..64.
pub const WEN_TWSYN_MSB: u16 = 7;
/// Monitoring selection RAM address.
pub const WADDR_SEL_MON: u16 = 8;
/// Ion-rate table address.
pub const WADDR_IONRATE: u16 = 9;
/// HH parameter RAM address.
pub const WADDR_HHPARAM: u16 = 10;
/// Bv synapse-rate table address.
pub const WADDR_SYNRATE_BV: u16 = 11;
/// Tv synapse-rate table address.
pub const WADDR_SYNRATE_TV: u16 = 12;
/// GABAb sigmoid table address.
pub const WADDR_SN_GABAB: u16 = 13;
/// Synaptic RAM row address.
pub const WADDR_TWSYN: u16 = 14;
/// Spike packets per monitoring frame.
pub const NB_PACKETS_MON_SPK: u16 = 15;
/// Vmem packets per monitoring frame.
pub const NB_PACKETS_MON_VMEM: u16 = 16;
/// Noise generator seeds (4 consecutive registers).
pub const NOISE_SEED_BASE: u16 = 17;
/// Number of noise seed registers.
pub const NOISE_SEED_COUNT: u16 = 4;
/// m rate 1 staging.
pub const RATE1_M: u16 = 21;
/// m rate 2 staging.
pub const RATE2_M: u16 = 22;
/// h rate 1 staging.
pub const RATE1_H: u16 = 23;
/// h rate 2 staging.
pub const RATE2_H: u16 = 24;
/// Initial membrane voltage seen by the synapses (truncated format).
pub const V_INIT_SYN_SFI: u16 = 25;
/// Bv synapse-rate staging.
pub const SYNRATE_BV: u16 = 26;
/// Tv synapse-rate staging.
pub const SYNRATE_TV: u16 = 27;
/// GABAb sigmoid staging.
pub const SN_GABAB: u16 = 28;
/// Synapse inhibit; write 0 to activate synapses.
pub const INH_TSYN: u16 = 29;
/// Synapse-type parameter word (wen | field | data).
pub const SETUP_PSYN: u16 = 30;
/// Synaptic RAM staging words (72-bit row slice split over 3 registers).
pub const TWSYN: [u16; 3] = [31, 32, 33];
/// Monitoring selection data.
pub const SEL_MON: u16 = 34;
/// Stimulation width in time steps.
pub const STIM_WIDTH: u16 = 35;
/// Stimulation delay in time steps.
pub const STIM_DELAY: u16 = 36;
/// User LEDs (progress indicator).
pub const USER_LEDS: u16 = 37;
/// DAC channel neuron selection (8 consecutive registers).
pub const SEL_MON_DAC_BASE: u16 = 38;
/// HH parameter staging (16 consecutive registers).
pub const HHPARAM_BASE: u16 = 47;

// ── Read registers ───────────────────────────────────────────────────────────

/// Membrane voltage sample.
pub const V_NEW: u16 = 63;
/// Last accepted monitoring selection address.
pub const WADDR_SEL_MON_LP: u16 = 64;
/// Last accepted ion-rate address.
pub const WADDR_IONRATE_LP: u16 = 65;
/// Last accepted HH parameter address.
pub const WADDR_HHPARAM_LP: u16 = 66;
/// Last accepted Bv synapse-rate address.
pub const WADDR_SYNRATE_BV_LP: u16 = 67;
/// Last accepted Tv synapse-rate address.
pub const WADDR_SYNRATE_TV_LP: u16 = 68;
/// Last accepted GABAb sigmoid address.
pub const WADDR_SN_GABAB_LP: u16 = 69;
/// Last accepted synapse-type parameter field.
pub const WADDR_SETUP_PSYN_LP: u16 = 70;
/// Last accepted synaptic RAM row.
pub const WADDR_TWSYN_LP: u16 = 71;

// ── Bit definitions ──────────────────────────────────────────────────────────

/// `CONTROL` bits.
pub mod control {
    /// Core reset (active high).
    pub const RESET: u32 = 1 << 0;
    /// Calculation core enable.
    pub const ENABLE_CORE: u32 = 1 << 1;
    /// Stimulation trigger from the host; cleared to arm the edge detector.
    pub const STIM_TRIGGER: u32 = 1 << 2;
}

/// `CONTROL_MON` bits.
pub mod control_mon {
    /// Vmem DMA stream enable.
    pub const EN_VMEM: u32 = 1 << 0;
    /// Spike DMA stream enable.
    pub const EN_SPIKES: u32 = 1 << 1;
    /// DAC waveform output enable.
    pub const EN_DAC: u32 = 1 << 2;
    /// Vmem selection RAM write-enable.
    pub const WEN_SEL_VMEM: u32 = 1 << 3;
    /// Spike selection RAM write-enable.
    pub const WEN_SEL_SPIKES: u32 = 1 << 4;
}

/// `SETUP_SYN` bits.
pub mod setup_syn {
    /// Bv rate table write-enable.
    pub const WEN_BV_RATE: u32 = 1 << 0;
    /// Tv rate table write-enable.
    pub const WEN_TV_RATE: u32 = 1 << 1;
    /// GABAb sigmoid table write-enable.
    pub const WEN_SN_GABAB: u32 = 1 << 2;
    /// All three tables at once.
    pub const WEN_ALL: u32 = WEN_BV_RATE | WEN_TV_RATE | WEN_SN_GABAB;
}

/// `SEL_MON` bits.
pub mod sel_mon {
    /// Neuron feeds the vmem stream.
    pub const VMEM: u32 = 1 << 0;
    /// Neuron feeds the spike stream.
    pub const SPIKES: u32 = 1 << 1;
}

/// `SETUP_PSYN` word layout.
pub mod psyn {
    /// Write-enable bit.
    pub const WEN: u32 = 1 << 31;
    /// Width of the fixed-point data field.
    pub const DATA_WIDTH: u32 = 26;
    /// Width of the field-index selector.
    pub const SEL_WIDTH: u32 = 5;

    /// Pack a field index and encoded value into a `SETUP_PSYN` word
    /// (write-enable cleared).
    #[must_use]
    pub const fn pack(field: u8, raw: i32) -> u32 {
        let sel = (field as u32) & ((1 << SEL_WIDTH) - 1);
        #[allow(clippy::cast_sign_loss)]
        let data = (raw as u32) & ((1 << DATA_WIDTH) - 1);
        (sel << DATA_WIDTH) | data
    }
}

/// Whether `index` addresses a host-written register.
#[must_use]
pub const fn is_write(index: u16) -> bool {
    index < WRITE_COUNT
}

/// Whether `index` addresses any register of the window.
#[must_use]
pub const fn is_valid(index: u16) -> bool {
    index < WRITE_COUNT + READ_COUNT
}
