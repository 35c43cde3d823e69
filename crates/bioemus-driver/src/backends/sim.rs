//! Simulated register window
//!
//! Stands in for the emulation core's AXI-Lite window so that configuration
//! upload, run control and monitoring selection can be exercised without a
//! board. Write registers read back what was written. Handshake tables are
//! modelled by [`AckRule`]s: a rising edge on a rule's write-enable bits makes
//! the fabric "consume" the staged row the next time the host polls the
//! rule's acknowledgement register, at which point the row address is copied
//! into that register.
//!
//! Host writes and accepted rows, each with a snapshot of the write
//! registers, are only recorded after [`SimRegisterFile::with_journal`]; a
//! full configuration upload accepts hundreds of thousands of rows.
//!
//! Clones share state, so a test can keep a handle for inspection after
//! handing the register file to the code under test.

use crate::backend::{BackendType, RegisterAccess, RegisterLayout};
use crate::error::Result;
use bioemus_hw::regs;
use parking_lot::Mutex;
use std::sync::Arc;

/// Where the accepted address comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    /// Value of a write register.
    Register(u16),
    /// Bit field of the enable word itself (`(word >> shift) & mask`).
    EnableField {
        /// Right shift.
        shift: u32,
        /// Mask after shifting.
        mask: u32,
    },
}

/// One handshake table of the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRule {
    /// Register carrying the write-enable bits.
    pub enable_register: u16,
    /// Bits of `enable_register` that trigger an acceptance on a rising edge.
    pub enable_mask: u32,
    /// Acknowledgement registers and the address each reflects.
    pub acks: Vec<(u16, AddressSource)>,
}

impl AckRule {
    fn simple(enable_register: u16, enable_mask: u32, address: u16, ack: u16) -> Self {
        Self {
            enable_register,
            enable_mask,
            acks: vec![(ack, AddressSource::Register(address))],
        }
    }

    /// Handshake tables of emulation core 0.
    #[must_use]
    pub fn core0() -> Vec<Self> {
        use bioemus_hw::regs::{control_mon, psyn, setup_syn};
        vec![
            Self::simple(regs::WEN_HHPARAM, 1, regs::WADDR_HHPARAM, regs::WADDR_HHPARAM_LP),
            Self::simple(
                regs::WEN_IONRATE_M,
                u32::MAX,
                regs::WADDR_IONRATE,
                regs::WADDR_IONRATE_LP,
            ),
            Self {
                enable_register: regs::SETUP_SYN,
                enable_mask: setup_syn::WEN_ALL,
                acks: vec![
                    (
                        regs::WADDR_SYNRATE_BV_LP,
                        AddressSource::Register(regs::WADDR_SYNRATE_BV),
                    ),
                    (
                        regs::WADDR_SYNRATE_TV_LP,
                        AddressSource::Register(regs::WADDR_SYNRATE_TV),
                    ),
                    (
                        regs::WADDR_SN_GABAB_LP,
                        AddressSource::Register(regs::WADDR_SN_GABAB),
                    ),
                ],
            },
            Self {
                enable_register: regs::SETUP_PSYN,
                enable_mask: psyn::WEN,
                acks: vec![(
                    regs::WADDR_SETUP_PSYN_LP,
                    AddressSource::EnableField {
                        shift: psyn::DATA_WIDTH,
                        mask: (1 << psyn::SEL_WIDTH) - 1,
                    },
                )],
            },
            Self::simple(
                regs::WEN_TWSYN_LSB,
                u32::MAX,
                regs::WADDR_TWSYN,
                regs::WADDR_TWSYN_LP,
            ),
            Self::simple(
                regs::WEN_TWSYN_MSB,
                u32::MAX,
                regs::WADDR_TWSYN,
                regs::WADDR_TWSYN_LP,
            ),
            Self::simple(
                regs::CONTROL_MON,
                control_mon::WEN_SEL_VMEM | control_mon::WEN_SEL_SPIKES,
                regs::WADDR_SEL_MON,
                regs::WADDR_SEL_MON_LP,
            ),
        ]
    }
}

/// One row consumed by the simulated fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    /// Enable register whose edge triggered the acceptance.
    pub enable_register: u16,
    /// Accepted address.
    pub address: u32,
    /// Write registers at acceptance time.
    pub snapshot: Vec<u32>,
}

#[derive(Debug)]
struct SimState {
    values: Vec<u32>,
    rules: Vec<AckRule>,
    pending: Vec<bool>,
    ack_enabled: bool,
    journal: bool,
    acceptances: Vec<Acceptance>,
    writes: Vec<(u16, u32)>,
}

/// Simulated register window.
#[derive(Debug, Clone)]
pub struct SimRegisterFile {
    layout: RegisterLayout,
    state: Arc<Mutex<SimState>>,
}

impl SimRegisterFile {
    /// Core 0 layout with its handshake tables.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rules(RegisterLayout::CORE0, AckRule::core0())
    }

    /// Custom layout and handshake tables.
    #[must_use]
    pub fn with_rules(layout: RegisterLayout, rules: Vec<AckRule>) -> Self {
        let pending = vec![false; rules.len()];
        Self {
            layout,
            state: Arc::new(Mutex::new(SimState {
                values: vec![0; usize::from(layout.total())],
                rules,
                pending,
                ack_enabled: true,
                journal: false,
                acceptances: Vec::new(),
                writes: Vec::new(),
            })),
        }
    }

    /// Record host writes and accepted rows from now on.
    #[must_use]
    pub fn with_journal(self) -> Self {
        self.state.lock().journal = true;
        self
    }

    /// Stop (or resume) acknowledging handshakes.
    pub fn set_ack_enabled(&self, enabled: bool) {
        self.state.lock().ack_enabled = enabled;
    }

    /// Rows consumed so far (journal only).
    #[must_use]
    pub fn acceptances(&self) -> Vec<Acceptance> {
        self.state.lock().acceptances.clone()
    }

    /// Number of rows consumed so far.
    #[must_use]
    pub fn acceptance_count(&self) -> usize {
        self.state.lock().acceptances.len()
    }

    /// Every host write, in order (journal only).
    #[must_use]
    pub fn writes(&self) -> Vec<(u16, u32)> {
        self.state.lock().writes.clone()
    }

    /// Current value of any register.
    #[must_use]
    pub fn value(&self, index: u16) -> u32 {
        self.state
            .lock()
            .values
            .get(usize::from(index))
            .copied()
            .unwrap_or(0)
    }

    /// Force a fabric-side register value.
    pub fn set_value(&self, index: u16, value: u32) {
        if let Some(slot) = self.state.lock().values.get_mut(usize::from(index)) {
            *slot = value;
        }
    }

    /// Forget journalled writes and acceptances.
    pub fn clear_journal(&self) {
        let mut state = self.state.lock();
        state.acceptances.clear();
        state.writes.clear();
    }
}

impl Default for SimRegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    fn latch(&mut self, rule_index: usize, write_count: u16) {
        let rule = &self.rules[rule_index];
        let enable_word = self.values[usize::from(rule.enable_register)];
        let mut accepted = None;
        for &(ack, source) in &rule.acks {
            let address = match source {
                AddressSource::Register(r) => self.values[usize::from(r)],
                AddressSource::EnableField { shift, mask } => (enable_word >> shift) & mask,
            };
            self.values[usize::from(ack)] = address;
            accepted.get_or_insert(address);
        }
        let enable_register = rule.enable_register;
        let address = accepted.unwrap_or_default();
        tracing::trace!("sim: register {enable_register} accepted address {address}");
        if self.journal {
            let snapshot = self.values[..usize::from(write_count)].to_vec();
            self.acceptances.push(Acceptance {
                enable_register,
                address,
                snapshot,
            });
        }
        self.pending[rule_index] = false;
    }
}

impl RegisterAccess for SimRegisterFile {
    fn layout(&self) -> RegisterLayout {
        self.layout
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Simulated
    }

    fn write_raw(&mut self, index: u16, value: u32) -> Result<()> {
        self.layout.check_write(index)?;
        let mut state = self.state.lock();
        let old = state.values[usize::from(index)];
        state.values[usize::from(index)] = value;
        if state.journal {
            state.writes.push((index, value));
        }

        let rising: Vec<usize> = state
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enable_register == index && (value & !old & r.enable_mask) != 0)
            .map(|(i, _)| i)
            .collect();
        for i in rising {
            state.pending[i] = true;
        }
        Ok(())
    }

    fn read_raw(&self, index: u16) -> Result<u32> {
        self.layout.check_read(index)?;
        let mut state = self.state.lock();
        if state.ack_enabled {
            let due: Vec<usize> = state
                .rules
                .iter()
                .enumerate()
                .filter(|(i, r)| state.pending[*i] && r.acks.iter().any(|(a, _)| *a == index))
                .map(|(i, _)| i)
                .collect();
            for i in due {
                state.latch(i, self.layout.write_count);
            }
        }
        Ok(state.values[usize::from(index)])
    }
}
