//! Handshake write protocol
//!
//! Tables in the fabric run on their own clock domain. Each row goes in as:
//!
//! 1. data into the staging registers (done by the caller)
//! 2. row address into the address register(s)
//! 3. write-enable bit(s) raised
//! 4. poll the "last accepted" register until it reads the address
//! 5. write-enable bit(s) cleared
//!
//! Step 4 is bounded by a [`HandshakePolicy`]; a row that is never
//! acknowledged fails with [`BioemusError::HandshakeTimeout`] instead of
//! hanging the control thread.

use crate::backend::RegisterAccess;
use crate::error::{BioemusError, Result};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Bounds for the acknowledgement poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// Give up after this long.
    pub timeout: Duration,
    /// Yield the CPU every `yield_interval` polls.
    pub yield_interval: u32,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
            yield_interval: 1_000,
        }
    }
}

/// One write-enable bit group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEnable {
    /// Register holding the bits.
    pub register: u16,
    /// Bits to raise for this row.
    pub mask: u32,
}

/// Registers that describe one handshake table.
#[derive(Debug, Clone, Copy)]
pub struct RowTarget<'a> {
    /// Registers receiving the row address.
    pub address_registers: &'a [u16],
    /// Enable bits raised in order, then cleared in order.
    pub enables: &'a [WriteEnable],
    /// "Last accepted" register polled for the address.
    pub ack_register: u16,
}

/// Shadowed write-enable registers plus the acknowledgement poll.
///
/// Enable registers are written read-modify-write through a shadow so that
/// raising one table's bits never disturbs other bits of the same register.
#[derive(Debug, Default)]
pub struct WriteProtocol {
    policy: HandshakePolicy,
    shadows: BTreeMap<u16, u32>,
}

impl WriteProtocol {
    /// Protocol with the given poll bounds.
    #[must_use]
    pub fn new(policy: HandshakePolicy) -> Self {
        Self {
            policy,
            shadows: BTreeMap::new(),
        }
    }

    /// Poll bounds in use.
    #[must_use]
    pub const fn policy(&self) -> HandshakePolicy {
        self.policy
    }

    /// Current shadow of an enable register.
    #[must_use]
    pub fn shadow(&self, register: u16) -> u32 {
        self.shadows.get(&register).copied().unwrap_or(0)
    }

    /// Set bits of a shadowed register and write it.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn set_bits<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        register: u16,
        mask: u32,
    ) -> Result<()> {
        let value = self.shadow(register) | mask;
        self.shadows.insert(register, value);
        regs.write_raw(register, value)
    }

    /// Clear bits of a shadowed register and write it.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn clear_bits<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        register: u16,
        mask: u32,
    ) -> Result<()> {
        let value = self.shadow(register) & !mask;
        self.shadows.insert(register, value);
        regs.write_raw(register, value)
    }

    /// Steps 2 to 5 for one row whose data is already staged.
    ///
    /// # Errors
    ///
    /// [`BioemusError::HandshakeTimeout`] if the row is not acknowledged in
    /// time; the enable bits are still cleared before returning.
    pub fn write_row<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        target: &RowTarget<'_>,
        address: u32,
    ) -> Result<()> {
        for &reg in target.address_registers {
            regs.write_raw(reg, address)?;
        }
        for en in target.enables {
            self.set_bits(regs, en.register, en.mask)?;
        }
        // An ack register already holding this address passes at once;
        // TWSYN banks share one write address.
        let waited = await_value(&*regs, target.ack_register, address, self.policy);
        for en in target.enables {
            self.clear_bits(regs, en.register, en.mask)?;
        }
        let polls = waited?;
        tracing::trace!("Row {address} acknowledged on {} after {polls} polls", target.ack_register);
        Ok(())
    }
}

/// Poll `register` until it reads `expected`.
///
/// # Errors
///
/// [`BioemusError::HandshakeTimeout`] after `policy.timeout`.
pub fn await_value<R: RegisterAccess + ?Sized>(
    regs: &R,
    register: u16,
    expected: u32,
    policy: HandshakePolicy,
) -> Result<u32> {
    let start = Instant::now();
    let mut polls: u32 = 0;
    loop {
        let last = regs.read_raw(register)?;
        polls = polls.wrapping_add(1);
        if last == expected {
            return Ok(polls);
        }
        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(BioemusError::HandshakeTimeout {
                register,
                expected,
                last,
                elapsed,
            });
        }
        if policy.yield_interval != 0 && polls % policy.yield_interval == 0 {
            std::thread::yield_now();
        }
    }
}
