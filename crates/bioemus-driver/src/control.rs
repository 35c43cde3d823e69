//! Run control: reset, core enable, stimulation trigger, progress LEDs
//!
//! The control register is shadowed so that toggling one flag never
//! disturbs the others; every mutator writes the whole shadow back. Only
//! the control thread touches this register.

use crate::backend::RegisterAccess;
use crate::error::{BioemusError, Result};
use bioemus_hw::regs::{self, control};
use std::time::Duration;
use tracing::{debug, info};

/// Reset pulse hold time required by the fabric.
pub const RESET_SETTLE: Duration = Duration::from_millis(300);

/// Run-control primitive over the `CONTROL` register.
#[derive(Debug)]
pub struct RunControl {
    shadow: u32,
    time_step_ms: f64,
    reset_settle: Duration,
}

impl RunControl {
    /// New controller for a core stepping every `time_step_ms`.
    #[must_use]
    pub fn new(time_step_ms: f64) -> Self {
        Self {
            shadow: 0,
            time_step_ms,
            reset_settle: RESET_SETTLE,
        }
    }

    /// Override the reset hold time (simulated backends do not need it).
    #[must_use]
    pub fn with_reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle = settle;
        self
    }

    /// Current shadow of the control register.
    #[must_use]
    pub const fn shadow(&self) -> u32 {
        self.shadow
    }

    fn update<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R, set: u32, clear: u32) -> Result<()> {
        self.shadow = (self.shadow | set) & !clear;
        regs.write_raw(regs::CONTROL, self.shadow)
    }

    /// Pulse reset: set, hold for the settle time, clear.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn reset<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Reset system");
        self.update(regs, control::RESET, 0)?;
        std::thread::sleep(self.reset_settle);
        self.update(regs, 0, control::RESET)
    }

    /// Assert reset and leave it asserted.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn hold_reset<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        self.update(regs, control::RESET, 0)
    }

    /// Start the calculation core.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn enable_core<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Enable calculation core");
        self.update(regs, control::ENABLE_CORE, 0)
    }

    /// Stop the calculation core.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn disable_core<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Disable calculation core");
        self.update(regs, 0, control::ENABLE_CORE)
    }

    /// Clear the trigger bit, arming the fabric's edge detector.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn arm_stimulus_trigger<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        self.update(regs, 0, control::STIM_TRIGGER)
    }

    /// Raise the trigger bit.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn send_stimulus_trigger<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        self.update(regs, control::STIM_TRIGGER, 0)
    }

    /// Delay between trigger and stimulation, in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns error for negative or non-finite delays.
    pub fn set_stimulus_delay<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R, ms: f64) -> Result<()> {
        let steps = self.to_steps(ms)?;
        self.arm_stimulus_trigger(regs)?;
        debug!("Stimulus delay {ms} ms = {steps} steps");
        regs.write_raw(regs::STIM_DELAY, steps)
    }

    /// Stimulation width, in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns error for negative or non-finite widths.
    pub fn set_stimulus_width<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R, ms: f64) -> Result<()> {
        let steps = self.to_steps(ms)?;
        self.arm_stimulus_trigger(regs)?;
        debug!("Stimulus width {ms} ms = {steps} steps");
        regs.write_raw(regs::STIM_WIDTH, steps)
    }

    /// Show run progress (percent, clamped to 100) on the user LEDs.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn set_progress_indicator<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R, percent: u8) -> Result<()> {
        regs.write_raw(regs::USER_LEDS, u32::from(percent.min(100)))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn to_steps(&self, ms: f64) -> Result<u32> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(BioemusError::invalid_argument(format!(
                "stimulus timing must be a non-negative duration, got {ms} ms"
            )));
        }
        Ok((ms / self.time_step_ms) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimRegisterFile;

    fn controller() -> RunControl {
        RunControl::new(0.031_25).with_reset_settle(Duration::ZERO)
    }

    #[test]
    fn trigger_does_not_disturb_other_bits() {
        let mut sim = SimRegisterFile::new().with_journal();
        let mut ctl = controller();
        ctl.hold_reset(&mut sim).unwrap();
        ctl.enable_core(&mut sim).unwrap();
        ctl.send_stimulus_trigger(&mut sim).unwrap();
        assert_eq!(
            ctl.shadow(),
            control::RESET | control::ENABLE_CORE | control::STIM_TRIGGER
        );
        ctl.arm_stimulus_trigger(&mut sim).unwrap();
        assert_eq!(ctl.shadow(), control::RESET | control::ENABLE_CORE);
        assert_eq!(sim.value(regs::CONTROL), ctl.shadow());
    }

    #[test]
    fn enable_does_not_disturb_trigger() {
        let mut sim = SimRegisterFile::new().with_journal();
        let mut ctl = controller();
        ctl.send_stimulus_trigger(&mut sim).unwrap();
        ctl.enable_core(&mut sim).unwrap();
        ctl.disable_core(&mut sim).unwrap();
        assert_eq!(ctl.shadow(), control::STIM_TRIGGER);
    }

    #[test]
    fn reset_pulses_bit() {
        let mut sim = SimRegisterFile::new().with_journal();
        let view = sim.clone();
        let mut ctl = controller();
        ctl.enable_core(&mut sim).unwrap();
        ctl.reset(&mut sim).unwrap();
        let control_writes: Vec<u32> = view
            .writes()
            .into_iter()
            .filter(|(r, _)| *r == regs::CONTROL)
            .map(|(_, v)| v)
            .collect();
        let en = control::ENABLE_CORE;
        assert_eq!(control_writes, vec![en, en | control::RESET, en]);
    }

    #[test]
    fn stimulus_timing_in_steps_after_arming() {
        let mut sim = SimRegisterFile::new().with_journal();
        let view = sim.clone();
        let mut ctl = controller();
        ctl.send_stimulus_trigger(&mut sim).unwrap();
        ctl.set_stimulus_delay(&mut sim, 10.0).unwrap();
        assert_eq!(ctl.shadow() & control::STIM_TRIGGER, 0);
        assert_eq!(view.value(regs::STIM_DELAY), 320);
        ctl.set_stimulus_width(&mut sim, 0.1).unwrap();
        assert_eq!(view.value(regs::STIM_WIDTH), 3);
        assert!(ctl.set_stimulus_width(&mut sim, -1.0).is_err());
    }

    #[test]
    fn progress_is_clamped() {
        let mut sim = SimRegisterFile::new().with_journal();
        let mut ctl = controller();
        ctl.set_progress_indicator(&mut sim, 250).unwrap();
        assert_eq!(sim.value(regs::USER_LEDS), 100);
    }
}
