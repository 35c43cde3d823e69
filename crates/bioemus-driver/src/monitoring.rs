//! Monitoring selection: which neurons feed the vmem DMA stream, the DAC
//! outputs and the spike stream.
//!
//! `CONTROL_MON` and `SEL_MON` are shadowed here, independently of the
//! run-control shadow.

use crate::backend::RegisterAccess;
use crate::error::{BioemusError, Result};
use crate::handshake::{HandshakePolicy, RowTarget, WriteEnable, WriteProtocol};
use bioemus_hw::frames::{DAC_CHANNELS, MAX_SPIKE_PACKETS, MAX_VMEM_PACKETS, VMEM_CHANNELS};
use bioemus_hw::regs::{self, control_mon, sel_mon};
use tracing::{debug, info, warn};

const SEL_VMEM: RowTarget<'static> = RowTarget {
    address_registers: &[regs::WADDR_SEL_MON],
    enables: &[WriteEnable {
        register: regs::CONTROL_MON,
        mask: control_mon::WEN_SEL_VMEM,
    }],
    ack_register: regs::WADDR_SEL_MON_LP,
};

/// Monitoring-selection primitive.
#[derive(Debug)]
pub struct MonitoringControl {
    neurons: u32,
    protocol: WriteProtocol,
    sel_shadow: u32,
}

impl MonitoringControl {
    /// Controller for a core with `neurons` neurons.
    #[must_use]
    pub fn new(neurons: u32, policy: HandshakePolicy) -> Self {
        Self {
            neurons,
            protocol: WriteProtocol::new(policy),
            sel_shadow: 0,
        }
    }

    /// Current `CONTROL_MON` shadow.
    #[must_use]
    pub fn control_shadow(&self) -> u32 {
        self.protocol.shadow(regs::CONTROL_MON)
    }

    /// Route up to 16 neurons to the vmem DMA stream.
    ///
    /// Every neuron of the core gets its selection bit written through one
    /// handshake, selected or not, so a previous selection is overwritten.
    ///
    /// # Errors
    ///
    /// [`BioemusError::InvalidArgument`] for too many or out-of-range ids;
    /// [`BioemusError::HandshakeTimeout`] if a row is not acknowledged.
    pub fn select_vmem_channels<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        neuron_ids: &[u32],
        packets_per_frame: u32,
    ) -> Result<()> {
        if neuron_ids.len() > VMEM_CHANNELS {
            return Err(BioemusError::invalid_argument(format!(
                "at most {VMEM_CHANNELS} vmem channels, got {}",
                neuron_ids.len()
            )));
        }
        if let Some(bad) = neuron_ids.iter().find(|&&id| id >= self.neurons) {
            return Err(BioemusError::invalid_argument(format!(
                "neuron {bad} out of range (core has {})",
                self.neurons
            )));
        }

        let packets = if packets_per_frame > MAX_VMEM_PACKETS {
            warn!("Vmem packets per frame clamped from {packets_per_frame} to {MAX_VMEM_PACKETS}");
            MAX_VMEM_PACKETS
        } else {
            packets_per_frame
        };
        regs.write_raw(regs::NB_PACKETS_MON_VMEM, packets)?;

        info!("Select vmem monitoring channels {neuron_ids:?}");
        for neuron in 0..self.neurons {
            if neuron_ids.contains(&neuron) {
                self.sel_shadow |= sel_mon::VMEM;
            } else {
                self.sel_shadow &= !sel_mon::VMEM;
            }
            regs.write_raw(regs::SEL_MON, self.sel_shadow)?;
            self.protocol.write_row(regs, &SEL_VMEM, neuron)?;
        }
        debug!("Vmem selection written for {} neurons", self.neurons);
        Ok(())
    }

    /// Route one neuron to each DAC output.
    ///
    /// # Errors
    ///
    /// [`BioemusError::InvalidArgument`] for an out-of-range id.
    pub fn select_waveform_channels<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        neuron_ids: &[u32; DAC_CHANNELS],
    ) -> Result<()> {
        if let Some(bad) = neuron_ids.iter().find(|&&id| id >= self.neurons) {
            return Err(BioemusError::invalid_argument(format!(
                "DAC neuron {bad} out of range (core has {})",
                self.neurons
            )));
        }
        info!("Select waveform channels {neuron_ids:?}");
        for (reg, &id) in (regs::SEL_MON_DAC_BASE..).zip(neuron_ids) {
            regs.write_raw(reg, id)?;
        }
        Ok(())
    }

    /// Start the spike stream with `packets_per_frame` frames per packet.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn start_spike_monitoring<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        packets_per_frame: u32,
    ) -> Result<()> {
        let packets = if packets_per_frame > MAX_SPIKE_PACKETS {
            warn!("Spike packets per frame clamped from {packets_per_frame} to {MAX_SPIKE_PACKETS}");
            MAX_SPIKE_PACKETS
        } else {
            packets_per_frame
        };
        info!("Start spike monitoring ({packets} frames per packet)");
        regs.write_raw(regs::NB_PACKETS_MON_SPK, packets)?;
        self.protocol.set_bits(regs, regs::CONTROL_MON, control_mon::EN_SPIKES)
    }

    /// Stop the spike stream.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn stop_spike_monitoring<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Stop spike monitoring");
        self.protocol.clear_bits(regs, regs::CONTROL_MON, control_mon::EN_SPIKES)
    }

    /// Start the vmem stream.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn start_vmem_monitoring<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Start vmem monitoring");
        self.protocol.set_bits(regs, regs::CONTROL_MON, control_mon::EN_VMEM)
    }

    /// Stop the vmem stream.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn stop_vmem_monitoring<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Stop vmem monitoring");
        self.protocol.clear_bits(regs, regs::CONTROL_MON, control_mon::EN_VMEM)
    }

    /// Start the DAC outputs.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn start_waveform_monitoring<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Start waveform monitoring");
        self.protocol.set_bits(regs, regs::CONTROL_MON, control_mon::EN_DAC)
    }

    /// Stop the DAC outputs.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn stop_waveform_monitoring<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R) -> Result<()> {
        info!("Stop waveform monitoring");
        self.protocol.clear_bits(regs, regs::CONTROL_MON, control_mon::EN_DAC)
    }
}
