//! Transfer sizing and output naming for a run

use super::{OutputFormat, StreamKind};
use crate::error::{BioemusError, Result};
use crate::settings::RunSettings;
use bioemus_hw::frames::{spike_frame_bytes, vmem_frame_bytes, SPIKE_SUBSAMPLING};
use bioemus_hw::HwGeometry;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// How many transfers a loop performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCount {
    /// Exactly this many, unless stopped earlier.
    Finite(u64),
    /// Until the run is stopped.
    UntilStopped,
}

/// Parameters of one streaming loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    /// Stream served.
    pub kind: StreamKind,
    /// Bytes per DMA transfer.
    pub transfer_bytes: usize,
    /// Transfers to perform.
    pub count: TransferCount,
    /// Local output file and its format.
    pub save: Option<(PathBuf, OutputFormat)>,
    /// Bus forwarding format.
    pub send: Option<OutputFormat>,
}

/// Streaming loops of a run. Absent loops are not started.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferPlan {
    /// Spike receive loop.
    pub spikes: Option<TransferSpec>,
    /// Vmem receive loop.
    pub vmem: Option<TransferSpec>,
    /// Stimulus transmit loop.
    pub stimulus: Option<TransferSpec>,
    /// Emulation length.
    pub emulation: Duration,
}

/// Bytes of one spike transfer.
#[must_use]
pub const fn spike_transfer_bytes(neurons: u32, tstamps: u32) -> usize {
    spike_frame_bytes(neurons) * tstamps as usize
}

/// Bytes of one vmem transfer.
#[must_use]
pub const fn vmem_transfer_bytes(tsteps: u32) -> usize {
    vmem_frame_bytes() * tsteps as usize
}

/// Bytes of one stimulus transfer: one 32-bit word per neuron.
#[must_use]
pub const fn stimulus_transfer_bytes(neurons: u32) -> usize {
    neurons as usize * 4
}

/// Transfers covering `emulation` when each carries `steps` time steps.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn transfers_for(emulation: Duration, time_step_ms: f64, steps: u64) -> u64 {
    let emulation_ms = emulation.as_secs_f64() * 1e3;
    (emulation_ms / (time_step_ms * steps as f64)) as u64
}

/// Tag of a configuration file: its name between the last `_` and the last
/// `.`, e.g. `net` for `hwconfig_net.txt`.
#[must_use]
pub fn config_tag(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let start = name.rfind('_').map_or(0, |i| i + 1);
    let end = name.rfind('.').filter(|&e| e >= start).unwrap_or(name.len());
    name[start..end].to_string()
}

fn nonzero(value: u32, what: &str) -> Result<u64> {
    if value == 0 {
        return Err(BioemusError::invalid_argument(format!("{what} must be at least 1")));
    }
    Ok(u64::from(value))
}

impl TransferPlan {
    /// Derive the loops of a run.
    ///
    /// # Errors
    ///
    /// [`BioemusError::InvalidArgument`] for zero transfer granularity;
    /// [`BioemusError::Unsupported`] for text vmem persistence.
    pub fn from_settings(settings: &RunSettings, geometry: &HwGeometry) -> Result<Self> {
        let emulation = settings.emulation_time();
        let tag = config_tag(&settings.fpath_hwconfig);
        let mut plan = Self {
            emulation,
            ..Self::default()
        };

        if settings.spikes_streamed() {
            let tstamps = nonzero(settings.nb_tstamp_per_spk_transfer, "nb_tstamp_per_spk_transfer")?;
            let steps = tstamps * u64::from(SPIKE_SUBSAMPLING);
            let save_format = OutputFormat::from_binary_flag(settings.bin_fmt_save_spikes);
            let ext = match save_format {
                OutputFormat::Binary => "bin",
                OutputFormat::Text => "csv",
            };
            plan.spikes = Some(TransferSpec {
                kind: StreamKind::Spikes,
                transfer_bytes: spike_transfer_bytes(geometry.neurons, settings.nb_tstamp_per_spk_transfer),
                count: TransferCount::Finite(transfers_for(emulation, geometry.time_step_ms, steps)),
                save: settings.save_local_spikes.then(|| {
                    (PathBuf::from(format!("{}raster_{tag}.{ext}", settings.save_path)), save_format)
                }),
                send: settings
                    .en_zmq_spikes
                    .then(|| OutputFormat::from_binary_flag(settings.bin_fmt_send_spikes)),
            });
        }

        if settings.vmem_streamed() {
            let tsteps = nonzero(settings.nb_tstep_per_vmem_transfer, "nb_tstep_per_vmem_transfer")?;
            if settings.save_local_vmem && !settings.bin_fmt_save_vmem {
                return Err(BioemusError::unsupported("text persistence of vmem frames"));
            }
            if settings.en_zmq_vmem && !settings.bin_fmt_send_vmem {
                warn!("Text forwarding of vmem frames is not available, sending raw frames");
            }
            plan.vmem = Some(TransferSpec {
                kind: StreamKind::Vmem,
                transfer_bytes: vmem_transfer_bytes(settings.nb_tstep_per_vmem_transfer),
                count: TransferCount::Finite(transfers_for(emulation, geometry.time_step_ms, tsteps)),
                save: settings.save_local_vmem.then(|| {
                    (
                        PathBuf::from(format!("{}waves_{tag}.bin", settings.save_path)),
                        OutputFormat::Binary,
                    )
                }),
                send: settings.en_zmq_vmem.then_some(OutputFormat::Binary),
            });
        }

        if settings.en_zmq_stim {
            plan.stimulus = Some(TransferSpec {
                kind: StreamKind::Stimulus,
                transfer_bytes: stimulus_transfer_bytes(geometry.neurons),
                count: TransferCount::UntilStopped,
                save: None,
                send: None,
            });
        }

        Ok(plan)
    }

    /// Spec of `kind`, if that loop runs.
    #[must_use]
    pub fn spec(&self, kind: StreamKind) -> Option<&TransferSpec> {
        match kind {
            StreamKind::Spikes => self.spikes.as_ref(),
            StreamKind::Vmem => self.vmem.as_ref(),
            StreamKind::Stimulus => self.stimulus.as_ref(),
        }
    }

    /// Loops that run, in start order.
    pub fn kinds(&self) -> impl Iterator<Item = StreamKind> + '_ {
        [&self.spikes, &self.vmem, &self.stimulus]
            .into_iter()
            .flatten()
            .map(|spec| spec.kind)
    }

    /// Whether no loop runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds().next().is_none()
    }

    /// Whether a receive loop runs.
    #[must_use]
    pub fn has_receivers(&self) -> bool {
        self.spikes.is_some() || self.vmem.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::tests::sample;

    #[test]
    fn reference_transfer_sizes() {
        let g = HwGeometry::REFERENCE;
        assert_eq!(spike_transfer_bytes(g.neurons, 100), 13_200);
        assert_eq!(vmem_transfer_bytes(190), 12_920);
        assert_eq!(stimulus_transfer_bytes(g.neurons), 4096);
    }

    #[test]
    fn plan_from_sample_settings() {
        let plan = TransferPlan::from_settings(&sample(), &HwGeometry::REFERENCE).unwrap();
        let spikes = plan.spikes.as_ref().unwrap();
        // 2000 ms / (0.03125 × 32 × 100)
        assert_eq!(spikes.count, TransferCount::Finite(20));
        assert_eq!(
            spikes.save,
            Some((PathBuf::from("/tmp/raster_net.csv"), OutputFormat::Text))
        );
        assert_eq!(spikes.send, None);
        assert!(plan.vmem.is_none());
        assert!(plan.stimulus.is_none());
        assert_eq!(plan.kinds().collect::<Vec<_>>(), vec![StreamKind::Spikes]);
    }

    #[test]
    fn vmem_and_stimulus_plans() {
        let mut s = sample();
        s.save_local_vmem = true;
        s.en_zmq_vmem = true;
        s.bin_fmt_send_vmem = false;
        s.en_zmq_stim = true;
        let plan = TransferPlan::from_settings(&s, &HwGeometry::REFERENCE).unwrap();
        let vmem = plan.vmem.as_ref().unwrap();
        // 2000 ms / (0.03125 × 190)
        assert_eq!(vmem.count, TransferCount::Finite(336));
        assert_eq!(vmem.save.as_ref().unwrap().0, PathBuf::from("/tmp/waves_net.bin"));
        assert_eq!(vmem.send, Some(OutputFormat::Binary));
        let stim = plan.stimulus.as_ref().unwrap();
        assert_eq!(stim.count, TransferCount::UntilStopped);
        assert_eq!(stim.transfer_bytes, 4096);
        assert!(plan.has_receivers());
    }

    #[test]
    fn text_vmem_save_is_unsupported() {
        let mut s = sample();
        s.save_local_vmem = true;
        s.bin_fmt_save_vmem = false;
        assert!(matches!(
            TransferPlan::from_settings(&s, &HwGeometry::REFERENCE),
            Err(BioemusError::Unsupported { .. })
        ));
    }

    #[test]
    fn zero_granularity_is_rejected() {
        let mut s = sample();
        s.nb_tstamp_per_spk_transfer = 0;
        assert!(TransferPlan::from_settings(&s, &HwGeometry::REFERENCE).is_err());
    }

    #[test]
    fn tags() {
        assert_eq!(config_tag(Path::new("/cfg/hwconfig_net.txt")), "net");
        assert_eq!(config_tag(Path::new("a_b_c.cfg")), "c");
        assert_eq!(config_tag(Path::new("plain.txt")), "plain");
        assert_eq!(config_tag(Path::new("/x_dir/file")), "file");
    }
}
