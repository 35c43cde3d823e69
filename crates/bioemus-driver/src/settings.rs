//! Run settings
//!
//! Field names follow the JSON settings file consumed by the board
//! application, so existing sweep scripts keep working.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const fn binary_default() -> bool {
    true
}

/// One emulation run, as handed over by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunSettings {
    /// Hardware configuration file.
    pub fpath_hwconfig: PathBuf,
    /// Run length in seconds.
    pub emulation_time_s: u64,
    /// Neurons routed to the 8 DAC outputs.
    pub sel_nrn_vmem_dac: Vec<u32>,
    /// Neurons routed to the vmem DMA stream (at most 16).
    pub sel_nrn_vmem_dma: Vec<u32>,
    /// Save spikes locally.
    pub save_local_spikes: bool,
    /// Save vmem frames locally.
    pub save_local_vmem: bool,
    /// Directory prefix of saved files, including the trailing separator.
    pub save_path: String,
    /// Forward spikes over the bus.
    pub en_zmq_spikes: bool,
    /// Forward vmem frames over the bus.
    pub en_zmq_vmem: bool,
    /// Take stimulus patterns from the bus.
    pub en_zmq_stim: bool,
    /// Spikes are consumed by the on-board wireless bridge.
    #[serde(default)]
    pub en_wifi_spikes: bool,
    /// Spike stream bind address.
    pub ip_zmq_spikes: String,
    /// Vmem stream bind address.
    pub ip_zmq_vmem: String,
    /// Stimulus stream peer address.
    pub ip_zmq_stim: String,
    /// Save spikes as raw frames (else CSV).
    #[serde(default = "binary_default")]
    pub bin_fmt_save_spikes: bool,
    /// Save vmem as raw frames.
    #[serde(default = "binary_default")]
    pub bin_fmt_save_vmem: bool,
    /// Forward spikes as raw frames (else per-neuron counts).
    #[serde(default = "binary_default")]
    pub bin_fmt_send_spikes: bool,
    /// Forward vmem as raw frames.
    #[serde(default = "binary_default")]
    pub bin_fmt_send_vmem: bool,
    /// Spike frames per DMA transfer.
    pub nb_tstamp_per_spk_transfer: u32,
    /// Vmem time steps per DMA transfer.
    pub nb_tstep_per_vmem_transfer: u32,
    /// Fire the on-chip stimulation trigger after bring-up.
    pub en_stim: bool,
    /// Trigger delay in milliseconds.
    pub stim_delay_ms: f64,
    /// Trigger pulse width in milliseconds.
    pub stim_duration_ms: f64,
}

impl RunSettings {
    /// Run length.
    #[must_use]
    pub fn emulation_time(&self) -> Duration {
        Duration::from_secs(self.emulation_time_s)
    }

    /// Spike monitoring must run in the fabric.
    #[must_use]
    pub fn spikes_monitored(&self) -> bool {
        self.spikes_streamed() || self.en_wifi_spikes
    }

    /// Spikes go through the host DMA stream.
    #[must_use]
    pub fn spikes_streamed(&self) -> bool {
        self.save_local_spikes || self.en_zmq_spikes
    }

    /// Vmem monitoring runs and goes through the host DMA stream.
    #[must_use]
    pub fn vmem_streamed(&self) -> bool {
        self.save_local_vmem || self.en_zmq_vmem
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "fpath_hwconfig": "/home/ubuntu/bioemus/config/hwconfig_net.txt",
        "emulation_time_s": 2,
        "sel_nrn_vmem_dac": [0, 1, 2, 3, 4, 5, 6, 7],
        "sel_nrn_vmem_dma": [0, 1, 2, 3],
        "save_local_spikes": true,
        "save_local_vmem": false,
        "save_path": "/tmp/",
        "en_zmq_spikes": false,
        "en_zmq_vmem": false,
        "en_zmq_stim": false,
        "ip_zmq_spikes": "tcp://*:5557",
        "ip_zmq_vmem": "tcp://*:5558",
        "ip_zmq_stim": "tcp://192.168.137.1:5559",
        "bin_fmt_save_spikes": false,
        "nb_tstamp_per_spk_transfer": 100,
        "nb_tstep_per_vmem_transfer": 190,
        "en_stim": true,
        "stim_delay_ms": 10,
        "stim_duration_ms": 50
    }"#;

    pub(crate) fn sample() -> RunSettings {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn parses_settings_file() {
        let s = sample();
        assert_eq!(s.emulation_time(), Duration::from_secs(2));
        assert_eq!(s.sel_nrn_vmem_dac.len(), 8);
        assert!((s.stim_delay_ms - 10.0).abs() < f64::EPSILON);
        assert!(!s.bin_fmt_save_spikes);
        assert!(s.bin_fmt_save_vmem);
        assert!(s.bin_fmt_send_spikes);
        assert!(!s.en_wifi_spikes);
    }

    #[test]
    fn stream_predicates() {
        let mut s = sample();
        assert!(s.spikes_streamed());
        assert!(!s.vmem_streamed());
        s.save_local_spikes = false;
        s.en_wifi_spikes = true;
        assert!(!s.spikes_streamed());
        assert!(s.spikes_monitored());
    }

    #[test]
    fn missing_field_is_rejected() {
        let text = SAMPLE.replace("\"emulation_time_s\": 2,", "");
        assert!(serde_json::from_str::<RunSettings>(&text).is_err());
    }
}
