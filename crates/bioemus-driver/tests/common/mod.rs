//! Shared fixtures for the simulated-board integration tests

#![allow(dead_code)]

use bioemus_driver::RunSettings;
use bioemus_hw::{HwGeometry, SynRamGeometry};
use std::fmt::Write;
use std::path::Path;

/// 32-neuron core with small tables.
pub fn tiny_geometry() -> HwGeometry {
    HwGeometry {
        neurons: 32,
        ionrate_count: 2,
        ionrate_depth: 3,
        synrate_depth: 4,
        synram: SynRamGeometry {
            banks: 2,
            depth: 512,
            width_bits: 72,
            lanes: 3,
        },
        time_step_ms: 0.031_25,
    }
}

/// Write a well-formed configuration for `g` to `dir/hwconfig_<tag>.txt`.
pub fn write_config(dir: &Path, tag: &str, g: &HwGeometry) -> std::path::PathBuf {
    let n = g.neurons;
    let mut s = String::from("#SW_VERSION=0.2.0\n#NB_NRN=32\n");
    for k in 0..n {
        let fields: Vec<String> = (0..16).map(|p| format!("{}", f64::from(p) * 0.5 - 2.0)).collect();
        writeln!(s, "HHparam_N{k}={}", fields.join(",")).unwrap();
    }
    let psyn: Vec<String> = (0..18).map(|i| format!("{:.2}", f64::from(i) * 0.01)).collect();
    writeln!(s, "psyn={}", psyn.join(",")).unwrap();
    for t in 0..g.ionrate_count {
        for a in 0..g.ionrate_depth {
            writeln!(s, "ionrates_I{t}A{a}=0.1;0.2;0.3;0.4").unwrap();
        }
    }
    for a in 0..g.synrate_depth {
        writeln!(s, "synrates_A{a}=0.5;0.25;0.125").unwrap();
    }
    for dest in 0..n {
        let row: Vec<&str> = (0..n)
            .map(|src| if (src + 1) % n == dest { "ampa$1.0" } else { "x$0" })
            .collect();
        writeln!(s, "N{dest}={}", row.join(",")).unwrap();
    }
    let path = dir.join(format!("hwconfig_{tag}.txt"));
    std::fs::write(&path, s).unwrap();
    path
}

/// Settings with every stream off; tests switch on what they exercise.
pub fn base_settings(config: &Path, save_dir: &Path) -> RunSettings {
    serde_json::from_value(serde_json::json!({
        "fpath_hwconfig": config,
        "emulation_time_s": 1,
        "sel_nrn_vmem_dac": [0, 1, 2, 3, 4, 5, 6, 7],
        "sel_nrn_vmem_dma": [0, 4, 8, 12],
        "save_local_spikes": false,
        "save_local_vmem": false,
        "save_path": format!("{}/", save_dir.display()),
        "en_zmq_spikes": false,
        "en_zmq_vmem": false,
        "en_zmq_stim": false,
        "ip_zmq_spikes": "mem://spikes",
        "ip_zmq_vmem": "mem://vmem",
        "ip_zmq_stim": "mem://stim",
        "nb_tstamp_per_spk_transfer": 100,
        "nb_tstep_per_vmem_transfer": 190,
        "en_stim": false,
        "stim_delay_ms": 0,
        "stim_duration_ms": 0
    }))
    .unwrap()
}

/// One little-endian spike frame.
pub fn spike_frame(time: u32, words: &[u32]) -> Vec<u8> {
    std::iter::once(time)
        .chain(words.iter().copied())
        .flat_map(u32::to_le_bytes)
        .collect()
}
