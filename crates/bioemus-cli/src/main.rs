//! `bioemus`: command-line interface for the BioemuS emulator.
//!
//! ```text
//! USAGE:
//!   bioemus run --config <swconfig.json>   Configure the core and run one emulation
//!   bioemus self-test                      Register window read-back test
//!   bioemus layout                         Register map and DMA ABI of this build
//! ```

mod sim;

use anyhow::{bail, Context, Result};
use bioemus_driver::dma::proxy::{
    ioctls, BUFFER_SIZE, RX_BUFFER_COUNT, RX_SPIKES, RX_VMEM, SLOT_STRIDE, TX_BUFFER_COUNT,
    TX_STIMULUS,
};
use bioemus_driver::{
    DeviceTransports, NoiseSeeds, RegisterAccess, RegisterFile, RegisterLayout, RunReport,
    RunSettings, Session, SessionOptions, SimRegisterFile, StopHandle, Transports,
};
use bioemus_hw::{regs, HwGeometry};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bioemus", about = "BioemuS neuromorphic emulator host", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Program the core from a settings file and run one emulation.
    Run {
        /// JSON run settings.
        #[arg(short, long)]
        config: PathBuf,
        /// Print the loaded settings before running.
        #[arg(long)]
        print_config: bool,
        /// Sweep progress shown on the board LEDs, in percent.
        #[arg(long, default_value_t = 0)]
        progress: u8,
        /// Seed the noise generators with fixed values.
        #[arg(long)]
        fixed_seeds: bool,
        /// Run against simulated registers and DMA channels.
        #[arg(long)]
        simulate: bool,
    },
    /// Write and read back every host register.
    SelfTest,
    /// Print the register map and DMA slot layout.
    Layout,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run {
            config,
            print_config,
            progress,
            fixed_seeds,
            simulate,
        } => cmd_run(&config, print_config, progress, fixed_seeds, simulate)?,
        Cmd::SelfTest => cmd_self_test()?,
        Cmd::Layout => cmd_layout(),
    }

    Ok(())
}

fn load_settings(path: &Path) -> Result<RunSettings> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_settings(s: &RunSettings) {
    println!("Hardware configuration : {}", s.fpath_hwconfig.display());
    println!("Emulation time         : {} s", s.emulation_time_s);
    println!("DAC neurons            : {:?}", s.sel_nrn_vmem_dac);
    println!("Vmem DMA neurons       : {:?}", s.sel_nrn_vmem_dma);
    println!(
        "Save spikes / vmem     : {} / {} -> {}",
        s.save_local_spikes, s.save_local_vmem, s.save_path
    );
    println!(
        "Send spikes / vmem     : {} ({}) / {} ({})",
        s.en_zmq_spikes, s.ip_zmq_spikes, s.en_zmq_vmem, s.ip_zmq_vmem
    );
    println!("External stimulus      : {} ({})", s.en_zmq_stim, s.ip_zmq_stim);
    println!(
        "Transfer granularity   : {} timestamps / {} steps",
        s.nb_tstamp_per_spk_transfer, s.nb_tstep_per_vmem_transfer
    );
    if s.en_stim {
        println!(
            "Stimulation            : {} ms after trigger for {} ms",
            s.stim_delay_ms, s.stim_duration_ms
        );
    }
}

fn cmd_run(config: &Path, print_config: bool, progress: u8, fixed_seeds: bool, simulate: bool) -> Result<()> {
    let settings = load_settings(config)?;
    if print_config {
        print_settings(&settings);
    }

    let stop = StopHandle::new();
    let on_signal = stop.clone();
    ctrlc::set_handler(move || on_signal.request_stop()).context("installing SIGINT handler")?;

    let geometry = HwGeometry::REFERENCE;
    let options = SessionOptions {
        seeds: if fixed_seeds { NoiseSeeds::Fixed } else { NoiseSeeds::Random },
        progress,
        ..SessionOptions::default()
    };

    let report = if simulate {
        info!("Simulated board");
        let mut transports = sim::SimTransports::new(
            geometry,
            settings.nb_tstamp_per_spk_transfer,
            settings.nb_tstep_per_vmem_transfer,
        );
        run_with(SimRegisterFile::new(), geometry, options, &settings, &mut transports, &stop)?
    } else {
        let regs = RegisterFile::open_core0().context("opening register window")?;
        run_with(regs, geometry, options, &settings, &mut DeviceTransports::new(), &stop)?
    };

    if report.aborted {
        println!("Stopped before the first stimulation pattern, core never enabled");
    }
    for r in &report.loops {
        println!(
            "{:<9} {:>8} transfers {:>12} bytes{}",
            r.kind,
            r.transfers,
            r.bytes,
            if r.stopped_early { "  (stopped)" } else { "" }
        );
    }
    println!("Runtime {:.3} s", report.elapsed.as_secs_f64());
    Ok(())
}

fn run_with<R: RegisterAccess, T: Transports>(
    regs: R,
    geometry: HwGeometry,
    options: SessionOptions,
    settings: &RunSettings,
    transports: &mut T,
    stop: &StopHandle,
) -> Result<RunReport> {
    let mut session = Session::new(regs, geometry, options)?;
    Ok(session.run(settings, transports, stop)?)
}

fn cmd_self_test() -> Result<()> {
    let mut regs = RegisterFile::open_core0().context("opening register window")?;
    let layout = regs.layout();
    if !regs.self_test()? {
        bail!("register read-back mismatch (see warnings above)");
    }
    println!("{} write registers read back correctly", layout.write_count);
    Ok(())
}

fn cmd_layout() {
    let layout = RegisterLayout::CORE0;
    println!("Software   : {}", bioemus_driver::SW_VERSION);
    println!("Hardware   : {} ({})", bioemus_hw::HW_VERSION, bioemus_hw::HW_FPGA_ARCH);
    println!(
        "Registers  : {:#010x} + {:#x}, {} write / {} read",
        regs::BASE_ADDR_ZYNQMP,
        regs::RANGE_ZYNQMP,
        layout.write_count,
        layout.read_count
    );
    let g = HwGeometry::REFERENCE;
    println!(
        "Geometry   : {} neurons, {} ion tables × {}, {} synrates, {} RAM banks × {} rows × {} bits",
        g.neurons,
        g.ionrate_count,
        g.ionrate_depth,
        g.synrate_depth,
        g.synram.banks,
        g.synram.depth,
        g.synram.width_bits
    );
    println!(
        "DMA slot   : {BUFFER_SIZE} payload bytes, stride {SLOT_STRIDE}, ioctl start {:#x} finish {:#x}",
        ioctls::START_XFER,
        ioctls::FINISH_XFER
    );
    for (path, slots) in [
        (RX_SPIKES, RX_BUFFER_COUNT),
        (RX_VMEM, RX_BUFFER_COUNT),
        (TX_STIMULUS, TX_BUFFER_COUNT),
    ] {
        println!("  {path:<28} {slots} slots");
    }
}
