//! Run orchestration
//!
//! A [`Session`] owns the register window and the three register-level
//! components, and drives one run from the control thread:
//!
//! ```text
//! open DMA channels + bus endpoints        (fatal setup, core untouched)
//! self-test → seeds → reset → configuration upload
//! DAC selection → spike / vmem monitoring → progress LEDs → stimulation
//! streaming (start gate → enable core → loops)  |  enable core + wait
//! disable core → stop monitoring → hold reset   (always)
//! ```

use crate::backend::RegisterAccess;
use crate::bus::{Publisher, Subscriber, ZmqPublisher, ZmqSubscriber};
use crate::control::{RunControl, RESET_SETTLE};
use crate::dma::proxy::{RX_BUFFER_COUNT, RX_SPIKES, RX_VMEM, TX_BUFFER_COUNT, TX_STIMULUS};
use crate::dma::{DmaChannel, DmaTransport};
use crate::error::{BioemusError, Result};
use crate::handshake::HandshakePolicy;
use crate::hwcfg::{ConfigProgrammer, NoiseSeeds};
use crate::monitoring::MonitoringControl;
use crate::settings::RunSettings;
use crate::stream::{EngineReport, Endpoints, LoopReport, RunContext, StopHandle, StreamKind, StreamingEngine, TransferPlan};
use bioemus_hw::frames::DAC_CHANNELS;
use bioemus_hw::HwGeometry;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Opens the DMA channels and bus endpoints of a run.
pub trait Transports {
    /// Open the DMA channel serving `kind`.
    ///
    /// # Errors
    ///
    /// Device open or mapping failures.
    fn open_channel(&mut self, kind: StreamKind) -> Result<Box<dyn DmaTransport>>;

    /// Bind the outbound endpoint of `kind` to `endpoint`.
    ///
    /// # Errors
    ///
    /// Bus failures.
    fn bind_publisher(&mut self, kind: StreamKind, endpoint: &str) -> Result<Box<dyn Publisher>>;

    /// Connect the inbound stimulus endpoint to `endpoint`.
    ///
    /// # Errors
    ///
    /// Bus failures.
    fn connect_subscriber(&mut self, endpoint: &str) -> Result<Box<dyn Subscriber>>;
}

/// dma-proxy devices and ZeroMQ sockets of the target board.
pub struct DeviceTransports {
    context: zmq::Context,
}

impl DeviceTransports {
    /// Transports with a fresh ZeroMQ context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: zmq::Context::new(),
        }
    }
}

impl Default for DeviceTransports {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceTransports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTransports").finish_non_exhaustive()
    }
}

impl Transports for DeviceTransports {
    fn open_channel(&mut self, kind: StreamKind) -> Result<Box<dyn DmaTransport>> {
        let channel = match kind {
            StreamKind::Spikes => DmaChannel::open(RX_SPIKES, RX_BUFFER_COUNT)?,
            StreamKind::Vmem => DmaChannel::open(RX_VMEM, RX_BUFFER_COUNT)?,
            StreamKind::Stimulus => DmaChannel::open(TX_STIMULUS, TX_BUFFER_COUNT)?,
        };
        Ok(Box::new(channel))
    }

    fn bind_publisher(&mut self, _kind: StreamKind, endpoint: &str) -> Result<Box<dyn Publisher>> {
        Ok(Box::new(ZmqPublisher::bind(&self.context, endpoint)?))
    }

    fn connect_subscriber(&mut self, endpoint: &str) -> Result<Box<dyn Subscriber>> {
        Ok(Box::new(ZmqSubscriber::connect(&self.context, endpoint)?))
    }
}

/// Knobs that are not part of the run settings file.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Noise generator seeding.
    pub seeds: NoiseSeeds,
    /// Sweep progress shown on the board LEDs, in percent.
    pub progress: u8,
    /// Handshake acknowledgement bound.
    pub policy: HandshakePolicy,
    /// Reset pulse hold time.
    pub reset_settle: Duration,
    /// Run the register read-back test at bring-up.
    pub self_test: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            seeds: NoiseSeeds::Random,
            progress: 0,
            policy: HandshakePolicy::default(),
            reset_settle: RESET_SETTLE,
            self_test: true,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Streaming loop outcomes (empty when nothing was streamed).
    pub loops: Vec<LoopReport>,
    /// Stop was requested before the core was enabled.
    pub aborted: bool,
    /// Wall time from bring-up to teardown.
    pub elapsed: Duration,
}

/// One emulation core under host control.
#[derive(Debug)]
pub struct Session<R: RegisterAccess> {
    regs: R,
    geometry: HwGeometry,
    options: SessionOptions,
    control: RunControl,
    monitoring: MonitoringControl,
    programmer: ConfigProgrammer,
}

impl<R: RegisterAccess> Session<R> {
    /// Session over `regs` for a core built with `geometry`.
    ///
    /// # Errors
    ///
    /// [`BioemusError::Geometry`] for inconsistent geometry.
    pub fn new(regs: R, geometry: HwGeometry, options: SessionOptions) -> Result<Self> {
        let geometry = geometry.validated()?;
        Ok(Self {
            control: RunControl::new(geometry.time_step_ms).with_reset_settle(options.reset_settle),
            monitoring: MonitoringControl::new(geometry.neurons, options.policy),
            programmer: ConfigProgrammer::new(geometry, options.policy),
            regs,
            geometry,
            options,
        })
    }

    /// Register window.
    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Hardware geometry.
    pub fn geometry(&self) -> &HwGeometry {
        &self.geometry
    }

    /// Run-control shadow state.
    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Monitoring shadow state.
    pub fn monitoring(&self) -> &MonitoringControl {
        &self.monitoring
    }

    /// Program and arm the core without enabling it.
    ///
    /// # Errors
    ///
    /// Configuration, handshake, argument and register errors.
    pub fn bring_up(&mut self, settings: &RunSettings) -> Result<()> {
        let dac: [u32; DAC_CHANNELS] = settings.sel_nrn_vmem_dac.as_slice().try_into().map_err(|_| {
            BioemusError::invalid_argument(format!(
                "sel_nrn_vmem_dac needs {DAC_CHANNELS} neurons, got {}",
                settings.sel_nrn_vmem_dac.len()
            ))
        })?;
        let regs = &mut self.regs;

        if self.options.self_test {
            match regs.self_test() {
                Ok(true) => info!("Register read-back test passed"),
                Ok(false) => error!("Register read-back test failed"),
                Err(e) => error!("Register read-back test failed: {e}"),
            }
        }
        self.programmer.set_noise_seeds(regs, self.options.seeds)?;
        self.control.reset(regs)?;
        self.programmer.apply(regs, &settings.fpath_hwconfig)?;
        info!("Apply hardware configuration");

        info!("Activate waveform monitoring");
        self.monitoring.select_waveform_channels(regs, &dac)?;
        self.monitoring.start_waveform_monitoring(regs)?;

        if settings.spikes_monitored() {
            info!("Activate spike monitoring");
            self.monitoring
                .start_spike_monitoring(regs, settings.nb_tstamp_per_spk_transfer)?;
        }
        if settings.vmem_streamed() {
            info!("Activate vmem monitoring");
            self.monitoring.select_vmem_channels(
                regs,
                &settings.sel_nrn_vmem_dma,
                settings.nb_tstep_per_vmem_transfer,
            )?;
            self.monitoring.start_vmem_monitoring(regs)?;
        }

        self.control.set_progress_indicator(regs, self.options.progress)?;

        if settings.en_stim {
            info!("Send stimulation");
            self.control.set_stimulus_delay(regs, settings.stim_delay_ms)?;
            self.control.set_stimulus_width(regs, settings.stim_duration_ms)?;
            self.control.arm_stimulus_trigger(regs)?;
            self.control.send_stimulus_trigger(regs)?;
            self.control.arm_stimulus_trigger(regs)?;
        }
        Ok(())
    }

    /// Disable the core, stop monitoring and hold it in reset.
    ///
    /// Every step is attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Register errors.
    pub fn teardown(&mut self, settings: &RunSettings) -> Result<()> {
        let regs = &mut self.regs;
        let mut steps = vec![
            ("disable core", self.control.disable_core(regs)),
            ("stop waveform monitoring", self.monitoring.stop_waveform_monitoring(regs)),
        ];
        if settings.spikes_monitored() {
            steps.push(("stop spike monitoring", self.monitoring.stop_spike_monitoring(regs)));
        }
        if settings.vmem_streamed() {
            steps.push(("stop vmem monitoring", self.monitoring.stop_vmem_monitoring(regs)));
        }
        steps.push(("hold reset", self.control.hold_reset(regs)));

        let mut first = None;
        for (step, outcome) in steps {
            if let Err(e) = outcome {
                warn!("Teardown: {step} failed: {e}");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Execute one complete run.
    ///
    /// Channels and endpoints are opened first, so a missing device fails
    /// the run before the core is touched. Teardown runs whenever bring-up
    /// started, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Setup errors, and the first streaming loop failure.
    pub fn run<T: Transports + ?Sized>(
        &mut self,
        settings: &RunSettings,
        transports: &mut T,
        stop: &StopHandle,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let plan = TransferPlan::from_settings(settings, &self.geometry)?;

        let mut endpoints = Endpoints::default();
        if plan.spikes.as_ref().is_some_and(|s| s.send.is_some()) {
            endpoints.spikes = Some(transports.bind_publisher(StreamKind::Spikes, &settings.ip_zmq_spikes)?);
        }
        if plan.vmem.as_ref().is_some_and(|s| s.send.is_some()) {
            endpoints.vmem = Some(transports.bind_publisher(StreamKind::Vmem, &settings.ip_zmq_vmem)?);
        }
        if plan.stimulus.is_some() {
            endpoints.stimulus = Some(transports.connect_subscriber(&settings.ip_zmq_stim)?);
        }

        let kinds: Vec<StreamKind> = plan.kinds().collect();
        let mut engine = StreamingEngine::new(plan, self.geometry.neurons);
        for kind in kinds {
            engine.attach(kind, transports.open_channel(kind)?)?;
        }
        let ctx = RunContext::new(stop.clone(), endpoints);

        let outcome = self
            .bring_up(settings)
            .and_then(|()| self.execute(&mut engine, &ctx));
        let down = self.teardown(settings);
        let report = outcome?;
        down?;

        let elapsed = started.elapsed();
        info!("Application runtime: {:.3} seconds", elapsed.as_secs_f64());
        let aborted = report.aborted;
        Ok(RunReport {
            loops: report.into_result()?,
            aborted,
            elapsed,
        })
    }

    fn execute(&mut self, engine: &mut StreamingEngine, ctx: &RunContext) -> Result<EngineReport> {
        if engine.plan().is_empty() {
            self.control.enable_core(&mut self.regs)?;
            if ctx.stop().wait_timeout(engine.plan().emulation) {
                info!("Stop requested, ending emulation early");
            }
            return Ok(EngineReport::default());
        }
        let Self { regs, control, .. } = self;
        engine.run(ctx, || control.enable_core(regs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimRegisterFile;
    use crate::hwcfg::parser::tests::{sample_config, tiny_geometry};
    use crate::settings::tests::sample;
    use bioemus_hw::regs::{self, control, control_mon};

    fn options() -> SessionOptions {
        SessionOptions {
            seeds: NoiseSeeds::Fixed,
            progress: 40,
            reset_settle: Duration::ZERO,
            self_test: false,
            ..SessionOptions::default()
        }
    }

    fn settings_for(dir: &std::path::Path) -> RunSettings {
        let g = tiny_geometry();
        let path = dir.join("hwconfig_tiny.txt");
        std::fs::write(&path, sample_config(&g)).unwrap();
        let mut s = sample();
        s.fpath_hwconfig = path;
        s.save_local_spikes = false;
        s.emulation_time_s = 0;
        s.stim_delay_ms = 1.0;
        s.stim_duration_ms = 2.0;
        s
    }

    #[test]
    fn bring_up_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings_for(dir.path());
        s.en_wifi_spikes = true;
        let sim = SimRegisterFile::new().with_journal();
        let mut session = Session::new(sim.clone(), tiny_geometry(), options()).unwrap();
        session.bring_up(&s).unwrap();

        let writes = sim.writes();
        let pos = |reg: u16| writes.iter().position(|&(r, _)| r == reg).unwrap();
        assert!(pos(regs::NOISE_SEED_BASE) < pos(regs::WADDR_HHPARAM));
        assert!(pos(regs::WADDR_TWSYN) < pos(regs::SEL_MON_DAC_BASE));
        assert!(pos(regs::SEL_MON_DAC_BASE) < pos(regs::USER_LEDS));
        assert!(pos(regs::USER_LEDS) < pos(regs::STIM_DELAY));
        assert_eq!(sim.value(regs::USER_LEDS), 40);
        // 1 ms and 2 ms at 0.03125 ms per step
        assert_eq!(sim.value(regs::STIM_DELAY), 32);
        assert_eq!(sim.value(regs::STIM_WIDTH), 64);
        // spike monitoring runs, vmem does not, core still disabled
        assert_eq!(
            session.monitoring().control_shadow(),
            control_mon::EN_DAC | control_mon::EN_SPIKES
        );
        assert_eq!(session.control().shadow() & control::ENABLE_CORE, 0);
        assert_eq!(sim.value(regs::CONTROL) & control::STIM_TRIGGER, 0);
    }

    #[test]
    fn run_without_streams_enables_core_then_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings_for(dir.path());
        s.en_stim = false;
        let sim = SimRegisterFile::new().with_journal();
        let opts = SessionOptions {
            self_test: true,
            ..options()
        };
        let mut session = Session::new(sim.clone(), tiny_geometry(), opts).unwrap();
        let mut transports = NoTransports;
        let report = session.run(&s, &mut transports, &StopHandle::new()).unwrap();
        assert!(report.loops.is_empty());
        assert!(!report.aborted);

        let controls: Vec<u32> = sim
            .writes()
            .into_iter()
            .filter(|&(r, _)| r == regs::CONTROL)
            .map(|(_, v)| v)
            .collect();
        assert!(controls.contains(&control::ENABLE_CORE));
        assert_eq!(controls.last(), Some(&control::RESET));
        assert_eq!(session.monitoring().control_shadow(), 0);
    }

    #[test]
    fn bad_dac_selection_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings_for(dir.path());
        s.sel_nrn_vmem_dac.pop();
        let sim = SimRegisterFile::new().with_journal();
        let mut session = Session::new(sim.clone(), tiny_geometry(), options()).unwrap();
        assert!(matches!(
            session.bring_up(&s),
            Err(BioemusError::InvalidArgument { .. })
        ));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn missing_device_fails_before_touching_core() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings_for(dir.path());
        s.save_local_spikes = true;
        s.save_path = format!("{}/", dir.path().display());
        let sim = SimRegisterFile::new().with_journal();
        let mut session = Session::new(sim.clone(), tiny_geometry(), options()).unwrap();
        assert!(session.run(&s, &mut NoTransports, &StopHandle::new()).is_err());
        assert!(sim.writes().is_empty());
    }

    struct NoTransports;

    impl Transports for NoTransports {
        fn open_channel(&mut self, kind: StreamKind) -> Result<Box<dyn DmaTransport>> {
            Err(BioemusError::device_not_found(format!("/dev/none_{kind}")))
        }

        fn bind_publisher(&mut self, _: StreamKind, endpoint: &str) -> Result<Box<dyn Publisher>> {
            Err(BioemusError::BusDisconnected {
                endpoint: endpoint.to_string(),
            })
        }

        fn connect_subscriber(&mut self, endpoint: &str) -> Result<Box<dyn Subscriber>> {
            Err(BioemusError::BusDisconnected {
                endpoint: endpoint.to_string(),
            })
        }
    }
}
