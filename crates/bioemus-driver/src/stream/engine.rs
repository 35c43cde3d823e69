//! Streaming engine: start gate, loop threads, completion

use super::plan::TransferPlan;
use super::rx::ReceiveLoop;
use super::tx::StimulusLoop;
use super::{LoopReport, RunContext, StreamKind};
use crate::bus::Subscriber;
use crate::dma::DmaTransport;
use crate::error::{BioemusError, Result};
use tracing::{error, info};

/// Outcome of a streaming run.
#[derive(Debug, Default)]
pub struct EngineReport {
    /// Loops that ended normally.
    pub reports: Vec<LoopReport>,
    /// Loops that failed.
    pub failures: Vec<(StreamKind, BioemusError)>,
    /// The run never started: stop was requested at the start gate.
    pub aborted: bool,
}

impl EngineReport {
    /// Report of `kind`, if that loop ended normally.
    #[must_use]
    pub fn report(&self, kind: StreamKind) -> Option<&LoopReport> {
        self.reports.iter().find(|r| r.kind == kind)
    }

    /// Loop reports, or the first loop failure.
    ///
    /// # Errors
    ///
    /// The error of the first failed loop.
    pub fn into_result(mut self) -> Result<Vec<LoopReport>> {
        if self.failures.is_empty() {
            Ok(self.reports)
        } else {
            Err(self.failures.swap_remove(0).1)
        }
    }
}

/// Runs the loops of a [`TransferPlan`] over attached DMA channels.
#[derive(Debug)]
pub struct StreamingEngine {
    plan: TransferPlan,
    neurons: u32,
    spikes: Option<Box<dyn DmaTransport>>,
    vmem: Option<Box<dyn DmaTransport>>,
    stimulus: Option<Box<dyn DmaTransport>>,
}

impl StreamingEngine {
    /// Engine for `plan` on a core with `neurons` neurons.
    #[must_use]
    pub fn new(plan: TransferPlan, neurons: u32) -> Self {
        Self {
            plan,
            neurons,
            spikes: None,
            vmem: None,
            stimulus: None,
        }
    }

    /// Plan being run.
    #[must_use]
    pub fn plan(&self) -> &TransferPlan {
        &self.plan
    }

    /// Hand the channel of `kind` to the engine.
    ///
    /// # Errors
    ///
    /// [`BioemusError::InvalidArgument`] if the plan has no such loop or its
    /// transfers do not fit the channel's slots.
    pub fn attach(&mut self, kind: StreamKind, channel: Box<dyn DmaTransport>) -> Result<()> {
        let spec = self
            .plan
            .spec(kind)
            .ok_or_else(|| BioemusError::invalid_argument(format!("no {kind} loop planned")))?;
        if spec.transfer_bytes > channel.slot_capacity() {
            return Err(BioemusError::invalid_argument(format!(
                "{kind} transfer of {} bytes larger than DMA buffer ({} bytes)",
                spec.transfer_bytes,
                channel.slot_capacity()
            )));
        }
        let place = match kind {
            StreamKind::Spikes => &mut self.spikes,
            StreamKind::Vmem => &mut self.vmem,
            StreamKind::Stimulus => &mut self.stimulus,
        };
        *place = Some(channel);
        Ok(())
    }

    /// Run every planned loop to completion.
    ///
    /// With a stimulus loop planned, the first inbound pattern is awaited and
    /// consumed as the start signal before `start` (enabling the core) is
    /// called. Loops then run on their own threads. Without a receive loop,
    /// stop is requested once the emulation time has elapsed.
    ///
    /// Setup failures (missing channel, unopenable output file, `start`
    /// failing) are returned as errors before any loop starts; loop failures
    /// are collected in the report.
    ///
    /// # Errors
    ///
    /// Setup failures only.
    pub fn run(&mut self, ctx: &RunContext, start: impl FnOnce() -> Result<()>) -> Result<EngineReport> {
        let Self {
            plan,
            neurons,
            spikes,
            vmem,
            stimulus,
        } = self;
        let plan = &*plan;
        let neurons = *neurons;

        let mut receivers = Vec::new();
        for (spec, channel) in [(&plan.spikes, spikes), (&plan.vmem, vmem)] {
            if let Some(spec) = spec {
                let channel = channel.as_deref_mut().ok_or_else(|| {
                    BioemusError::invalid_state(format!("no DMA channel attached for {}", spec.kind))
                })?;
                receivers.push((spec.kind, ReceiveLoop::new(spec, neurons, channel)?));
            }
        }
        let transmitter = match &plan.stimulus {
            Some(spec) => {
                let channel = stimulus
                    .as_deref_mut()
                    .ok_or_else(|| BioemusError::invalid_state("no DMA channel attached for stimulus"))?;
                let subscriber = ctx
                    .subscriber()
                    .ok_or_else(|| BioemusError::invalid_state("no bus endpoint for stimulus"))?;
                let looped = StimulusLoop::new(spec, channel)?;
                if !await_start_gate(subscriber, ctx)? {
                    info!("Stop requested before the first stimulation pattern");
                    return Ok(EngineReport {
                        aborted: true,
                        ..EngineReport::default()
                    });
                }
                Some(looped)
            }
            None => None,
        };

        start()?;

        for kind in [StreamKind::Spikes, StreamKind::Vmem] {
            if plan.spec(kind).is_some() {
                ctx.mark_active(kind);
            }
        }
        let has_receivers = !receivers.is_empty();
        let emulation = plan.emulation;

        let outcomes = std::thread::scope(|s| -> Result<Vec<(StreamKind, Result<LoopReport>)>> {
            let mut handles = Vec::new();
            for (kind, looped) in receivers {
                let handle = std::thread::Builder::new()
                    .name(format!("rx_{kind}"))
                    .spawn_scoped(s, move || looped.run(ctx))?;
                handles.push((kind, handle));
            }
            if let Some(looped) = transmitter {
                let handle = std::thread::Builder::new()
                    .name("tx_stimulus".into())
                    .spawn_scoped(s, move || looped.run(ctx))?;
                handles.push((StreamKind::Stimulus, handle));
            }

            if !has_receivers && !ctx.stop().wait_timeout(emulation) {
                info!("Emulation time of {emulation:?} elapsed");
                ctx.stop().request_stop();
            }

            Ok(handles
                .into_iter()
                .map(|(kind, handle)| {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|_| Err(BioemusError::invalid_state(format!("{kind} loop panicked"))));
                    (kind, outcome)
                })
                .collect())
        })?;

        let mut report = EngineReport::default();
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(r) => report.reports.push(r),
                Err(e) => {
                    error!("{kind} loop failed: {e}");
                    report.failures.push((kind, e));
                }
            }
        }
        Ok(report)
    }
}

/// Wait for the first stimulus pattern. Returns `false` if stopped first.
fn await_start_gate(subscriber: &dyn Subscriber, ctx: &RunContext) -> Result<bool> {
    info!("Waiting for stimulation trigger to start");
    while !ctx.stop().is_stop_requested() {
        if subscriber.recv()?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{memory_bus, Publisher};
    use crate::dma::{SimDmaChannel, SlotStatus};
    use crate::stream::plan::{TransferCount, TransferSpec};
    use crate::stream::{Endpoints, StopHandle};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn spec(kind: StreamKind, bytes: usize, count: TransferCount) -> TransferSpec {
        TransferSpec {
            kind,
            transfer_bytes: bytes,
            count,
            save: None,
            send: None,
        }
    }

    #[test]
    fn runs_both_receivers() {
        let plan = TransferPlan {
            spikes: Some(spec(StreamKind::Spikes, 12, TransferCount::Finite(3))),
            vmem: Some(spec(StreamKind::Vmem, 68, TransferCount::Finite(4))),
            ..TransferPlan::default()
        };
        let mut engine = StreamingEngine::new(plan, 64);
        engine
            .attach(StreamKind::Spikes, Box::new(SimDmaChannel::new("rx_spk", 2, 128)))
            .unwrap();
        engine
            .attach(StreamKind::Vmem, Box::new(SimDmaChannel::new("rx_vmem", 2, 128)))
            .unwrap();
        let ctx = RunContext::new(StopHandle::new(), Endpoints::default());
        let started = AtomicBool::new(false);
        let report = engine
            .run(&ctx, || {
                started.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(report.report(StreamKind::Spikes).unwrap().transfers, 3);
        assert_eq!(report.report(StreamKind::Vmem).unwrap().transfers, 4);
        assert!(ctx.receivers_finished());
        assert_eq!(report.into_result().unwrap().len(), 2);
    }

    #[test]
    fn failing_loop_does_not_stop_the_other() {
        let plan = TransferPlan {
            spikes: Some(spec(StreamKind::Spikes, 12, TransferCount::Finite(3))),
            vmem: Some(spec(StreamKind::Vmem, 68, TransferCount::Finite(5))),
            ..TransferPlan::default()
        };
        let mut engine = StreamingEngine::new(plan, 64);
        engine
            .attach(
                StreamKind::Spikes,
                Box::new(SimDmaChannel::new("rx_spk", 2, 128).with_device(|_, _| SlotStatus::Timeout)),
            )
            .unwrap();
        engine
            .attach(StreamKind::Vmem, Box::new(SimDmaChannel::new("rx_vmem", 2, 128)))
            .unwrap();
        let ctx = RunContext::new(StopHandle::new(), Endpoints::default());
        let report = engine.run(&ctx, || Ok(())).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, StreamKind::Spikes);
        assert_eq!(report.report(StreamKind::Vmem).unwrap().transfers, 5);
        assert!(matches!(report.into_result(), Err(BioemusError::TransferFailed { .. })));
    }

    #[test]
    fn missing_channel_is_a_setup_error() {
        let plan = TransferPlan {
            spikes: Some(spec(StreamKind::Spikes, 12, TransferCount::Finite(1))),
            ..TransferPlan::default()
        };
        let mut engine = StreamingEngine::new(plan, 64);
        let ctx = RunContext::new(StopHandle::new(), Endpoints::default());
        let mut started = false;
        assert!(engine
            .run(&ctx, || {
                started = true;
                Ok(())
            })
            .is_err());
        assert!(!started);
    }

    #[test]
    fn attach_checks_plan_and_capacity() {
        let plan = TransferPlan {
            spikes: Some(spec(StreamKind::Spikes, 256, TransferCount::Finite(1))),
            ..TransferPlan::default()
        };
        let mut engine = StreamingEngine::new(plan, 64);
        assert!(engine
            .attach(StreamKind::Vmem, Box::new(SimDmaChannel::new("rx_vmem", 1, 512)))
            .is_err());
        assert!(engine
            .attach(StreamKind::Spikes, Box::new(SimDmaChannel::new("rx_spk", 1, 128)))
            .is_err());
    }

    #[test]
    fn stimulus_gate_and_deadline() {
        let plan = TransferPlan {
            stimulus: Some(spec(StreamKind::Stimulus, 8, TransferCount::UntilStopped)),
            emulation: Duration::from_millis(50),
            ..TransferPlan::default()
        };
        let tx_channel = SimDmaChannel::new("tx_ext_stim", 1, 64).with_journal();
        let journal = tx_channel.journal();
        let mut engine = StreamingEngine::new(plan, 64);
        engine.attach(StreamKind::Stimulus, Box::new(tx_channel)).unwrap();
        let (tx, rx) = memory_bus("mem://stim");
        let ctx = RunContext::new(
            StopHandle::new(),
            Endpoints {
                stimulus: Some(Box::new(rx.with_timeout(Duration::from_millis(5)))),
                ..Endpoints::default()
            },
        );
        tx.send(&[0xFF; 8]).unwrap();
        tx.send(&[7; 8]).unwrap();
        let report = engine.run(&ctx, || Ok(())).unwrap();
        assert!(ctx.stop().is_stop_requested());
        let stim = report.report(StreamKind::Stimulus).unwrap();
        assert_eq!(stim.transfers, 1);
        // the gate pattern is consumed, not injected
        assert_eq!(journal.transfers()[0].data, vec![7; 8]);
    }

    #[test]
    fn stop_at_gate_aborts_without_start() {
        let plan = TransferPlan {
            stimulus: Some(spec(StreamKind::Stimulus, 8, TransferCount::UntilStopped)),
            ..TransferPlan::default()
        };
        let mut engine = StreamingEngine::new(plan, 64);
        engine
            .attach(StreamKind::Stimulus, Box::new(SimDmaChannel::new("tx_ext_stim", 1, 64)))
            .unwrap();
        let (_tx, rx) = memory_bus("mem://stim");
        let stop = StopHandle::new();
        stop.request_stop();
        let ctx = RunContext::new(
            stop,
            Endpoints {
                stimulus: Some(Box::new(rx.with_timeout(Duration::from_millis(5)))),
                ..Endpoints::default()
            },
        );
        let report = engine
            .run(&ctx, || Err(BioemusError::invalid_state("must not start")))
            .unwrap();
        assert!(report.aborted);
        assert!(report.reports.is_empty());
    }
}
