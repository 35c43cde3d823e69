//! Streaming engine tests against simulated DMA channels
//!
//! Each test scripts the device side of a channel and checks what reaches
//! the ring, the output file and the bus.

mod common;

use bioemus_driver::dma::SlotStatus;
use bioemus_driver::stream::{TransferCount, TransferSpec};
use bioemus_driver::{
    memory_bus, Endpoints, OutputFormat, Publisher, RunContext, SimDmaChannel, StopHandle, StreamKind,
    StreamingEngine, TransferPlan,
};
use common::spike_frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NEURONS: u32 = 32;
const FRAME: usize = 8;

fn spike_spec(count: TransferCount, save: Option<std::path::PathBuf>) -> TransferSpec {
    TransferSpec {
        kind: StreamKind::Spikes,
        transfer_bytes: FRAME,
        count,
        save: save.map(|p| (p, OutputFormat::Text)),
        send: None,
    }
}

fn spikes_only(spec: TransferSpec) -> TransferPlan {
    TransferPlan {
        spikes: Some(spec),
        emulation: Duration::from_secs(1),
        ..TransferPlan::default()
    }
}

#[test]
fn test_spike_csv_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("raster_net.csv");
    let channel = SimDmaChannel::new("rx_spk", 2, 64).with_journal().with_device(|seq, buf| {
        let frame = if seq == 0 {
            spike_frame(100, &[1])
        } else {
            spike_frame(100 + 32 * seq as u32, &[0])
        };
        buf[..FRAME].copy_from_slice(&frame);
        SlotStatus::Ok
    });
    let journal = channel.journal();

    let mut engine = StreamingEngine::new(
        spikes_only(spike_spec(TransferCount::Finite(3), Some(csv.clone()))),
        NEURONS,
    );
    engine.attach(StreamKind::Spikes, Box::new(channel)).unwrap();
    let ctx = RunContext::new(StopHandle::new(), Endpoints::default());
    let started = AtomicBool::new(false);
    let report = engine
        .run(&ctx, || {
            started.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(started.load(Ordering::SeqCst));
    let loops = report.into_result().unwrap();
    assert_eq!(loops.len(), 1);
    assert_eq!(loops[0].transfers, 3);
    assert_eq!(journal.slots(), vec![0, 1, 0]);
    assert_eq!(std::fs::read_to_string(&csv).unwrap(), "time;neuron_id\n100;0\n");
}

#[test]
fn test_stop_during_transfer_keeps_received_data() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("raster_net.csv");
    let stop = StopHandle::new();
    let trigger = stop.clone();
    let channel = SimDmaChannel::new("rx_spk", 4, 64).with_device(move |seq, buf| {
        let frame = match seq {
            0 => spike_frame(100, &[1]),
            _ => {
                trigger.request_stop();
                spike_frame(200, &[1 << 3])
            }
        };
        buf[..FRAME].copy_from_slice(&frame);
        SlotStatus::Ok
    });

    let mut engine = StreamingEngine::new(
        spikes_only(spike_spec(TransferCount::UntilStopped, Some(csv.clone()))),
        NEURONS,
    );
    engine.attach(StreamKind::Spikes, Box::new(channel)).unwrap();
    let ctx = RunContext::new(stop.clone(), Endpoints::default());
    let report = engine.run(&ctx, || Ok(())).unwrap();

    let spikes = report.report(StreamKind::Spikes).unwrap();
    assert_eq!(spikes.transfers, 2);
    assert!(spikes.stopped_early);
    assert!(stop.is_stop_requested());
    assert_eq!(
        std::fs::read_to_string(&csv).unwrap(),
        "time;neuron_id\n100;0\n200;3\n"
    );
}

#[test]
fn test_stimulus_gate_then_forwarding() {
    let spikes = SimDmaChannel::new("rx_spk", 4, 64)
        .with_latency(Duration::from_millis(5))
        .with_device(|seq, buf| {
            buf[..FRAME].copy_from_slice(&spike_frame(seq as u32, &[0]));
            SlotStatus::Ok
        });
    let stim = SimDmaChannel::new("tx_ext_stim", 1, 64).with_journal();
    let stim_journal = stim.journal();

    let plan = TransferPlan {
        spikes: Some(TransferSpec {
            send: Some(OutputFormat::Binary),
            ..spike_spec(TransferCount::Finite(40), None)
        }),
        stimulus: Some(TransferSpec {
            kind: StreamKind::Stimulus,
            transfer_bytes: 16,
            count: TransferCount::UntilStopped,
            save: None,
            send: None,
        }),
        emulation: Duration::from_secs(1),
        ..TransferPlan::default()
    };
    let mut engine = StreamingEngine::new(plan, NEURONS);
    engine.attach(StreamKind::Spikes, Box::new(spikes)).unwrap();
    engine.attach(StreamKind::Stimulus, Box::new(stim)).unwrap();

    let (spk_tx, spk_rx) = memory_bus("mem://spikes");
    let (stim_tx, stim_rx) = memory_bus("mem://stim");
    let ctx = RunContext::new(
        StopHandle::new(),
        Endpoints {
            spikes: Some(Box::new(spk_tx)),
            stimulus: Some(Box::new(stim_rx.with_timeout(Duration::from_millis(5)))),
            ..Endpoints::default()
        },
    );

    // gate, then one pattern the loop forwards
    stim_tx.send(b"go").unwrap();
    stim_tx.send(&[7; 16]).unwrap();
    let enabled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&enabled);
    let report = engine
        .run(&ctx, move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(enabled.load(Ordering::SeqCst));
    assert!(!report.aborted);
    assert!(!ctx.stop().is_stop_requested());
    let stim_report = report.report(StreamKind::Stimulus).unwrap();
    assert!(!stim_report.stopped_early);
    assert_eq!(stim_report.transfers, 1);
    assert_eq!(stim_journal.transfers()[0].data, vec![7; 16]);
    assert_eq!(spk_rx.drain().len(), 40);
}

#[test]
fn test_stop_at_gate_never_enables_core() {
    let plan = TransferPlan {
        stimulus: Some(TransferSpec {
            kind: StreamKind::Stimulus,
            transfer_bytes: 16,
            count: TransferCount::UntilStopped,
            save: None,
            send: None,
        }),
        emulation: Duration::from_secs(1),
        ..TransferPlan::default()
    };
    let mut engine = StreamingEngine::new(plan, NEURONS);
    engine
        .attach(StreamKind::Stimulus, Box::new(SimDmaChannel::new("tx_ext_stim", 1, 64)))
        .unwrap();
    let (_stim_tx, stim_rx) = memory_bus("mem://stim");
    let stop = StopHandle::new();
    let ctx = RunContext::new(
        stop.clone(),
        Endpoints {
            stimulus: Some(Box::new(stim_rx.with_timeout(Duration::from_millis(5)))),
            ..Endpoints::default()
        },
    );

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        stop.request_stop();
    });
    let report = engine
        .run(&ctx, || panic!("core must stay disabled"))
        .unwrap();
    stopper.join().unwrap();

    assert!(report.aborted);
    assert!(report.reports.is_empty());
}
