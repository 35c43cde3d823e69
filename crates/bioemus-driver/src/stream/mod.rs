//! DMA telemetry streaming
//!
//! One thread per active loop moves data between a DMA slot ring and the
//! outside world:
//!
//! ```text
//! rx spikes    DMA → file (raw | time;neuron_id CSV) and/or bus (raw | counts)
//! rx vmem      DMA → file (raw) and/or bus (raw)
//! tx stimulus  bus → DMA
//! ```
//!
//! Loops share nothing but a [`RunContext`]: the stop flag, the per-loop
//! completion flags and the bus endpoints. Each loop owns its channel for
//! the whole run. Cancellation is cooperative and checked between
//! transfers, so an in-flight transfer always completes and is delivered.

pub mod engine;
pub mod plan;
pub mod rx;
pub mod sink;
pub mod tx;

pub use engine::{EngineReport, StreamingEngine};
pub use plan::{config_tag, TransferCount, TransferPlan, TransferSpec};
pub use rx::ReceiveLoop;
pub use sink::Sink;
pub use tx::StimulusLoop;

use crate::bus::{Publisher, Subscriber};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Logical stream of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Spike frames from the fabric.
    Spikes,
    /// Membrane voltage frames from the fabric.
    Vmem,
    /// External stimulus patterns to the fabric.
    Stimulus,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spikes => write!(f, "spikes"),
            Self::Vmem => write!(f, "vmem"),
            Self::Stimulus => write!(f, "stimulus"),
        }
    }
}

/// Encoding of saved or forwarded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Payload bytes as received.
    Binary,
    /// Decoded representation.
    Text,
}

impl OutputFormat {
    /// Map a `bin_fmt_*` settings flag.
    #[must_use]
    pub const fn from_binary_flag(binary: bool) -> Self {
        if binary {
            Self::Binary
        } else {
            Self::Text
        }
    }
}

/// Lifecycle of a streaming loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed, nothing submitted.
    Idle,
    /// Moving transfers.
    Running,
    /// Stop observed; the last transfer was delivered, no new one is submitted.
    Draining,
    /// Output closed, completion signalled.
    Stopped,
}

/// Outcome of one loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    /// Stream the loop served.
    pub kind: StreamKind,
    /// Completed transfers.
    pub transfers: u64,
    /// Payload bytes moved.
    pub bytes: u64,
    /// Whether the loop left early on a stop request.
    pub stopped_early: bool,
}

struct StopInner {
    requested: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Shared, externally settable stop request.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    /// A handle with no stop requested.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StopInner {
                requested: AtomicBool::new(false),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    /// Ask every loop to finish after its current transfer.
    pub fn request_stop(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, waking early on a stop request. Returns
    /// whether a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_stop_requested() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                return self.is_stop_requested();
            }
        }
        true
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("requested", &self.is_stop_requested())
            .finish()
    }
}

/// Bus endpoints of a run. Loops borrow them; the control thread owns them.
#[derive(Default)]
pub struct Endpoints {
    /// Outbound spike stream.
    pub spikes: Option<Box<dyn Publisher>>,
    /// Outbound waveform stream.
    pub vmem: Option<Box<dyn Publisher>>,
    /// Inbound stimulus stream.
    pub stimulus: Option<Box<dyn Subscriber>>,
}

#[derive(Debug, Default)]
struct ReceiverFlags {
    active: AtomicBool,
    done: AtomicBool,
}

/// Everything the loops of one run share.
pub struct RunContext {
    stop: StopHandle,
    spikes: ReceiverFlags,
    vmem: ReceiverFlags,
    endpoints: Endpoints,
}

impl RunContext {
    /// Context over `stop` and `endpoints`, with no receive loop active.
    #[must_use]
    pub fn new(stop: StopHandle, endpoints: Endpoints) -> Self {
        Self {
            stop,
            spikes: ReceiverFlags::default(),
            vmem: ReceiverFlags::default(),
            endpoints,
        }
    }

    /// The run's stop request.
    #[must_use]
    pub fn stop(&self) -> &StopHandle {
        &self.stop
    }

    /// Outbound endpoint of `kind`, if configured.
    #[must_use]
    pub fn publisher(&self, kind: StreamKind) -> Option<&dyn Publisher> {
        match kind {
            StreamKind::Spikes => self.endpoints.spikes.as_deref(),
            StreamKind::Vmem => self.endpoints.vmem.as_deref(),
            StreamKind::Stimulus => None,
        }
    }

    /// Inbound stimulus endpoint, if configured.
    #[must_use]
    pub fn subscriber(&self) -> Option<&dyn Subscriber> {
        self.endpoints.stimulus.as_deref()
    }

    fn receiver(&self, kind: StreamKind) -> Option<&ReceiverFlags> {
        match kind {
            StreamKind::Spikes => Some(&self.spikes),
            StreamKind::Vmem => Some(&self.vmem),
            StreamKind::Stimulus => None,
        }
    }

    /// Record that a receive loop of `kind` takes part in the run.
    pub(crate) fn mark_active(&self, kind: StreamKind) {
        if let Some(flags) = self.receiver(kind) {
            flags.done.store(false, Ordering::SeqCst);
            flags.active.store(true, Ordering::SeqCst);
        }
    }

    /// Record that the receive loop of `kind` has ended.
    pub(crate) fn mark_done(&self, kind: StreamKind) {
        if let Some(flags) = self.receiver(kind) {
            flags.done.store(true, Ordering::SeqCst);
        }
    }

    /// Whether at least one receive loop was active and all active ones
    /// have ended.
    #[must_use]
    pub fn receivers_finished(&self) -> bool {
        let active: Vec<&ReceiverFlags> = [&self.spikes, &self.vmem]
            .into_iter()
            .filter(|f| f.active.load(Ordering::SeqCst))
            .collect();
        !active.is_empty() && active.iter().all(|f| f.done.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("stop", &self.stop)
            .field("spikes", &self.spikes)
            .field("vmem", &self.vmem)
            .finish_non_exhaustive()
    }
}

/// Marks a receive loop done when dropped, including on error or panic.
pub(crate) struct DoneGuard<'a> {
    ctx: &'a RunContext,
    kind: StreamKind,
}

impl<'a> DoneGuard<'a> {
    pub(crate) fn new(ctx: &'a RunContext, kind: StreamKind) -> Self {
        Self { ctx, kind }
    }
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.ctx.mark_done(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_wakes_waiter() {
        let stop = StopHandle::new();
        let waiter = stop.clone();
        let t = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        stop.request_stop();
        assert!(t.join().unwrap());
    }

    #[test]
    fn wait_times_out_without_stop() {
        let stop = StopHandle::new();
        assert!(!stop.wait_timeout(Duration::from_millis(5)));
        assert!(!stop.is_stop_requested());
    }

    #[test]
    fn receivers_finished_tracks_active_loops_only() {
        let ctx = RunContext::new(StopHandle::new(), Endpoints::default());
        assert!(!ctx.receivers_finished());
        ctx.mark_active(StreamKind::Spikes);
        ctx.mark_active(StreamKind::Vmem);
        {
            let _guard = DoneGuard::new(&ctx, StreamKind::Spikes);
        }
        assert!(!ctx.receivers_finished());
        ctx.mark_done(StreamKind::Vmem);
        assert!(ctx.receivers_finished());

        let single = RunContext::new(StopHandle::new(), Endpoints::default());
        single.mark_active(StreamKind::Vmem);
        single.mark_done(StreamKind::Vmem);
        assert!(single.receivers_finished());
    }

    #[test]
    fn binary_flag_mapping() {
        assert_eq!(OutputFormat::from_binary_flag(true), OutputFormat::Binary);
        assert_eq!(OutputFormat::from_binary_flag(false), OutputFormat::Text);
    }
}
