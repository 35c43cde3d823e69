//! Message bus endpoints
//!
//! Three logical endpoints connect a run to the outside: the spike and
//! waveform streams go out over PUSH sockets bound locally, the stimulus
//! stream comes in over a PULL socket connected to a remote peer. Streaming
//! loops only see the [`Publisher`] / [`Subscriber`] traits, so tests swap in
//! the in-memory bus from [`memory_bus`].

use crate::error::{BioemusError, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::time::Duration;

/// Poll timeout of inbound receives.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Outbound endpoint. Sending never blocks.
pub trait Publisher: Send + Sync {
    /// Endpoint address for logs.
    fn endpoint(&self) -> &str;

    /// Queue one message. Messages the peer cannot take are dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the transport itself fails.
    fn send(&self, payload: &[u8]) -> Result<()>;
}

/// Inbound endpoint with a bounded poll.
pub trait Subscriber: Send + Sync {
    /// Endpoint address for logs.
    fn endpoint(&self) -> &str;

    /// Next message, or `None` when nothing arrived within the poll timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the peer is gone for good.
    fn recv(&self) -> Result<Option<Vec<u8>>>;
}

/// ZeroMQ PUSH socket bound to a local address.
pub struct ZmqPublisher {
    endpoint: String,
    socket: Mutex<zmq::Socket>,
}

impl ZmqPublisher {
    /// Create the socket and bind it to `endpoint` (e.g. `tcp://*:5557`).
    ///
    /// # Errors
    ///
    /// Returns [`BioemusError::Bus`] if the socket cannot be created or bound.
    pub fn bind(context: &zmq::Context, endpoint: &str) -> Result<Self> {
        let socket = context.socket(zmq::PUSH)?;
        socket.set_linger(0)?;
        socket.bind(endpoint)?;
        tracing::info!("Bind ZMQ PUSH socket to {endpoint}");
        Ok(Self {
            endpoint: endpoint.to_string(),
            socket: Mutex::new(socket),
        })
    }
}

impl std::fmt::Debug for ZmqPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZmqPublisher")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Publisher for ZmqPublisher {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        match self.socket.lock().send(payload, zmq::DONTWAIT) {
            Ok(()) => Ok(()),
            Err(zmq::Error::EAGAIN) => {
                tracing::trace!("{}: no peer ready, message dropped", self.endpoint);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// ZeroMQ PULL socket connected to a remote address.
pub struct ZmqSubscriber {
    endpoint: String,
    socket: Mutex<zmq::Socket>,
}

impl ZmqSubscriber {
    /// Create the socket with [`RECV_TIMEOUT`] and connect it to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`BioemusError::Bus`] if the socket cannot be created or connected.
    pub fn connect(context: &zmq::Context, endpoint: &str) -> Result<Self> {
        Self::connect_with_timeout(context, endpoint, RECV_TIMEOUT)
    }

    /// Same as [`connect`](Self::connect) with an explicit poll timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BioemusError::Bus`] if the socket cannot be created or connected.
    pub fn connect_with_timeout(
        context: &zmq::Context,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let millis = i32::try_from(timeout.as_millis())
            .map_err(|_| BioemusError::invalid_argument("receive timeout too large"))?;
        let socket = context.socket(zmq::PULL)?;
        socket.set_linger(0)?;
        socket.set_rcvtimeo(millis)?;
        socket.connect(endpoint)?;
        tracing::info!("Connect ZMQ PULL socket to {endpoint}");
        Ok(Self {
            endpoint: endpoint.to_string(),
            socket: Mutex::new(socket),
        })
    }
}

impl std::fmt::Debug for ZmqSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZmqSubscriber")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Subscriber for ZmqSubscriber {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn recv(&self) -> Result<Option<Vec<u8>>> {
        match self.socket.lock().recv_bytes(0) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sending half of an in-memory endpoint.
#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    endpoint: String,
    tx: Sender<Vec<u8>>,
}

/// Receiving half of an in-memory endpoint.
#[derive(Debug)]
pub struct MemorySubscriber {
    endpoint: String,
    rx: Receiver<Vec<u8>>,
    timeout: Duration,
}

impl MemorySubscriber {
    /// Use `timeout` instead of [`RECV_TIMEOUT`] per receive.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Take every queued message without waiting.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.rx.try_iter().collect()
    }
}

/// Connected in-memory PUSH/PULL pair named `endpoint`.
#[must_use]
pub fn memory_bus(endpoint: &str) -> (MemoryPublisher, MemorySubscriber) {
    let (tx, rx) = unbounded();
    (
        MemoryPublisher {
            endpoint: endpoint.to_string(),
            tx,
        },
        MemorySubscriber {
            endpoint: endpoint.to_string(),
            rx,
            timeout: RECV_TIMEOUT,
        },
    )
}

impl Publisher for MemoryPublisher {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        if self.tx.send(payload.to_vec()).is_err() {
            tracing::trace!("{}: receiver gone, message dropped", self.endpoint);
        }
        Ok(())
    }
}

impl Subscriber for MemorySubscriber {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn recv(&self) -> Result<Option<Vec<u8>>> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BioemusError::BusDisconnected {
                endpoint: self.endpoint.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_bus_delivers_in_order() {
        let (tx, rx) = memory_bus("mem://stim");
        tx.send(&[1, 2]).unwrap();
        tx.send(&[3]).unwrap();
        assert_eq!(rx.recv().unwrap(), Some(vec![1, 2]));
        assert_eq!(rx.recv().unwrap(), Some(vec![3]));
    }

    #[test]
    fn memory_bus_times_out_then_disconnects() {
        let (tx, rx) = memory_bus("mem://stim");
        let rx = rx.with_timeout(Duration::from_millis(5));
        assert_eq!(rx.recv().unwrap(), None);
        drop(tx);
        assert!(matches!(rx.recv(), Err(BioemusError::BusDisconnected { .. })));
    }

    #[test]
    fn memory_send_without_receiver_is_dropped() {
        let (tx, rx) = memory_bus("mem://spikes");
        drop(rx);
        assert!(tx.send(&[0; 4]).is_ok());
    }

    #[test]
    fn zmq_push_pull_over_inproc() {
        let ctx = zmq::Context::new();
        let publisher = ZmqPublisher::bind(&ctx, "inproc://bioemus-test").unwrap();
        let subscriber = ZmqSubscriber::connect(&ctx, "inproc://bioemus-test").unwrap();
        // DONTWAIT sends are dropped until the pipe is attached
        let mut received = None;
        for _ in 0..20 {
            publisher.send(b"frame").unwrap();
            received = subscriber.recv().unwrap();
            if received.is_some() {
                break;
            }
        }
        assert_eq!(received.as_deref(), Some(&b"frame"[..]));
    }
}
