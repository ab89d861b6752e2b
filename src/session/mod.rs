//! Network sessions
//!
//! A session is one TCP connection, client-dialed or server-accepted, in
//! one of two roles: a [`ReaderSession`] receives a stream of framed media
//! buffers (camera uplink), a [`WriterSession`] pushes a FIFO queue of
//! buffers to its peer (headset downlink) and optionally receives control
//! frames back. Sessions own their threads; `stop()` cancels pending I/O
//! via socket shutdown and joins before returning, so no event fires after
//! it returns.

pub mod classify;
mod dial;
mod reader;
mod writer;

pub use classify::{AcceptClass, ClassifyPolicy};
pub use dial::{connect, FIXED_LOCAL_PORTS};
pub use reader::ReaderSession;
pub use writer::WriterSession;

use crate::buffers::BufferHandle;
use crate::config::RelayConfig;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// Session identity: the peer's network address.
///
/// Reconnecting peers show up with a fresh ephemeral source port, so the
/// host address is the stable identity key. Ordered so routing decisions
/// ("next reader") are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub IpAddr);

impl SessionId {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.ip())
    }

    /// Low byte of the address, used by operators to name an endpoint
    pub fn suffix(&self) -> u8 {
        match self.0 {
            IpAddr::V4(v4) => v4.octets()[3],
            IpAddr::V6(v6) => v6.octets()[15],
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection lifecycle, exposed for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Events sessions emit toward the dispatch loop
#[derive(Debug)]
pub enum SessionEvent {
    /// A fully reassembled message from a reader session
    Inbound {
        reader: SessionId,
        buffer: BufferHandle,
    },
    /// A reader session ended (error, peer close or stop)
    ReaderClosed(SessionId),
    /// A writer session ended
    WriterClosed(SessionId),
    /// A writer peer asked to be re-routed to the reader with `suffix`
    SwitchRequest { writer: SessionId, suffix: u8 },
}

pub type EventSender = crossbeam_channel::Sender<SessionEvent>;
pub type EventReceiver = crossbeam_channel::Receiver<SessionEvent>;

/// Per-session timing and dialing knobs, resolved once at startup
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub fixed_local_port: bool,
}

impl SessionConfig {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            read_timeout: config.transport.read_timeout(),
            write_timeout: config.transport.write_timeout(),
            reconnect_backoff: config.transport.reconnect_backoff(),
            fixed_local_port: config.network.fixed_local_port,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(1),
            fixed_local_port: false,
        }
    }
}

/// Producer-facing session handle: the routing layer only needs identity
/// and teardown.
pub trait Uplink: Send + Sync {
    fn id(&self) -> SessionId;
    fn stop(&self);
}

/// Consumer-facing session handle: identity, non-blocking enqueue, teardown.
pub trait Downlink: Send + Sync {
    fn id(&self) -> SessionId;
    fn post(&self, buffer: BufferHandle);
    fn stop(&self);
}

static SESSION_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Fresh session number for a new logical connection.
///
/// Seeded from the clock and salted with a process-wide counter so
/// consecutive dials from one process never reuse a number.
pub(crate) fn next_session_number() -> u16 {
    crate::framing::wire_timestamp().wrapping_add(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Sleep in short slices so shutdown is observed promptly
pub(crate) fn sleep_interruptible(total: Duration, running: &std::sync::atomic::AtomicBool) {
    let slice = Duration::from_millis(50);
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
}
