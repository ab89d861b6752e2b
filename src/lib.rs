//! Media buffer relay: pooled zero-copy buffers, a chunked TCP framing
//! protocol with reconnect, and reader/writer session routing.
//!
//! The crate is organized in four layers:
//!
//! - [`buffers`]: a fixed pool of reusable media buffers with an overflow
//!   fallback, handed around as RAII handles
//! - [`framing`]: the 24-byte-header chunked wire format and the
//!   send/receive state machines that stream whole messages over TCP
//! - [`session`]: one thread-owning session per TCP connection, in reader
//!   (producer) or writer (consumer) role, with dial-side reconnect
//! - [`routing`]: the connection manager binding writers to readers and
//!   the runtime switching strategies
//!
//! The `drishti-relay` binary in `main.rs` wires these into a daemon; the
//! library surface is usable on the client side too (dialing sessions into
//! a remote relay).

pub mod app;
pub mod buffers;
pub mod config;
pub mod error;
pub mod framing;
pub mod routing;
pub mod session;

pub use buffers::{BufferHandle, BufferPool, PoolStats};
pub use config::RelayConfig;
pub use error::{Error, Result};
pub use framing::{FrameHeader, FrameReader, FrameWriter, HEADER_LEN, MAX_CHUNK};
pub use routing::{ConnectionManager, SwitchStrategy};
pub use session::{ReaderSession, SessionId, WriterSession};
