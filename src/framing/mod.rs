//! Wire framing for media messages
//!
//! # TCP Protocol Specification
//!
//! A logical message of `total_message_length` bytes travels as one or more
//! chunks of at most [`MAX_CHUNK`] bytes, each preceded by a fixed 24-byte
//! header:
//!
//! ```text
//! ┌────────┬──────────────────────┬───────────────────────────────┐
//! │ offset │ field                │ notes                         │
//! ├────────┼──────────────────────┼───────────────────────────────┤
//! │ 0      │ u32 front_sentinel   │ always 0 (desync detector)    │
//! │ 4      │ u16 packet_number    │ +1 per logical message        │
//! │ 6      │ u16 sequence_number  │ +1 per chunk within a message │
//! │ 8      │ u16 session_number   │ stamped at session start      │
//! │ 10     │ u16 timestamp        │ low bits of epoch millis      │
//! │ 12     │ u32 chunk_data_length│ payload bytes after header    │
//! │ 16     │ u32 total_message_length                             │
//! │ 20     │ u32 back_sentinel    │ always 0                      │
//! └────────┴──────────────────────┴───────────────────────────────┘
//! ```
//!
//! followed immediately by `chunk_data_length` raw payload bytes. All fields
//! are big-endian (network byte order). The sentinels are a desync detector,
//! not a checksum: a header with a non-zero sentinel means the stream is
//! corrupt and the connection must be dropped; there is no mid-stream
//! resynchronization.
//!
//! The `session_number` changes whenever the sender establishes a new
//! logical connection, letting the receiver tell a redial apart from
//! chunks of the connection it replaced.

mod header;
mod reader;
mod writer;

pub use header::{FrameHeader, HEADER_LEN, MAX_CHUNK};
pub use reader::FrameReader;
pub use writer::{FrameWriter, SendState};

use std::time::{SystemTime, UNIX_EPOCH};

/// Header timestamp: low 16 bits of epoch milliseconds. Informational only.
pub fn wire_timestamp() -> u16 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u16)
        .unwrap_or(0)
}
