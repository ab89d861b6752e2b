//! Receiver side of the chunked framing protocol
//!
//! Mirrors the sender state machine: read a header, validate it, pull the
//! chunk payload straight into a pooled buffer at the current reassembly
//! offset, repeat until the logical message is complete. Inbound bytes land
//! in pooled memory with no intermediate copy.

use super::header::{FrameHeader, HEADER_LEN};
use crate::buffers::{BufferHandle, BufferPool};
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};

/// Reassembles logical messages from a chunked byte stream.
///
/// One reader per connection. The reader remembers the peer's session
/// number so a redial (which restamps the session number) is told apart
/// from stream corruption: at a message boundary a new session number is
/// simply adopted, mid-message it abandons the partial assembly in favor
/// of the new connection's first message.
#[derive(Debug, Default)]
pub struct FrameReader {
    session_number: Option<u16>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next complete, deliverable message into a pooled buffer.
    ///
    /// Returns `Ok(None)` when the read deadline expires before the first
    /// header byte arrives: an idle poll, not an error. A deadline expiring
    /// anywhere past that point is a protocol failure and the caller must
    /// drop the connection. Messages that had to be assembled in the
    /// overflow buffer are discarded here (drop under pressure) and the
    /// next message is read instead.
    pub fn read_message<R: Read>(
        &mut self,
        r: &mut R,
        pool: &BufferPool,
    ) -> Result<Option<BufferHandle>> {
        let mut pending: Option<FrameHeader> = None;

        loop {
            let first = match pending.take() {
                Some(header) => header,
                None => match read_header(r, true)? {
                    Some(header) => header,
                    None => return Ok(None),
                },
            };

            if first.sequence_number != 0 {
                return Err(Error::InvalidFrame(format!(
                    "continuation chunk (sequence {}) without a message start",
                    first.sequence_number
                )));
            }
            if let Some(previous) = self.session_number {
                if previous != first.session_number {
                    log::info!(
                        "peer session changed ({} -> {}), new logical connection",
                        previous,
                        first.session_number
                    );
                }
            }
            self.session_number = Some(first.session_number);

            let total = first.total_len as usize;
            let handle = pool.acquire();
            if total > handle.capacity() {
                return Err(Error::InvalidFrame(format!(
                    "message length {} exceeds buffer capacity {}",
                    total,
                    handle.capacity()
                )));
            }

            {
                let mut buf = handle.write();
                buf.set_len(total).map_err(|_| {
                    Error::InvalidFrame(format!(
                        "message length {total} does not fit a fixed-length buffer"
                    ))
                })?;

                let mut expected = first;
                let mut bytes_written = 0usize;
                loop {
                    let chunk = expected.chunk_len as usize;
                    if bytes_written + chunk > total {
                        return Err(Error::InvalidFrame(format!(
                            "chunks overrun message length {total}"
                        )));
                    }
                    read_full(r, &mut buf.as_mut_slice()[bytes_written..bytes_written + chunk])?;
                    bytes_written += chunk;
                    if bytes_written >= total {
                        break;
                    }

                    let next = match read_header(r, false)? {
                        Some(header) => header,
                        // Strict reads never report idle
                        None => return Err(Error::Timeout),
                    };
                    if next.session_number != expected.session_number {
                        log::warn!(
                            "peer session changed mid-message ({} -> {}), dropping partial assembly",
                            expected.session_number,
                            next.session_number
                        );
                        pending = Some(next);
                        break;
                    }
                    if next.packet_number != expected.packet_number
                        || next.sequence_number != expected.sequence_number.wrapping_add(1)
                    {
                        return Err(Error::InvalidFrame(format!(
                            "chunk out of order: packet {} sequence {} after packet {} sequence {}",
                            next.packet_number,
                            next.sequence_number,
                            expected.packet_number,
                            expected.sequence_number
                        )));
                    }
                    // The sender never emits empty continuations; accepting
                    // one would loop here without consuming any payload.
                    if next.chunk_len == 0 {
                        return Err(Error::InvalidFrame(format!(
                            "zero-length continuation chunk in packet {}",
                            next.packet_number
                        )));
                    }
                    expected = next;
                }
            }

            if pending.is_some() {
                // Abandoned assembly; the handle drops back to the pool here
                continue;
            }
            if handle.is_overflow() {
                log::debug!("discarding message assembled in the overflow buffer");
                continue;
            }
            return Ok(Some(handle));
        }
    }
}

/// Read one header, looping on partial reads.
///
/// With `allow_idle`, a deadline expiring before the first byte returns
/// `Ok(None)` so callers can poll their shutdown flags; once any byte has
/// been consumed a deadline is an error. EOF is always `Disconnected`.
fn read_header<R: Read>(r: &mut R, allow_idle: bool) -> Result<Option<FrameHeader>> {
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0usize;
    while filled < HEADER_LEN {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                if filled == 0 && allow_idle {
                    return Ok(None);
                }
                return Err(Error::Timeout);
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    FrameHeader::decode(&buf).map(Some)
}

/// Fill a payload slice, looping on partial reads
fn read_full<R: Read>(r: &mut R, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        match r.read(buf) {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => buf = &mut buf[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                return Err(Error::Timeout)
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::writer::{FrameWriter, SendState};
    use crate::framing::{wire_timestamp, MAX_CHUNK};
    use std::io::Cursor;

    fn read_one(stream: &[u8], pool: &BufferPool) -> Result<Option<BufferHandle>> {
        FrameReader::new().read_message(&mut Cursor::new(stream), pool)
    }

    #[test]
    fn test_round_trip_single_chunk() {
        let pool = BufferPool::new(2, 1024);
        let mut out = Vec::new();
        let payload: Vec<u8> = (0..200).map(|i| (i % 7) as u8).collect();
        FrameWriter::new(3).write_message(&mut out, &payload).unwrap();

        let handle = read_one(&out, &pool).unwrap().unwrap();
        assert!(!handle.is_overflow());
        assert_eq!(handle.read().as_slice(), payload.as_slice());
    }

    #[test]
    fn test_round_trip_multi_chunk() {
        let pool = BufferPool::new(2, 4 * MAX_CHUNK);
        let mut out = Vec::new();
        let payload: Vec<u8> = (0..3 * MAX_CHUNK + 77).map(|i| (i % 251) as u8).collect();
        FrameWriter::new(3).write_message(&mut out, &payload).unwrap();

        let handle = read_one(&out, &pool).unwrap().unwrap();
        assert_eq!(handle.read().as_slice(), payload.as_slice());
    }

    #[test]
    fn test_fifo_across_messages() {
        let pool = BufferPool::new(4, 1024);
        let mut out = Vec::new();
        let mut writer = FrameWriter::new(1);
        for msg in [b"first".as_slice(), b"second", b"third"] {
            writer.write_message(&mut out, msg).unwrap();
        }

        let mut cursor = Cursor::new(out.as_slice());
        let mut reader = FrameReader::new();
        for expected in [b"first".as_slice(), b"second", b"third"] {
            let handle = reader.read_message(&mut cursor, &pool).unwrap().unwrap();
            assert_eq!(handle.read().as_slice(), expected);
        }
        assert!(matches!(
            reader.read_message(&mut cursor, &pool),
            Err(Error::Disconnected)
        ));
    }

    #[test]
    fn test_zero_length_message() {
        let pool = BufferPool::new(1, 64);
        let mut out = Vec::new();
        FrameWriter::new(1).write_message(&mut out, &[]).unwrap();
        let handle = read_one(&out, &pool).unwrap().unwrap();
        assert!(handle.read().is_empty());
    }

    #[test]
    fn test_overflow_message_is_skipped() {
        let pool = BufferPool::new(1, 64);
        let mut out = Vec::new();
        let mut writer = FrameWriter::new(1);
        writer.write_message(&mut out, b"kept").unwrap();
        writer.write_message(&mut out, b"dropped").unwrap();

        let mut cursor = Cursor::new(out.as_slice());
        let mut reader = FrameReader::new();
        let held = reader.read_message(&mut cursor, &pool).unwrap().unwrap();
        assert_eq!(held.read().as_slice(), b"kept");

        // Pool exhausted while `held` is alive: the second message lands in
        // the overflow buffer and is discarded, leaving only EOF behind.
        assert!(matches!(
            reader.read_message(&mut cursor, &pool),
            Err(Error::Disconnected)
        ));
        assert_eq!(pool.stats().overflow_acquires, 1);
    }

    #[test]
    fn test_garbage_stream_rejected() {
        let pool = BufferPool::new(1, 64);
        let garbage = [0x5au8; HEADER_LEN];
        assert!(matches!(
            read_one(&garbage, &pool),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_continuation_without_start_rejected() {
        let pool = BufferPool::new(1, 1024);
        let header = FrameHeader {
            packet_number: 1,
            sequence_number: 4,
            session_number: 1,
            timestamp: 0,
            chunk_len: 0,
            total_len: 0,
        };
        assert!(matches!(
            read_one(&header.encode(), &pool),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let pool = BufferPool::new(1, 64);
        let mut out = Vec::new();
        FrameWriter::new(1).write_message(&mut out, &[0u8; 65]).unwrap();
        assert!(matches!(read_one(&out, &pool), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_out_of_order_chunk_rejected() {
        let pool = BufferPool::new(1, 4 * MAX_CHUNK);
        let total = MAX_CHUNK + 10;
        let state = SendState::new(7, 1, total);
        let mut out = Vec::new();
        out.extend_from_slice(&state.header().encode());
        out.extend_from_slice(&vec![1u8; MAX_CHUNK]);
        // Second chunk skips a sequence number
        let bad = FrameHeader {
            packet_number: 1,
            sequence_number: 2,
            session_number: 7,
            timestamp: wire_timestamp(),
            chunk_len: 10,
            total_len: total as u32,
        };
        out.extend_from_slice(&bad.encode());
        out.extend_from_slice(&[1u8; 10]);

        assert!(matches!(read_one(&out, &pool), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_empty_continuation_chunk_rejected() {
        let pool = BufferPool::new(1, 4 * MAX_CHUNK);
        let total = MAX_CHUNK + 10;
        let state = SendState::new(7, 1, total);
        let mut out = Vec::new();
        out.extend_from_slice(&state.header().encode());
        out.extend_from_slice(&vec![1u8; MAX_CHUNK]);
        // Correctly sequenced continuation that carries no payload; reading
        // it must fail rather than wait for more chunks that never come.
        let empty = FrameHeader {
            packet_number: 1,
            sequence_number: 1,
            session_number: 7,
            timestamp: wire_timestamp(),
            chunk_len: 0,
            total_len: total as u32,
        };
        out.extend_from_slice(&empty.encode());

        assert!(matches!(read_one(&out, &pool), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_session_change_mid_message_restarts() {
        let pool = BufferPool::new(2, 4 * MAX_CHUNK);
        let mut out = Vec::new();

        // First chunk of a two-chunk message from session 1, then the
        // connection "dies": a fresh session 2 starts a new message.
        let state = SendState::new(1, 1, MAX_CHUNK + 10);
        out.extend_from_slice(&state.header().encode());
        out.extend_from_slice(&vec![0u8; MAX_CHUNK]);
        FrameWriter::new(2).write_message(&mut out, b"fresh").unwrap();

        let handle = read_one(&out, &pool).unwrap().unwrap();
        assert_eq!(handle.read().as_slice(), b"fresh");
    }

    #[test]
    fn test_session_change_at_boundary_accepted() {
        let pool = BufferPool::new(2, 1024);
        let mut out = Vec::new();
        FrameWriter::new(1).write_message(&mut out, b"one").unwrap();
        FrameWriter::new(2).write_message(&mut out, b"two").unwrap();

        let mut cursor = Cursor::new(out.as_slice());
        let mut reader = FrameReader::new();
        let first = reader.read_message(&mut cursor, &pool).unwrap().unwrap();
        assert_eq!(first.read().as_slice(), b"one");
        let second = reader.read_message(&mut cursor, &pool).unwrap().unwrap();
        assert_eq!(second.read().as_slice(), b"two");
    }

    /// Reader that times out `idle_for` times before yielding data
    struct IdleThenData {
        idle_for: usize,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for IdleThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.idle_for > 0 {
                self.idle_for -= 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_idle_timeout_is_not_an_error() {
        let pool = BufferPool::new(1, 64);
        let mut out = Vec::new();
        FrameWriter::new(1).write_message(&mut out, b"late").unwrap();
        let mut source = IdleThenData {
            idle_for: 1,
            inner: Cursor::new(out),
        };

        let mut reader = FrameReader::new();
        assert!(reader.read_message(&mut source, &pool).unwrap().is_none());
        let handle = reader.read_message(&mut source, &pool).unwrap().unwrap();
        assert_eq!(handle.read().as_slice(), b"late");
    }

    /// Reader that times out in the middle of the header
    struct MidHeaderTimeout {
        sent: bool,
    }

    impl Read for MidHeaderTimeout {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::from(ErrorKind::TimedOut));
            }
            self.sent = true;
            buf[0] = 0;
            Ok(1)
        }
    }

    #[test]
    fn test_mid_header_timeout_is_an_error() {
        let pool = BufferPool::new(1, 64);
        let mut reader = FrameReader::new();
        assert!(matches!(
            reader.read_message(&mut MidHeaderTimeout { sent: false }, &pool),
            Err(Error::Timeout)
        ));
    }
}
