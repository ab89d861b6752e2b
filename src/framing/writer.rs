//! Sender side of the chunked framing protocol

use super::header::{FrameHeader, MAX_CHUNK};
use super::wire_timestamp;
use crate::error::{Error, Result};
use std::io::{ErrorKind, Write};

/// Continuation state for one logical message in flight.
///
/// Tracks how much of the message has been handed to the socket so the
/// chunk loop can resume after partial writes. `offset_packet` accounts
/// payload bytes as they leave; `is_finished` closes out the current chunk
/// and reports whether the whole message is done.
#[derive(Debug)]
pub struct SendState {
    packet_number: u16,
    sequence_number: u16,
    session_number: u16,
    total: usize,
    bytes_written: usize,
    chunk_len: usize,
}

impl SendState {
    /// Set up the header for a fresh message of `total` bytes
    pub fn new(session_number: u16, packet_number: u16, total: usize) -> Self {
        Self {
            packet_number,
            sequence_number: 0,
            session_number,
            total,
            bytes_written: 0,
            chunk_len: total.min(MAX_CHUNK),
        }
    }

    /// Header for the chunk currently being sent
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            packet_number: self.packet_number,
            sequence_number: self.sequence_number,
            session_number: self.session_number,
            timestamp: wire_timestamp(),
            chunk_len: self.chunk_len as u32,
            total_len: self.total as u32,
        }
    }

    /// Payload offset the next write should start from
    pub fn offset(&self) -> usize {
        self.bytes_written
    }

    /// Payload bytes still owed for the current chunk
    pub fn chunk_remaining(&self) -> usize {
        self.chunk_len
    }

    /// Account `n` payload bytes written to the socket
    pub fn offset_packet(&mut self, n: usize) {
        debug_assert!(n <= self.chunk_len);
        self.chunk_len -= n;
        self.bytes_written += n;
    }

    /// Close out the current chunk; true when the whole message is sent
    pub fn is_finished(&mut self) -> bool {
        self.bytes_written += self.chunk_len;
        self.chunk_len = 0;
        self.bytes_written >= self.total
    }

    /// Set up the header for the next chunk of the same message
    pub fn next_chunk(&mut self) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.chunk_len = (self.total - self.bytes_written).min(MAX_CHUNK);
    }
}

/// Frames logical messages onto a byte stream.
///
/// One writer per connection: the session number is fixed at connect time
/// and the packet number increments per message across the connection's
/// lifetime. Messages written through the same `FrameWriter` appear on the
/// wire whole and in order.
#[derive(Debug)]
pub struct FrameWriter {
    session_number: u16,
    packet_number: u16,
}

impl FrameWriter {
    pub fn new(session_number: u16) -> Self {
        Self {
            session_number,
            packet_number: 0,
        }
    }

    pub fn session_number(&self) -> u16 {
        self.session_number
    }

    /// Write one logical message as a header-prefixed chunk sequence.
    ///
    /// A zero-length payload still produces a single header so the receiver
    /// observes the message boundary.
    pub fn write_message<W: Write>(&mut self, w: &mut W, payload: &[u8]) -> Result<()> {
        self.packet_number = self.packet_number.wrapping_add(1);
        let mut state = SendState::new(self.session_number, self.packet_number, payload.len());

        loop {
            write_full(w, &state.header().encode())?;
            while state.chunk_remaining() > 0 {
                let off = state.offset();
                let end = off + state.chunk_remaining();
                let n = write_some(w, &payload[off..end])?;
                state.offset_packet(n);
            }
            if state.is_finished() {
                return Ok(());
            }
            state.next_chunk();
        }
    }
}

/// Write a single slice, looping only on interrupts.
///
/// Returns how many bytes the socket took; the caller's continuation state
/// accounts the partial progress.
fn write_some<W: Write>(w: &mut W, buf: &[u8]) -> Result<usize> {
    loop {
        match w.write(buf) {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                return Err(Error::Timeout)
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

/// Write a whole slice, looping on partial writes
pub(super) fn write_full<W: Write>(w: &mut W, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let n = write_some(w, buf)?;
        buf = &buf[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::header::HEADER_LEN;

    /// Decode the chunk stream in `bytes` back into (headers, payload)
    fn decode_stream(mut bytes: &[u8]) -> (Vec<FrameHeader>, Vec<u8>) {
        let mut headers = Vec::new();
        let mut payload = Vec::new();
        while !bytes.is_empty() {
            let mut hdr = [0u8; HEADER_LEN];
            hdr.copy_from_slice(&bytes[..HEADER_LEN]);
            let header = FrameHeader::decode(&hdr).unwrap();
            bytes = &bytes[HEADER_LEN..];
            let chunk = header.chunk_len as usize;
            payload.extend_from_slice(&bytes[..chunk]);
            bytes = &bytes[chunk..];
            headers.push(header);
        }
        (headers, payload)
    }

    #[test]
    fn test_single_chunk_message() {
        let mut writer = FrameWriter::new(42);
        let mut out = Vec::new();
        let payload: Vec<u8> = (0..100u8).collect();
        writer.write_message(&mut out, &payload).unwrap();

        let (headers, decoded) = decode_stream(&out);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].packet_number, 1);
        assert_eq!(headers[0].sequence_number, 0);
        assert_eq!(headers[0].session_number, 42);
        assert_eq!(headers[0].total_len, 100);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_multi_chunk_message() {
        let mut writer = FrameWriter::new(1);
        let mut out = Vec::new();
        let total = MAX_CHUNK * 2 + 1234;
        let payload: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        writer.write_message(&mut out, &payload).unwrap();

        let (headers, decoded) = decode_stream(&out);
        assert_eq!(headers.len(), 3);
        assert_eq!(
            headers.iter().map(|h| h.chunk_len as usize).sum::<usize>(),
            total
        );
        let sequences: Vec<u16> = headers.iter().map(|h| h.sequence_number).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(headers.iter().all(|h| h.packet_number == 1));
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_exact_chunk_boundary() {
        let mut writer = FrameWriter::new(1);
        let mut out = Vec::new();
        let payload = vec![0xabu8; MAX_CHUNK];
        writer.write_message(&mut out, &payload).unwrap();
        let (headers, decoded) = decode_stream(&out);
        assert_eq!(headers.len(), 1);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_zero_length_message() {
        let mut writer = FrameWriter::new(1);
        let mut out = Vec::new();
        writer.write_message(&mut out, &[]).unwrap();
        let (headers, decoded) = decode_stream(&out);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].chunk_len, 0);
        assert_eq!(headers[0].total_len, 0);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_packet_number_increments_per_message() {
        let mut writer = FrameWriter::new(1);
        let mut out = Vec::new();
        writer.write_message(&mut out, b"one").unwrap();
        writer.write_message(&mut out, b"two").unwrap();
        let (headers, _) = decode_stream(&out);
        assert_eq!(headers[0].packet_number, 1);
        assert_eq!(headers[1].packet_number, 2);
    }

    /// A writer that accepts at most `limit` bytes per call
    struct ShortWriter {
        out: Vec<u8>,
        limit: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_writes_preserve_stream() {
        let mut writer = FrameWriter::new(9);
        let mut short = ShortWriter {
            out: Vec::new(),
            limit: 7,
        };
        let payload: Vec<u8> = (0..MAX_CHUNK + 500).map(|i| (i % 13) as u8).collect();
        writer.write_message(&mut short, &payload).unwrap();
        let (headers, decoded) = decode_stream(&short.out);
        assert_eq!(headers.len(), 2);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_send_state_accounting() {
        let mut state = SendState::new(5, 1, MAX_CHUNK + 10);
        assert_eq!(state.chunk_remaining(), MAX_CHUNK);
        state.offset_packet(MAX_CHUNK - 1);
        assert_eq!(state.chunk_remaining(), 1);
        assert_eq!(state.offset(), MAX_CHUNK - 1);
        // Residual chunk length folds into the finished check
        assert!(!state.is_finished());
        state.next_chunk();
        assert_eq!(state.header().sequence_number, 1);
        assert_eq!(state.chunk_remaining(), 10);
        state.offset_packet(10);
        assert!(state.is_finished());
    }
}
