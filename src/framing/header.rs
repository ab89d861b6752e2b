//! Frame header encoding, decoding and validation

use crate::error::{Error, Result};

/// Encoded header size in bytes
pub const HEADER_LEN: usize = 24;

/// Maximum payload bytes per chunk
pub const MAX_CHUNK: usize = 65536;

/// The fixed 24-byte record preceding every chunk on the wire.
///
/// The transient bytes-written counter of the continuation state machines
/// lives in [`super::SendState`] and the receiver, not here; only the
/// fields below are transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    /// Increments once per logical message
    pub packet_number: u16,
    /// Increments once per chunk within a message
    pub sequence_number: u16,
    /// Stamped at the sender's session start; changes on redial
    pub session_number: u16,
    /// Low 16 bits of the sender's epoch milliseconds
    pub timestamp: u16,
    /// Payload bytes following this header
    pub chunk_len: u32,
    /// Total bytes of the logical message being chunked
    pub total_len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        // Front sentinel: bytes 0..4 stay zero
        buf[4..6].copy_from_slice(&self.packet_number.to_be_bytes());
        buf[6..8].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[8..10].copy_from_slice(&self.session_number.to_be_bytes());
        buf[10..12].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[12..16].copy_from_slice(&self.chunk_len.to_be_bytes());
        buf[16..20].copy_from_slice(&self.total_len.to_be_bytes());
        // Back sentinel: bytes 20..24 stay zero
        buf
    }

    /// Decode and validate a header.
    ///
    /// A non-zero sentinel or an inconsistent length means the byte stream
    /// has desynchronized; the caller must drop the connection.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let front = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let back = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
        if front != 0 || back != 0 {
            return Err(Error::InvalidFrame(format!(
                "sentinel mismatch (front {front:#x}, back {back:#x})"
            )));
        }
        let header = Self {
            packet_number: u16::from_be_bytes([buf[4], buf[5]]),
            sequence_number: u16::from_be_bytes([buf[6], buf[7]]),
            session_number: u16::from_be_bytes([buf[8], buf[9]]),
            timestamp: u16::from_be_bytes([buf[10], buf[11]]),
            chunk_len: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            total_len: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        };
        if header.chunk_len as usize > MAX_CHUNK {
            return Err(Error::InvalidFrame(format!(
                "chunk length {} exceeds maximum {}",
                header.chunk_len, MAX_CHUNK
            )));
        }
        if header.chunk_len > header.total_len {
            return Err(Error::InvalidFrame(format!(
                "chunk length {} exceeds message length {}",
                header.chunk_len, header.total_len
            )));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameHeader {
        FrameHeader {
            packet_number: 7,
            sequence_number: 3,
            session_number: 0x1234,
            timestamp: 5000,
            chunk_len: 65536,
            total_len: 200000,
        }
    }

    #[test]
    fn test_round_trip() {
        let header = sample();
        let decoded = FrameHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_sentinel_rejection() {
        let mut bytes = sample().encode();
        bytes[0] = 1;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(Error::InvalidFrame(_))
        ));

        let mut bytes = sample().encode();
        bytes[23] = 0xff;
        assert!(FrameHeader::decode(&bytes).is_err());
    }

    #[test]
    fn test_length_consistency() {
        let mut header = sample();
        header.chunk_len = MAX_CHUNK as u32 + 1;
        header.total_len = u32::MAX;
        assert!(FrameHeader::decode(&header.encode()).is_err());

        let mut header = sample();
        header.chunk_len = 10;
        header.total_len = 5;
        assert!(FrameHeader::decode(&header.encode()).is_err());
    }

    #[test]
    fn test_zero_header_is_valid() {
        // All-zero bytes decode as an empty message header
        let decoded = FrameHeader::decode(&[0u8; HEADER_LEN]).unwrap();
        assert_eq!(decoded.chunk_len, 0);
        assert_eq!(decoded.total_len, 0);
    }
}
