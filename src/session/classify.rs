//! Accept-side role classification
//!
//! The relay decides whether an inbound socket is a camera uplink (Reader)
//! or a headset downlink (Writer) using a strategy fixed at startup, never
//! per connection.

use crate::config::RoutingConfig;
use crate::error::{Error, Result};
use std::net::SocketAddr;

/// Role assigned to an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptClass {
    Reader,
    Writer,
}

/// Classification strategy, one selected at process start
#[derive(Debug, Clone)]
pub enum ClassifyPolicy {
    /// The first connection is a Reader while none exists; everything else
    /// is a Writer until a Reader exists again.
    FirstIsReader,
    /// Peers dialing from a source port inside the window are Readers.
    /// Only meaningful together with the fixed-local-port dial mode.
    SourcePortRange { lo: u16, hi: u16 },
    /// Peers whose address suffix falls inside the window are Readers
    SourceSuffixRange { lo: u8, hi: u8 },
}

impl ClassifyPolicy {
    /// Build the policy from validated configuration
    pub fn from_config(routing: &RoutingConfig) -> Result<Self> {
        match routing.classify.as_str() {
            "first-reader" => Ok(Self::FirstIsReader),
            "port-range" => {
                let [lo, hi] = routing
                    .reader_port_range
                    .ok_or_else(|| Error::Config("reader_port_range missing".into()))?;
                Ok(Self::SourcePortRange { lo, hi })
            }
            "ip-range" => {
                let [lo, hi] = routing
                    .reader_suffix_range
                    .ok_or_else(|| Error::Config("reader_suffix_range missing".into()))?;
                Ok(Self::SourceSuffixRange { lo, hi })
            }
            other => Err(Error::Config(format!("unknown classify policy: {other}"))),
        }
    }

    /// Classify an accepted peer. `have_reader` reports whether any reader
    /// session is currently registered.
    pub fn classify(&self, peer: SocketAddr, have_reader: bool) -> AcceptClass {
        match self {
            Self::FirstIsReader => {
                if have_reader {
                    AcceptClass::Writer
                } else {
                    AcceptClass::Reader
                }
            }
            Self::SourcePortRange { lo, hi } => {
                if (*lo..=*hi).contains(&peer.port()) {
                    AcceptClass::Reader
                } else {
                    AcceptClass::Writer
                }
            }
            Self::SourceSuffixRange { lo, hi } => {
                let suffix = super::SessionId::from_addr(peer).suffix();
                if (*lo..=*hi).contains(&suffix) {
                    AcceptClass::Reader
                } else {
                    AcceptClass::Writer
                }
            }
        }
    }
}
