//! Capture frame and endpoint types.

use std::fmt;
use std::net::SocketAddrV4;

use pcap_parser::Linktype;

/// An IPv4 address and UDP port.
pub type Endpoint = SocketAddrV4;

/// Capture timestamp with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub secs: i64,
    /// Microseconds within the second (0..1_000_000)
    pub micros: u32,
}

impl Timestamp {
    /// Create a timestamp, carrying whole seconds out of `micros`.
    pub fn new(secs: i64, micros: u32) -> Self {
        Self {
            secs: secs + i64::from(micros / 1_000_000),
            micros: micros % 1_000_000,
        }
    }

    /// Build a timestamp from a raw tick count at the given resolution
    /// (ticks per second).
    pub fn from_ticks(ticks: u64, resolution: u64) -> Self {
        if resolution == 0 {
            return Self::default();
        }
        let secs = ticks / resolution;
        let frac = ticks % resolution;
        let micros = (u128::from(frac) * 1_000_000 / u128::from(resolution)) as u32;
        Self::new(secs as i64, micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// One frame as delivered by a capture source.
///
/// Frames are owned by the pipeline for a single loop iteration and
/// dropped afterwards.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Captured bytes, including link-layer encapsulation
    pub data: Vec<u8>,
    /// When the frame was captured
    pub timestamp: Timestamp,
    /// Link-layer framing of `data`
    pub linktype: Linktype,
}
