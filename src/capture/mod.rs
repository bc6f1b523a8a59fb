//! Capture source abstraction.
//!
//! This module defines the `CaptureSource` trait and the single entry point
//! that opens either a recorded capture file or a live interface behind it.
//! The pipeline only ever sees the trait, which keeps it testable with
//! in-memory captures.

mod pcap_file;
mod pnet_capture;

pub use pcap_file::PcapFileSource;
pub use pnet_capture::PnetCapture;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use pcap_parser::Linktype;

use crate::domain::CaptureFrame;
use crate::error::CaptureError;

/// Default poll interval for live reads
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Default read buffer for capture files
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;
/// Smallest read buffer: a 16-byte record header plus tcpdump's default
/// 262144-byte snaplen
pub const MIN_BUFFER_SIZE: usize = 16 + 262_144;

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    /// A pcap or pcapng file
    File(PathBuf),
    /// A live network interface
    Interface(String),
}

impl fmt::Display for CaptureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureInput::File(path) => write!(f, "{}", path.display()),
            CaptureInput::Interface(name) => write!(f, "interface {}", name),
        }
    }
}

/// Tunables applied when opening a source.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// How long a live read waits before re-checking the running flag
    pub read_timeout: Duration,
    /// Read buffer size for capture files; must hold the largest block
    pub buffer_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// A stream of captured frames.
pub trait CaptureSource {
    /// Human readable identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Datalink type of the capture, fixed for its lifetime.
    fn linktype(&self) -> Linktype;

    /// Next frame, or `None` once the source is exhausted or stopped.
    fn next_frame(&mut self) -> Result<Option<CaptureFrame>, CaptureError>;

    /// Set the running flag for graceful shutdown.
    ///
    /// Sources that block waiting for traffic return `None` from
    /// `next_frame` once the flag is cleared.
    fn set_running(&mut self, _running: Arc<AtomicBool>) {}
}

/// Open a capture source. Closing happens when the returned box is dropped.
pub fn open(
    input: &CaptureInput,
    settings: &CaptureSettings,
) -> Result<Box<dyn CaptureSource>, CaptureError> {
    match input {
        CaptureInput::File(path) => {
            Ok(Box::new(PcapFileSource::open(path, settings.buffer_size)?))
        }
        CaptureInput::Interface(name) => {
            Ok(Box::new(PnetCapture::open(name, settings.read_timeout)?))
        }
    }
}
