//! Error types for sipscope.

use thiserror::Error;

/// Fatal errors raised while opening or reading a capture source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("couldn't open capture source {source_name}: {reason}")]
    OpenFailed { source_name: String, reason: String },

    #[error("unsupported datalink type {linktype} in {source_name}")]
    UnsupportedLinktype { source_name: String, linktype: i32 },

    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("insufficient permissions to capture (try running as root)")]
    InsufficientPermissions,

    #[error("failed to create capture channel: {0}")]
    ChannelCreation(String),

    #[error("error reading {source_name}: {reason}")]
    Read { source_name: String, reason: String },
}

/// Why the frame demultiplexer did not produce a network-layer frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("unsupported datalink type {0}")]
    Unsupported(i32),

    #[error("frame does not carry IPv4")]
    NotRelevant,

    #[error("frame shorter than its link header")]
    Truncated,
}

/// Why the IP/UDP extractor did not produce a payload.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    #[error("not a UDP datagram of interest")]
    NotRelevant,

    #[error("frame shorter than the headers it declares")]
    Truncated,
}

/// Errors from the call flow view.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewError {
    #[error("no call attached to the view")]
    Detached,
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
