//! sipscope - SIP call flow viewer
//!
//! Reads UDP signaling from a capture file or a live interface, groups the
//! messages into calls and draws each call as a ladder diagram in the
//! terminal.

pub mod capture;
pub mod config;
pub mod domain;
pub mod error;
pub mod header;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod ui;

#[cfg(test)]
mod testutil;

pub use capture::{CaptureInput, CaptureSettings, CaptureSource};
pub use config::Config;
pub use error::{CaptureError, ConfigError, ExtractError, LinkError, ViewError};
pub use pipeline::{CapturePipeline, RunSummary};
pub use store::{CallStore, MessageConsumer};
