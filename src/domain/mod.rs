//! Domain models for capture frames, endpoints and calls.
//!
//! These types are independent of the capture backend and of the
//! terminal UI; both sides only meet here.

mod call;
mod frame;

pub use call::{Call, Message};
pub use frame::{CaptureFrame, Endpoint, Timestamp};
