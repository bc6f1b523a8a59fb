//! Terminal user interface.

mod app;
mod call_flow;
mod call_list;

pub use app::{App, CaptureStatus};
pub use call_flow::{CallFlowView, KeyOutcome};
pub use call_list::CallListView;
