//! Session records and the reconnect-and-retry step wrapper.

mod manager;
mod reconnect;

pub use manager::{Session, SessionManager, SessionStep, SessionSummary, StepStatus};
pub use reconnect::{with_reconnect, with_reconnect_policy, ReconnectPolicy, ReconnectStats};
