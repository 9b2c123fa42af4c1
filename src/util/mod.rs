//! Small helpers shared across modules.

pub mod fs;
pub mod timeout;

pub use timeout::{with_timeout, TimedOut};
