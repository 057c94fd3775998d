pub mod block;
pub mod frame;

pub use block::Block;
pub use frame::{Frame, FrameShape};

/// Names of the two series every snapshot carries ahead of the tracked parameters
pub const TIME_SERIES: &str = "time";
pub const ABSOLUTE_TIME_SERIES: &str = "absolute_time";
