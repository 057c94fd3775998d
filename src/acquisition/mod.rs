pub mod events;
pub mod session;
pub mod working_set;

pub use events::{FrameAppended, MaximumUpdated};
pub use session::Acquisition;
pub use working_set::{frame_maximum, WorkingSet};
