pub mod poller;
pub mod tracker;

pub use poller::{ParameterPoller, ParameterSource};
pub use tracker::{unix_seconds, HistoryDump, HistoryUpdate, ParameterHistory};
