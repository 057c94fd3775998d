pub mod acquisition;
pub mod config;
pub mod core;
pub mod correction;
pub mod error;
pub mod finalize;
pub mod history;
pub mod logging;
pub mod observability;
pub mod persist;
pub mod store;

pub use acquisition::Acquisition;
pub use config::AcquisitionConfig;
pub use error::AcquisitionError;
