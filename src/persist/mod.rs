pub mod handle;
pub mod state;
pub mod worker;

pub use handle::PersistHandle;
pub use state::PersistState;
pub use worker::{remove_stale, PersistCommand, SyncReport, WorkerSettings};
