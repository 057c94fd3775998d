use serde::{Deserialize, Serialize};

/// Lifecycle of the run's on-disk store, owned by the persist worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PersistState {
    /// No store for this run yet; the next flush creates one
    #[default]
    Uninitialized,
    /// Store file exists but holds no block yet
    Created,
    /// At least one block written; flushes grow the store
    Appending,
}

impl PersistState {
    pub fn can_transition_to(&self, target: &PersistState) -> bool {
        use PersistState::*;

        matches!(
            (self, target),
            (Uninitialized, Created) |
            (Created, Appending) |
            // failed first write: recreate from scratch
            (Created, Created) |
            // reset, or store lost underneath the worker
            (_, Uninitialized)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Created => "Created",
            Self::Appending => "Appending",
        }
    }

    /// Whether the next block needs a fresh store
    pub fn needs_store(&self) -> bool {
        !matches!(self, Self::Appending)
    }
}
