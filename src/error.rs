use crate::scheduling::types::Category;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssociationError {
    #[error("no association data for {0}")]
    UnknownWord(String),
    #[error("association lookup failed: {0}")]
    Lookup(String),
}

/// A defect in the scheduler's own output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("word {word} at position {position} slotted as {slotted} but its band is {banded}")]
    Banding {
        word: String,
        position: f64,
        slotted: Category,
        banded: Category,
    },
    #[error("word {word} appears more than once (index {index})")]
    Duplicate { word: String, index: usize },
    #[error("word {word} repeats right after index {index}")]
    AdjacentRepeat { word: String, index: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}
