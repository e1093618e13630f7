//! Persistence seams the scheduler reads from and writes to.
//!
//! - `ProgressStore`: per-(word, mode) learning records
//! - `KeyValueStore`: mode-keyed JSON blobs (batch state, slot overrides)

pub mod keys;
pub mod kv;
pub mod progress;

pub use kv::{JsonFileStore, KeyValueStore, MemoryKeyValueStore};
pub use progress::{InMemoryProgressStore, ProgressStore};
