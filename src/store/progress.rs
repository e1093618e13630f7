use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::scheduling::types::{LearningMode, ProgressRecord};

/// Source of per-(word, mode) learning records.
pub trait ProgressStore: Send + Sync {
    fn get_progress(
        &self,
        word: &str,
        mode: LearningMode,
    ) -> impl Future<Output = Result<Option<ProgressRecord>, StoreError>> + Send;

    fn get_all_progress(
        &self,
        mode: LearningMode,
    ) -> impl Future<Output = Result<HashMap<String, ProgressRecord>, StoreError>> + Send;

    fn record_answer(
        &self,
        word: &str,
        correct: bool,
        response_time_ms: u64,
        mode: LearningMode,
        answered_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Persists a freshly computed Position as the record's cached score.
    fn update_position(
        &self,
        word: &str,
        mode: LearningMode,
        position: f64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    records: RwLock<HashMap<(LearningMode, String), ProgressRecord>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ProgressRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: ProgressRecord) {
        self.records
            .write()
            .insert((record.mode, record.word.clone()), record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl ProgressStore for InMemoryProgressStore {
    async fn get_progress(&self, word: &str, mode: LearningMode) -> Result<Option<ProgressRecord>, StoreError> {
        Ok(self.records.read().get(&(mode, word.to_string())).cloned())
    }

    async fn get_all_progress(&self, mode: LearningMode) -> Result<HashMap<String, ProgressRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|((m, _), _)| *m == mode)
            .map(|((_, word), record)| (word.clone(), record.clone()))
            .collect())
    }

    async fn record_answer(
        &self,
        word: &str,
        correct: bool,
        response_time_ms: u64,
        mode: LearningMode,
        answered_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .entry((mode, word.to_string()))
            .or_insert_with(|| ProgressRecord::new(word, mode));
        record.apply_answer(correct, answered_at);
        record.last_response_ms = Some(response_time_ms);
        Ok(())
    }

    async fn update_position(&self, word: &str, mode: LearningMode, position: f64) -> Result<(), StoreError> {
        if let Some(record) = self.records.write().get_mut(&(mode, word.to_string())) {
            record.saved_position = Some(position);
        }
        Ok(())
    }
}
