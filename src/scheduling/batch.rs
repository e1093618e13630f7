//! Batch gating - which part of the full word pool is currently drillable.
//!
//! `Uninitialized -> Active(n) -> AllCleared`. A mode starts with the first
//! `batch_size` words active. Once enough of the active set is cleared
//! (Position below the mastered threshold), cleared words drop out and the
//! next chunk of the pool is unlocked. State is persisted per mode through a
//! `KeyValueStore`; read-modify-write is serialised per mode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scheduling::config::BatchDefaults;
use crate::scheduling::types::{LearningMode, NEUTRAL_POSITION};
use crate::store::keys::batch_state_key;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Active,
    AllCleared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    pub mode: LearningMode,
    pub batch_size: usize,
    /// 0 disables gating: every call may unlock the next chunk.
    pub clear_threshold: f64,
    pub batch_index: u32,
    pub active: Vec<String>,
    pub pool: Vec<String>,
    /// Number of pool words unlocked so far.
    pub unlocked: usize,
    pub phase: BatchPhase,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_index: u32,
    pub active: usize,
    pub cleared: usize,
    pub clear_rate: f64,
    pub remaining: usize,
    pub can_advance: bool,
    pub phase: BatchPhase,
}

impl BatchState {
    pub fn new(
        mode: LearningMode,
        pool: Vec<String>,
        batch_size: usize,
        clear_threshold: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let pool = dedup_words(pool);
        let unlocked = batch_size.min(pool.len());
        let mut state = Self {
            mode,
            batch_size,
            clear_threshold: clear_threshold.clamp(0.0, 1.0),
            batch_index: 1,
            active: pool[..unlocked].to_vec(),
            pool,
            unlocked,
            phase: BatchPhase::Active,
            updated_at: now,
        };
        state.refresh_phase(&HashMap::new(), 0.0);
        state
    }

    pub fn remaining(&self) -> usize {
        self.pool.len().saturating_sub(self.unlocked)
    }

    fn is_cleared(positions: &HashMap<String, f64>, word: &str, cleared_below: f64) -> bool {
        positions.get(word).copied().unwrap_or(NEUTRAL_POSITION) < cleared_below
    }

    pub fn status(&self, positions: &HashMap<String, f64>, cleared_below: f64) -> BatchStatus {
        let cleared = self
            .active
            .iter()
            .filter(|word| Self::is_cleared(positions, word, cleared_below))
            .count();
        let clear_rate = if self.active.is_empty() {
            1.0
        } else {
            cleared as f64 / self.active.len() as f64
        };
        let remaining = self.remaining();
        let threshold_met = self.clear_threshold <= 0.0 || clear_rate + 1e-9 >= self.clear_threshold;
        BatchStatus {
            batch_index: self.batch_index,
            active: self.active.len(),
            cleared,
            clear_rate,
            remaining,
            can_advance: self.phase == BatchPhase::Active && remaining > 0 && threshold_met,
            phase: self.phase,
        }
    }

    /// Unlocks the next chunk when the clear rate allows it. Returns true when
    /// the state changed.
    pub fn advance(&mut self, positions: &HashMap<String, f64>, cleared_below: f64, now: DateTime<Utc>) -> bool {
        let status = self.status(positions, cleared_below);
        if !status.can_advance {
            let before = self.phase;
            self.refresh_phase(positions, cleared_below);
            if self.phase != before {
                self.updated_at = now;
                return true;
            }
            return false;
        }

        self.active
            .retain(|word| !Self::is_cleared(positions, word, cleared_below));
        let chunk: Vec<String> = self
            .pool
            .iter()
            .skip(self.unlocked)
            .take(self.batch_size.max(1))
            .cloned()
            .collect();
        self.unlocked += chunk.len();
        self.active.extend(chunk);
        self.batch_index += 1;
        self.updated_at = now;
        self.refresh_phase(positions, cleared_below);
        true
    }

    fn refresh_phase(&mut self, positions: &HashMap<String, f64>, cleared_below: f64) {
        if self.remaining() > 0 {
            self.phase = BatchPhase::Active;
            return;
        }
        let all_cleared = self
            .active
            .iter()
            .all(|word| Self::is_cleared(positions, word, cleared_below));
        if self.clear_threshold <= 0.0 || all_cleared {
            self.phase = BatchPhase::AllCleared;
        }
    }

    /// Adds pool words that appeared since the state was created and drops
    /// words that left the pool. Returns true when anything changed.
    pub fn sync_pool(&mut self, words: &[String]) -> bool {
        let current: HashSet<&str> = words.iter().map(String::as_str).collect();
        let before = (self.pool.len(), self.active.len());

        let unlocked: HashSet<String> = self.pool.iter().take(self.unlocked).cloned().collect();
        self.pool.retain(|word| current.contains(word.as_str()));
        self.active.retain(|word| current.contains(word.as_str()));
        self.unlocked = self.pool.iter().filter(|word| unlocked.contains(*word)).count();
        // unlocked words stay at the front
        self.pool.sort_by_key(|word| !unlocked.contains(word));

        let mut known: HashSet<String> = self.pool.iter().cloned().collect();
        let mut added = false;
        for word in words {
            if known.insert(word.clone()) {
                self.pool.push(word.clone());
                added = true;
            }
        }
        if added && self.phase == BatchPhase::AllCleared {
            self.phase = BatchPhase::Active;
        }
        added || before != (self.pool.len(), self.active.len())
    }

    /// Repairs a state read back from storage: at least one word per batch,
    /// a threshold in [0, 1], no repeated words, no active word outside the
    /// pool and an unlock count within the pool.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.clear_threshold = if self.clear_threshold.is_finite() {
            self.clear_threshold.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.pool = dedup_words(std::mem::take(&mut self.pool));
        self.unlocked = self.unlocked.min(self.pool.len());

        let pool: HashSet<&str> = self.pool.iter().map(String::as_str).collect();
        self.active = dedup_words(std::mem::take(&mut self.active))
            .into_iter()
            .filter(|word| pool.contains(word.as_str()))
            .collect();
        if self.remaining() > 0 {
            self.phase = BatchPhase::Active;
        }
        self
    }

    /// Words the scheduler may draw from.
    pub fn eligible(&self) -> HashSet<&str> {
        match self.phase {
            BatchPhase::Active => self.active.iter().map(String::as_str).collect(),
            BatchPhase::AllCleared => self.pool.iter().map(String::as_str).collect(),
        }
    }
}

fn dedup_words(words: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(words.len());
    words.into_iter().filter(|w| seen.insert(w.clone())).collect()
}

/// Outcome of one gating pass.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub eligible: HashSet<String>,
    pub status: BatchStatus,
    pub advanced: bool,
}

pub struct BatchGate {
    defaults: BatchDefaults,
    locks: parking_lot::Mutex<HashMap<LearningMode, Arc<tokio::sync::Mutex<()>>>>,
}

impl BatchGate {
    pub fn new(defaults: BatchDefaults) -> Self {
        Self {
            defaults,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> &BatchDefaults {
        &self.defaults
    }

    fn lock_for(&self, mode: LearningMode) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(mode).or_default().clone()
    }

    pub async fn load<K: KeyValueStore>(&self, kv: &K, mode: LearningMode) -> Result<Option<BatchState>, StoreError> {
        let Some(payload) = kv.load(&batch_state_key(mode)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<BatchState>(&payload) {
            Ok(state) => {
                let repaired = state.clone().normalized();
                if repaired != state {
                    tracing::warn!(
                        %mode,
                        batch_size = state.batch_size,
                        unlocked = state.unlocked,
                        pool = state.pool.len(),
                        "repaired inconsistent batch state"
                    );
                }
                Ok(Some(repaired))
            }
            Err(err) => {
                tracing::warn!(error = %err, %mode, "discarding unreadable batch state");
                Ok(None)
            }
        }
    }

    async fn save<K: KeyValueStore>(&self, kv: &K, state: &BatchState) -> Result<(), StoreError> {
        let payload = serde_json::to_string(state)?;
        kv.save(&batch_state_key(state.mode), payload).await
    }

    /// Returns the persisted state for `mode`, creating batch 1 from
    /// `all_words` when none exists.
    pub async fn initialize<K: KeyValueStore>(
        &self,
        kv: &K,
        mode: LearningMode,
        all_words: &[String],
        batch_size: usize,
        clear_threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<BatchState, StoreError> {
        let lock = self.lock_for(mode);
        let _guard = lock.lock().await;
        self.load_or_create(kv, mode, all_words, batch_size, clear_threshold, now)
            .await
    }

    async fn load_or_create<K: KeyValueStore>(
        &self,
        kv: &K,
        mode: LearningMode,
        all_words: &[String],
        batch_size: usize,
        clear_threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<BatchState, StoreError> {
        if let Some(state) = self.load(kv, mode).await? {
            return Ok(state);
        }
        let state = BatchState::new(mode, all_words.to_vec(), batch_size, clear_threshold, now);
        self.save(kv, &state).await?;
        tracing::info!(%mode, active = state.active.len(), pool = state.pool.len(), "batch state created");
        Ok(state)
    }

    pub async fn status<K: KeyValueStore>(
        &self,
        kv: &K,
        mode: LearningMode,
        positions: &HashMap<String, f64>,
    ) -> Result<Option<BatchStatus>, StoreError> {
        Ok(self
            .load(kv, mode)
            .await?
            .map(|state| state.status(positions, self.defaults.cleared_below)))
    }

    pub async fn advance<K: KeyValueStore>(
        &self,
        kv: &K,
        mode: LearningMode,
        positions: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<Option<BatchStatus>, StoreError> {
        let lock = self.lock_for(mode);
        let _guard = lock.lock().await;
        let Some(mut state) = self.load(kv, mode).await? else {
            return Ok(None);
        };
        if state.advance(positions, self.defaults.cleared_below, now) {
            self.save(kv, &state).await?;
            tracing::info!(%mode, batch = state.batch_index, active = state.active.len(), "batch advanced");
        }
        Ok(Some(state.status(positions, self.defaults.cleared_below)))
    }

    /// One locked pass for a scheduling call: load or create, sync the pool,
    /// advance if allowed, persist, and report the eligible words.
    pub async fn gate<K: KeyValueStore>(
        &self,
        kv: &K,
        mode: LearningMode,
        all_words: &[String],
        positions: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<GateResult, StoreError> {
        let lock = self.lock_for(mode);
        let _guard = lock.lock().await;

        let mut state = self
            .load_or_create(
                kv,
                mode,
                all_words,
                self.defaults.batch_size,
                self.defaults.clear_threshold,
                now,
            )
            .await?;
        let synced = state.sync_pool(all_words);
        let before = state.batch_index;
        let changed = state.advance(positions, self.defaults.cleared_below, now);
        if synced || changed {
            self.save(kv, &state).await?;
        }
        let advanced = state.batch_index != before;
        if advanced {
            tracing::info!(%mode, batch = state.batch_index, active = state.active.len(), "batch advanced");
        }

        Ok(GateResult {
            eligible: state.eligible().into_iter().map(str::to_string).collect(),
            status: state.status(positions, self.defaults.cleared_below),
            advanced,
        })
    }

    pub async fn reset<K: KeyValueStore>(&self, kv: &K, mode: LearningMode) -> Result<(), StoreError> {
        let lock = self.lock_for(mode);
        let _guard = lock.lock().await;
        kv.delete(&batch_state_key(mode)).await?;
        tracing::info!(%mode, "batch state reset");
        Ok(())
    }
}

impl Default for BatchGate {
    fn default() -> Self {
        Self::new(BatchDefaults::default())
    }
}

impl std::fmt::Debug for BatchGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGate")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
