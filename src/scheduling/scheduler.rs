//! Orchestrator: one `schedule` call runs the whole pipeline against a
//! snapshot of the progress store.
//!
//! context -> batch gate -> score + classify -> anti-vibration -> slot
//! allocation -> chain-learning reorder -> interleave -> reinsertion ->
//! output checks

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::{SchedulerError, StoreError};
use crate::scheduling::allocator::{LocalityContext, PoolStats, SlotAllocator};
use crate::scheduling::association::{AssociationProvider, NoAssociations};
use crate::scheduling::batch::{BatchGate, BatchStatus};
use crate::scheduling::classifier::CategoryClassifier;
use crate::scheduling::config::SchedulerConfig;
use crate::scheduling::diagnostics::Diagnostics;
use crate::scheduling::interleave::{diversify_heads, CategoryInterleaver};
use crate::scheduling::invariants::InvariantGuard;
use crate::scheduling::locality::LocalityReorderer;
use crate::scheduling::position::{PositionStrategy, PriorityScorer, ScoreEngine};
use crate::scheduling::anti_vibration::RecencyPenalizer;
use crate::scheduling::recent::RecentAnswerCache;
use crate::scheduling::reinsertion::ReinsertionQueue;
use crate::scheduling::signals::{RatioAdjustment, ScheduleContext, Signals};
use crate::scheduling::slot_config::{SlotConfig, SlotConfigTable};
use crate::scheduling::types::{
    Item, LearningMode, PrioritizedItem, ProgressRecord, RecentAnswer, ScheduleOptions, SessionStats,
    NEUTRAL_POSITION,
};
use crate::store::{KeyValueStore, ProgressStore};

/// Session-scoped scheduler. Owns every in-memory cache; durable state
/// lives behind the two stores.
pub struct Scheduler<S, K> {
    store: Arc<S>,
    kv: Arc<K>,
    config: SchedulerConfig,
    score: ScoreEngine,
    classifier: CategoryClassifier,
    penalizer: RecencyPenalizer,
    allocator: SlotAllocator,
    reorderer: LocalityReorderer,
    interleaver: CategoryInterleaver,
    recent: RecentAnswerCache,
    slot_configs: SlotConfigTable,
    loaded_slot_modes: HashSet<LearningMode>,
    batches: BatchGate,
    associations: Arc<dyn AssociationProvider>,
    priority: Option<Arc<dyn PriorityScorer>>,
    reinsertion: ReinsertionQueue,
    guard: InvariantGuard,
    last: Option<Diagnostics>,
}

impl<S, K> Scheduler<S, K>
where
    S: ProgressStore,
    K: KeyValueStore,
{
    pub fn new(store: Arc<S>, kv: Arc<K>, config: SchedulerConfig) -> Self {
        Self {
            store,
            kv,
            score: ScoreEngine::new(config.score.clone()),
            classifier: CategoryClassifier::new(config.classifier.clone()),
            penalizer: RecencyPenalizer::new(config.anti_vibration.clone()),
            allocator: SlotAllocator::new(config.dynamic_limit.clone(), config.locality.clone()),
            reorderer: LocalityReorderer::new(config.locality.clone()),
            interleaver: CategoryInterleaver::new(config.interleave.clone()),
            recent: RecentAnswerCache::new(config.recent_cache.clone()),
            slot_configs: SlotConfigTable::default(),
            loaded_slot_modes: HashSet::new(),
            batches: BatchGate::new(config.batch.clone()),
            associations: Arc::new(NoAssociations),
            priority: None,
            reinsertion: ReinsertionQueue::new(config.reinsertion.clone(), config.rng_seed),
            guard: InvariantGuard::new(config.invariant_policy),
            last: None,
            config,
        }
    }

    pub fn with_associations(mut self, provider: Arc<dyn AssociationProvider>) -> Self {
        self.associations = provider;
        self
    }

    pub fn set_associations(&mut self, provider: Arc<dyn AssociationProvider>) {
        self.associations = provider;
    }

    /// Installs (or with `None` removes) the in-category re-ranking hook.
    pub fn set_priority_scorer(&mut self, scorer: Option<Arc<dyn PriorityScorer>>) {
        self.priority = scorer;
    }

    pub fn set_strategy(&mut self, mode: LearningMode, strategy: Arc<dyn PositionStrategy>) {
        self.score.set_strategy(mode, strategy);
        self.classifier.reset();
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Diagnostics of the most recent `schedule` call.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.last.as_ref()
    }

    pub fn pending_reinsertions(&self) -> usize {
        self.reinsertion.len()
    }

    pub async fn slot_config(&mut self, mode: LearningMode) -> Result<SlotConfig, StoreError> {
        if self.loaded_slot_modes.insert(mode) {
            return self.slot_configs.load(self.kv.as_ref(), mode).await;
        }
        Ok(self.slot_configs.get(mode))
    }

    /// Persists a slot-config override for `mode`, normalised.
    pub async fn save_slot_config(&mut self, mode: LearningMode, config: SlotConfig) -> Result<(), StoreError> {
        self.slot_configs.save(self.kv.as_ref(), mode, config).await?;
        self.loaded_slot_modes.insert(mode);
        Ok(())
    }

    pub async fn batch_status(&self, mode: LearningMode, now: DateTime<Utc>) -> Result<Option<BatchStatus>, StoreError> {
        let progress = self.store.get_all_progress(mode).await?;
        let positions = self.positions_of(&progress, mode, now);
        self.batches.status(self.kv.as_ref(), mode, &positions).await
    }

    /// Builds the next ordered batch for `mode`.
    pub async fn schedule(
        &mut self,
        pool: &[Item],
        mode: LearningMode,
        stats: &SessionStats,
        options: &ScheduleOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<Item>, SchedulerError> {
        let started = Instant::now();
        let mut diag = Diagnostics::empty(mode, now);
        diag.pool_size = pool.len();

        if pool.is_empty() || options.total_slots == 0 {
            diag.reinsertion_pending = self.reinsertion.len();
            diag.classifier = self.classifier.stats();
            self.last = Some(diag);
            return Ok(Vec::new());
        }

        let progress = self.store.get_all_progress(mode).await?;
        let base_config = self.slot_config(mode).await?;

        if !self.recent.is_fresh(mode, started) {
            self.recent.rebuild(mode, progress.values(), started);
        }
        let recent = self.recent.answers(mode);

        let ctx = ScheduleContext::build(stats.clone(), recent, now, &self.config.signals);
        let (signals, adjustment) = if options.signals {
            let signals = Signals::detect(&ctx, &self.config.signals);
            (signals, signals.adjustment())
        } else {
            (Signals::default(), RatioAdjustment::None)
        };
        let slot_config = adjustment.apply(&base_config, &self.config.signals);
        diag.time_of_day = ctx.time_of_day;
        diag.cognitive_load = ctx.cognitive_load;
        diag.signals = signals;
        diag.adjustment = adjustment;

        let candidates = unique_items(pool);
        let pool_positions = self.positions_of(&progress, mode, now);
        let pool_stats = PoolStats::from_positions(pool_positions.values().copied());

        let candidates: Vec<&Item> = if options.batch_gating {
            let words: Vec<String> = candidates.iter().map(|item| item.word.clone()).collect();
            let mut positions = pool_positions.clone();
            for word in &words {
                positions.entry(word.clone()).or_insert(NEUTRAL_POSITION);
            }
            let gate = self
                .batches
                .gate(self.kv.as_ref(), mode, &words, &positions, now)
                .await?;
            diag.batch = Some(gate.status);
            candidates
                .into_iter()
                .filter(|item| gate.eligible.contains(&item.word))
                .collect()
        } else {
            candidates
        };
        diag.eligible = candidates.len();

        let mut scored: Vec<PrioritizedItem> = candidates
            .iter()
            .map(|item| self.prioritize(item, progress.get(&item.word), mode, now, started))
            .collect();
        diag.penalized = self.penalizer.apply(&mut scored, &ctx.recent, now);
        if let Some(scorer) = &self.priority {
            for item in scored.iter_mut() {
                item.final_priority = scorer
                    .final_priority(item, progress.get(item.word()), now)
                    .filter(|key| key.is_finite());
            }
        }
        let by_word: HashMap<String, PrioritizedItem> = scored
            .iter()
            .map(|item| (item.word().to_string(), item.clone()))
            .collect();

        let context_words: Vec<String> = ctx
            .recent
            .iter()
            .take(self.config.locality.context_words)
            .map(|answer| answer.word.clone())
            .collect();
        let locality = options.locality.then_some(LocalityContext {
            provider: self.associations.as_ref(),
            recent_words: &context_words,
        });
        let mut allocation = self.allocator.allocate(
            scored,
            &slot_config,
            options.total_slots,
            Some(pool_stats),
            locality,
        );
        diag.record_allocation(&allocation);
        diag.invariant_violations += self.guard.enforce_banding(&mut allocation.lists);

        let mut lists = allocation.lists;
        if options.locality {
            diag.reorder = self.reorderer.reorder_lists(&mut lists, self.associations.as_ref());
        }
        diag.head_moves = diversify_heads(&mut lists.new);

        let mut sequence = self.interleaver.interleave(&lists);
        if options.reinsertion {
            let outcome = self.reinsertion.apply(
                mode,
                &mut sequence,
                &by_word,
                &ctx.recent,
                now,
                options.total_slots,
            );
            diag.reinsertion_pulled = outcome.pulled;
        }

        let (sequence, violations) = self.guard.enforce_output(sequence);
        diag.invariant_violations += violations;
        diag.vibration_score =
            self.penalizer
                .vibration_score(&sequence, &ctx.recent, self.config.vibration_top_n, now);
        diag.output_len = sequence.len();
        diag.reinsertion_pending = self.reinsertion.len();
        diag.classifier = self.classifier.stats();
        diag.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            %mode,
            pool = diag.pool_size,
            eligible = diag.eligible,
            output = diag.output_len,
            dynamic_limit = diag.dynamic_limit_applied,
            adjustment = adjustment.as_str(),
            vibration = diag.vibration_score,
            elapsed_ms = diag.elapsed_ms,
            "schedule built"
        );
        self.last = Some(diag);

        Ok(sequence.into_iter().map(|prioritized| prioritized.item).collect())
    }

    /// Records an answer, refreshes the word's cached Position and updates
    /// every session cache that depends on it.
    pub async fn record_answer(
        &mut self,
        word: &str,
        correct: bool,
        response_time_ms: u64,
        mode: LearningMode,
        now: DateTime<Utc>,
    ) -> Result<f64, SchedulerError> {
        self.store
            .record_answer(word, correct, response_time_ms, mode, now)
            .await?;
        let record = self.store.get_progress(word, mode).await?;
        let position = self.score.score(record.as_ref(), mode, now, true);
        self.store.update_position(word, mode, position).await?;

        self.recent.push(
            mode,
            RecentAnswer {
                word: word.to_string(),
                correct,
                answered_at: now,
                consecutive_correct: record.as_ref().map_or(0, |r| r.consecutive_correct),
            },
        );
        self.classifier.invalidate(word, mode);
        self.reinsertion.remove(mode, word);

        tracing::debug!(%mode, word, correct, position, "answer recorded");
        Ok(position)
    }

    /// Clears every session-scoped cache.
    pub fn reset_session(&mut self) {
        self.recent.reset();
        self.classifier.reset();
        self.reinsertion.clear();
        self.last = None;
        tracing::info!("scheduler session reset");
    }

    pub async fn reset_batches(&mut self, mode: LearningMode) -> Result<(), StoreError> {
        self.batches.reset(self.kv.as_ref(), mode).await
    }

    fn prioritize(
        &mut self,
        item: &Item,
        record: Option<&ProgressRecord>,
        mode: LearningMode,
        now: DateTime<Utc>,
        clock: Instant,
    ) -> PrioritizedItem {
        let position = self.score.score(record, mode, now, false);
        let classification = self.classifier.classify(&item.word, mode, record, position, clock);
        PrioritizedItem {
            item: item.clone(),
            position: classification.position,
            category: classification.category,
            attempts: record.map_or(0, |r| r.attempts),
            consecutive_correct: record.map_or(0, |r| r.consecutive_correct),
            final_priority: None,
        }
    }

    fn positions_of(
        &self,
        progress: &HashMap<String, ProgressRecord>,
        mode: LearningMode,
        now: DateTime<Utc>,
    ) -> HashMap<String, f64> {
        progress
            .iter()
            .map(|(word, record)| (word.clone(), self.score.score(Some(record), mode, now, false)))
            .collect()
    }
}

impl<S, K> std::fmt::Debug for Scheduler<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("pending_reinsertions", &self.reinsertion.len())
            .finish_non_exhaustive()
    }
}

/// First occurrence of each word, in pool order.
fn unique_items(pool: &[Item]) -> Vec<&Item> {
    let mut seen = HashSet::with_capacity(pool.len());
    let unique: Vec<&Item> = pool.iter().filter(|item| seen.insert(item.word.as_str())).collect();
    if unique.len() != pool.len() {
        tracing::debug!(dropped = pool.len() - unique.len(), "duplicate words in pool ignored");
    }
    unique
}
