//! Position - the bounded 0-100 priority score of a word.
//!
//! Higher means "ask sooner". The heuristic behind the number is a
//! `PositionStrategy`; `ScoreEngine` wraps it with the cache rules shared by
//! every strategy.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::scheduling::config::ScoreParams;
use crate::scheduling::types::{
    Category, LearningMode, PrioritizedItem, ProgressRecord, NEUTRAL_POSITION, POSITION_MAX, POSITION_MIN,
};

/// Scoring heuristic for one learning mode. Must be deterministic, bounded
/// to [0,100], rise with misses and rise with time since the last success.
pub trait PositionStrategy: Send + Sync {
    fn compute(&self, record: &ProgressRecord, now: DateTime<Utc>) -> f64;
}

/// Optional re-ranking inside a category. The returned key replaces
/// Position for ordering only; Position and category are left alone, so the
/// bands still hold. `None` keeps Position as the key.
pub trait PriorityScorer: Send + Sync {
    fn final_priority(
        &self,
        item: &PrioritizedItem,
        record: Option<&ProgressRecord>,
        now: DateTime<Utc>,
    ) -> Option<f64>;
}

#[derive(Debug, Clone)]
pub struct HeuristicWeights {
    pub base: f64,
    pub accuracy_weight: f64,
    pub streak_step: f64,
    pub streak_cap: u32,
    pub miss_step: f64,
    pub forgetting_cap: f64,
    /// Hours for the forgetting term to reach ~63% of its cap at streak 1.
    pub stability_hours: f64,
    pub difficulty_weight: f64,
}

impl HeuristicWeights {
    pub fn for_mode(mode: LearningMode) -> Self {
        let base = Self {
            base: 65.0,
            accuracy_weight: 25.0,
            streak_step: 6.0,
            streak_cap: 5,
            miss_step: 8.0,
            forgetting_cap: 20.0,
            stability_hours: 24.0,
            difficulty_weight: 6.0,
        };
        match mode {
            LearningMode::Recognition => base,
            LearningMode::Recall => Self {
                stability_hours: 18.0,
                ..base
            },
            // audio and production decay faster
            LearningMode::Listening => Self {
                stability_hours: 12.0,
                forgetting_cap: 24.0,
                ..base
            },
            LearningMode::Spelling => Self {
                stability_hours: 12.0,
                streak_step: 5.0,
                ..base
            },
        }
    }
}

/// Default accuracy/streak/forgetting heuristic.
#[derive(Debug, Clone)]
pub struct HeuristicPosition {
    weights: HeuristicWeights,
}

impl HeuristicPosition {
    pub fn new(weights: HeuristicWeights) -> Self {
        Self { weights }
    }

    pub fn for_mode(mode: LearningMode) -> Self {
        Self::new(HeuristicWeights::for_mode(mode))
    }

    fn forgetting(&self, record: &ProgressRecord, now: DateTime<Utc>) -> f64 {
        let Some(last) = record.last_studied else {
            return 0.0;
        };
        let hours = (now - last).num_seconds().max(0) as f64 / 3600.0;
        let stability = self.weights.stability_hours * record.consecutive_correct.max(1) as f64;
        self.weights.forgetting_cap * (1.0 - (-hours / stability).exp())
    }

    fn difficulty(&self, record: &ProgressRecord) -> f64 {
        let user = record.user_difficulty.unwrap_or(0.5).clamp(0.0, 1.0);
        let aggregate = record.difficulty_score.unwrap_or(0.5).clamp(0.0, 1.0);
        (user * 0.6 + aggregate * 0.4 - 0.5) * 2.0 * self.weights.difficulty_weight
    }
}

impl PositionStrategy for HeuristicPosition {
    fn compute(&self, record: &ProgressRecord, now: DateTime<Utc>) -> f64 {
        if record.attempts == 0 {
            return NEUTRAL_POSITION;
        }
        let w = &self.weights;
        let accuracy = record.accuracy();

        if record.consecutive_incorrect > 0 {
            let misses = (record.consecutive_incorrect - 1) as f64;
            let score = Category::Incorrect.floor()
                + (1.0 - accuracy) * 15.0
                + misses * w.miss_step
                + self.difficulty(record).max(0.0);
            return score.clamp(Category::Incorrect.floor(), POSITION_MAX);
        }

        let streak = record.consecutive_correct.min(w.streak_cap) as f64;
        let score = w.base - accuracy * w.accuracy_weight - streak * w.streak_step
            + self.forgetting(record, now)
            + self.difficulty(record);
        score.clamp(POSITION_MIN, Category::StillLearning.clamp_into(POSITION_MAX))
    }
}

/// Applies the cache rules on top of a per-mode strategy.
#[derive(Clone)]
pub struct ScoreEngine {
    params: ScoreParams,
    strategies: Vec<(LearningMode, Arc<dyn PositionStrategy>)>,
}

impl std::fmt::Debug for ScoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreEngine")
            .field("params", &self.params)
            .field("modes", &self.strategies.iter().map(|(m, _)| *m).collect::<Vec<_>>())
            .finish()
    }
}

impl ScoreEngine {
    pub fn new(params: ScoreParams) -> Self {
        let strategies = LearningMode::all()
            .iter()
            .map(|mode| {
                (
                    *mode,
                    Arc::new(HeuristicPosition::for_mode(*mode)) as Arc<dyn PositionStrategy>,
                )
            })
            .collect();
        Self { params, strategies }
    }

    /// Swaps the heuristic used for `mode`.
    pub fn set_strategy(&mut self, mode: LearningMode, strategy: Arc<dyn PositionStrategy>) {
        match self.strategies.iter_mut().find(|(m, _)| *m == mode) {
            Some(slot) => slot.1 = strategy,
            None => self.strategies.push((mode, strategy)),
        }
    }

    fn strategy(&self, mode: LearningMode) -> Option<&Arc<dyn PositionStrategy>> {
        self.strategies.iter().find(|(m, _)| *m == mode).map(|(_, s)| s)
    }

    /// A cached StillLearning score that has since earned enough correct
    /// answers is not trusted.
    pub fn needs_promotion_check(&self, record: &ProgressRecord) -> bool {
        let Some(saved) = record.saved_position else {
            return false;
        };
        Category::from_position(saved) == Category::StillLearning
            && record.attempts >= self.params.promote_min_attempts
            && record.correct >= self.params.promote_min_correct
            && record.consecutive_correct >= self.params.promote_min_streak
    }

    pub fn score(
        &self,
        record: Option<&ProgressRecord>,
        mode: LearningMode,
        now: DateTime<Utc>,
        force_recompute: bool,
    ) -> f64 {
        let Some(record) = record else {
            return NEUTRAL_POSITION;
        };

        if let Some(saved) = record.saved_position {
            if !force_recompute && saved.is_finite() && !self.needs_promotion_check(record) {
                return saved.clamp(POSITION_MIN, POSITION_MAX);
            }
        }

        let raw = match self.strategy(mode) {
            Some(strategy) => strategy.compute(record, now),
            None => HeuristicPosition::for_mode(mode).compute(record, now),
        };
        if raw.is_finite() {
            raw.clamp(POSITION_MIN, POSITION_MAX)
        } else {
            tracing::warn!(word = %record.word, %mode, "non-finite position; using neutral default");
            NEUTRAL_POSITION
        }
    }
}

impl Default for ScoreEngine {
    fn default() -> Self {
        Self::new(ScoreParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(attempts: u32, correct: u32, streak: u32, misses: u32) -> ProgressRecord {
        let mut r = ProgressRecord::new("word", LearningMode::Recognition);
        r.attempts = attempts;
        r.correct = correct;
        r.consecutive_correct = streak;
        r.consecutive_incorrect = misses;
        r
    }

    #[test]
    fn test_missing_record_is_neutral() {
        let engine = ScoreEngine::default();
        let p = engine.score(None, LearningMode::Recall, Utc::now(), false);
        assert_eq!(p, NEUTRAL_POSITION);
        assert_eq!(Category::from_position(p), Category::New);
    }

    #[test]
    fn test_recent_miss_lands_in_incorrect() {
        let engine = ScoreEngine::default();
        let now = Utc::now();
        let mut r = record(4, 2, 0, 1);
        r.last_studied = Some(now);
        let p = engine.score(Some(&r), LearningMode::Recognition, now, false);
        assert!(p >= 70.0 && p <= 100.0, "position {p}");
    }

    #[test]
    fn test_more_misses_score_higher() {
        let strategy = HeuristicPosition::for_mode(LearningMode::Recognition);
        let now = Utc::now();
        let one = strategy.compute(&record(5, 3, 0, 1), now);
        let three = strategy.compute(&record(5, 2, 0, 3), now);
        assert!(three > one, "{three} should exceed {one}");
    }

    #[test]
    fn test_elapsed_time_raises_score_up_to_cap() {
        let strategy = HeuristicPosition::for_mode(LearningMode::Recognition);
        let now = Utc::now();
        let mut fresh = record(6, 6, 4, 0);
        fresh.last_studied = Some(now);
        let mut stale = fresh.clone();
        stale.last_studied = Some(now - Duration::days(10));
        let mut ancient = fresh.clone();
        ancient.last_studied = Some(now - Duration::days(3650));

        let a = strategy.compute(&fresh, now);
        let b = strategy.compute(&stale, now);
        let c = strategy.compute(&ancient, now);
        assert!(b > a);
        assert!(c >= b);
        assert!(c - a <= HeuristicWeights::for_mode(LearningMode::Recognition).forgetting_cap + 1e-9);
    }

    #[test]
    fn test_long_streak_is_mastered() {
        let strategy = HeuristicPosition::for_mode(LearningMode::Recognition);
        let now = Utc::now();
        let mut r = record(8, 8, 6, 0);
        r.last_studied = Some(now);
        assert_eq!(Category::from_position(strategy.compute(&r, now)), Category::Mastered);
    }

    #[test]
    fn test_cached_position_is_trusted() {
        let engine = ScoreEngine::default();
        let mut r = record(2, 1, 1, 0);
        r.saved_position = Some(42.0);
        assert_eq!(engine.score(Some(&r), LearningMode::Recognition, Utc::now(), false), 42.0);
    }

    #[test]
    fn test_force_recompute_ignores_cache() {
        let engine = ScoreEngine::default();
        let now = Utc::now();
        let mut r = record(3, 0, 0, 3);
        r.last_studied = Some(now);
        r.saved_position = Some(10.0);
        let p = engine.score(Some(&r), LearningMode::Recognition, now, true);
        assert!(p >= 70.0);
    }

    #[test]
    fn test_auto_promotion_recomputes_stale_still_learning() {
        let engine = ScoreEngine::default();
        let now = Utc::now();
        let mut r = record(5, 5, 5, 0);
        r.last_studied = Some(now);
        r.saved_position = Some(55.0);
        assert!(engine.needs_promotion_check(&r));
        let p = engine.score(Some(&r), LearningMode::Recognition, now, false);
        assert!(p < 40.0, "expected promotion out of StillLearning, got {p}");
    }

    #[test]
    fn test_auto_promotion_needs_streak() {
        let engine = ScoreEngine::default();
        let mut r = record(5, 4, 1, 0);
        r.saved_position = Some(55.0);
        assert!(!engine.needs_promotion_check(&r));
    }

    struct Broken;

    impl PositionStrategy for Broken {
        fn compute(&self, _: &ProgressRecord, _: DateTime<Utc>) -> f64 {
            f64::NAN
        }
    }

    #[test]
    fn test_swapped_strategy_is_bounded() {
        let mut engine = ScoreEngine::default();
        engine.set_strategy(LearningMode::Spelling, Arc::new(Broken));
        let r = record(1, 0, 0, 1);
        assert_eq!(
            engine.score(Some(&r), LearningMode::Spelling, Utc::now(), true),
            NEUTRAL_POSITION
        );
    }
}
