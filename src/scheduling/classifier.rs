//! Category classification with sparse-history fallbacks and a TTL memo.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

use crate::scheduling::config::ClassifierParams;
use crate::scheduling::types::{Category, LearningMode, ProgressRecord};

/// Category plus the Position moved into that category's band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub position: f64,
}

/// Everything the decision depends on. Floats are compared bitwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Signature {
    attempts: u32,
    correct: u32,
    consecutive_correct: u32,
    consecutive_incorrect: u32,
    saved_position: Option<u64>,
    position: u64,
}

impl Signature {
    fn of(record: Option<&ProgressRecord>, position: f64) -> Self {
        Self {
            attempts: record.map_or(0, |r| r.attempts),
            correct: record.map_or(0, |r| r.correct),
            consecutive_correct: record.map_or(0, |r| r.consecutive_correct),
            consecutive_incorrect: record.map_or(0, |r| r.consecutive_incorrect),
            saved_position: record.and_then(|r| r.saved_position).map(f64::to_bits),
            position: position.to_bits(),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoEntry {
    signature: Signature,
    result: Classification,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct CategoryClassifier {
    params: ClassifierParams,
    memo: HashMap<(LearningMode, String), MemoEntry>,
    /// Last accepted category per word this session, for transition checks.
    last_accepted: HashMap<(LearningMode, String), Category>,
    hits: u64,
    misses: u64,
}

impl CategoryClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self {
            params,
            memo: HashMap::new(),
            last_accepted: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn classify(
        &mut self,
        word: &str,
        mode: LearningMode,
        record: Option<&ProgressRecord>,
        position: f64,
        now: Instant,
    ) -> Classification {
        let key = (mode, word.to_string());
        let signature = Signature::of(record, position);

        if let Some(entry) = self.memo.get(&key) {
            if entry.signature == signature && entry.expires_at > now {
                self.hits += 1;
                return entry.result;
            }
        }
        self.misses += 1;

        let previous = self.previous_category(&key, record, position);
        let proposed = self.propose(record, position);
        let category = match record {
            Some(r) if r.attempts > 0 => self.validate_transition(previous, proposed, r),
            _ => proposed,
        };
        let result = Classification {
            category,
            position: category.clamp_into(position),
        };
        self.memo.insert(
            key.clone(),
            MemoEntry {
                signature,
                result,
                expires_at: now + self.params.cache_ttl,
            },
        );
        // a held-back jump keeps the old category as the reference point
        if category == proposed {
            self.last_accepted.insert(key, category);
        }
        result
    }

    fn previous_category(
        &self,
        key: &(LearningMode, String),
        record: Option<&ProgressRecord>,
        position: f64,
    ) -> Option<Category> {
        if let Some(category) = self.last_accepted.get(key) {
            return Some(*category);
        }
        // a cached score that differs from the fresh one is the prior state
        record
            .and_then(|r| r.saved_position)
            .filter(|saved| saved.to_bits() != position.to_bits())
            .map(Category::from_position)
    }

    /// Pure decision against an explicit previous category, without the memo.
    pub fn decide(
        &self,
        record: Option<&ProgressRecord>,
        position: f64,
        previous: Option<Category>,
    ) -> Category {
        let proposed = self.propose(record, position);
        match record {
            Some(r) if r.attempts > 0 => self.validate_transition(previous, proposed, r),
            _ => proposed,
        }
    }

    fn propose(&self, record: Option<&ProgressRecord>, position: f64) -> Category {
        let record = match record {
            Some(r) if r.attempts > 0 => r,
            _ => return Category::from_position(position),
        };

        if record.attempts < self.params.min_attempts_for_ratio {
            let by_streak = self.streak_category(record);
            match record.saved_position {
                Some(saved) if record.attempts == 1 && saved.is_finite() => {
                    let by_saved = Category::from_position(saved);
                    if by_saved != by_streak {
                        tracing::trace!(word = %record.word, %by_saved, %by_streak, "first attempt tie broken by saved position");
                    }
                    by_saved
                }
                _ => by_streak,
            }
        } else {
            Category::from_position(position)
        }
    }

    fn streak_category(&self, record: &ProgressRecord) -> Category {
        match record.consecutive_correct {
            0 => Category::Incorrect,
            n if n >= self.params.mastered_streak => Category::Mastered,
            _ => Category::StillLearning,
        }
    }

    /// Blocks implausible jumps, holding the word in StillLearning instead.
    fn validate_transition(
        &self,
        previous: Option<Category>,
        proposed: Category,
        record: &ProgressRecord,
    ) -> Category {
        match (previous, proposed) {
            (Some(Category::Mastered), Category::Incorrect)
                if record.consecutive_incorrect < self.params.mastered_to_incorrect_min_misses =>
            {
                Category::StillLearning
            }
            (Some(Category::New), Category::Mastered)
                if record.attempts < self.params.new_to_mastered_min_attempts =>
            {
                Category::StillLearning
            }
            _ => proposed,
        }
    }

    pub fn invalidate(&mut self, word: &str, mode: LearningMode) {
        self.memo.remove(&(mode, word.to_string()));
    }

    /// Drops memo entries that have expired.
    pub fn purge_expired(&mut self, now: Instant) {
        self.memo.retain(|_, entry| entry.expires_at > now);
    }

    pub fn reset(&mut self) {
        self.memo.clear();
        self.last_accepted.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> MemoStats {
        MemoStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.memo.len(),
        }
    }
}

impl Default for CategoryClassifier {
    fn default() -> Self {
        Self::new(ClassifierParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(attempts: u32, correct: u32, streak: u32, misses: u32) -> ProgressRecord {
        let mut r = ProgressRecord::new("w", LearningMode::Recall);
        r.attempts = attempts;
        r.correct = correct;
        r.consecutive_correct = streak;
        r.consecutive_incorrect = misses;
        r
    }

    #[test]
    fn test_no_history_uses_bands() {
        let classifier = CategoryClassifier::default();
        assert_eq!(classifier.decide(None, 35.0, None), Category::New);
        assert_eq!(classifier.decide(None, 70.0, None), Category::Incorrect);
        assert_eq!(classifier.decide(None, 69.999, None), Category::StillLearning);
    }

    #[test]
    fn test_sparse_history_uses_streaks() {
        let classifier = CategoryClassifier::default();
        assert_eq!(classifier.decide(Some(&record(2, 0, 0, 2)), 10.0, None), Category::Incorrect);
        assert_eq!(classifier.decide(Some(&record(2, 2, 2, 0)), 80.0, None), Category::StillLearning);
    }

    #[test]
    fn test_sparse_streak_reaches_mastered_with_defaults() {
        let classifier = CategoryClassifier::default();
        assert_eq!(classifier.decide(Some(&record(3, 3, 3, 0)), 50.0, None), Category::Mastered);
        assert_eq!(classifier.decide(Some(&record(4, 4, 4, 0)), 50.0, None), Category::Mastered);
        // enough attempts: the band decides again
        assert_eq!(classifier.decide(Some(&record(5, 5, 5, 0)), 50.0, None), Category::StillLearning);
    }

    #[test]
    fn test_first_attempt_saved_position_breaks_tie() {
        let classifier = CategoryClassifier::default();
        let mut r = record(1, 1, 1, 0);
        r.saved_position = Some(25.0);
        assert_eq!(classifier.decide(Some(&r), 25.0, None), Category::New);
        r.saved_position = None;
        assert_eq!(classifier.decide(Some(&r), 25.0, None), Category::StillLearning);
    }

    #[test]
    fn test_mastered_to_incorrect_needs_two_misses() {
        let classifier = CategoryClassifier::default();
        let one_miss = record(6, 5, 0, 1);
        assert_eq!(
            classifier.decide(Some(&one_miss), 78.0, Some(Category::Mastered)),
            Category::StillLearning
        );
        let two_misses = record(7, 5, 0, 2);
        assert_eq!(
            classifier.decide(Some(&two_misses), 85.0, Some(Category::Mastered)),
            Category::Incorrect
        );
    }

    #[test]
    fn test_new_to_mastered_needs_three_attempts() {
        let classifier = CategoryClassifier::new(ClassifierParams {
            min_attempts_for_ratio: 1,
            ..Default::default()
        });
        let r = record(2, 2, 2, 0);
        assert_eq!(
            classifier.decide(Some(&r), 10.0, Some(Category::New)),
            Category::StillLearning
        );
        let r = record(3, 3, 3, 0);
        assert_eq!(classifier.decide(Some(&r), 10.0, Some(Category::New)), Category::Mastered);
    }

    #[test]
    fn test_classification_position_stays_in_band() {
        let mut classifier = CategoryClassifier::default();
        let r = record(2, 2, 2, 0);
        let result = classifier.classify("w", LearningMode::Recall, Some(&r), 12.0, Instant::now());
        assert_eq!(result.category, Category::StillLearning);
        assert_eq!(result.position, 40.0);
        assert_eq!(Category::from_position(result.position), result.category);
    }

    #[test]
    fn test_memo_hits_until_inputs_change_or_expire() {
        let mut classifier = CategoryClassifier::new(ClassifierParams {
            cache_ttl: Duration::from_secs(10),
            ..Default::default()
        });
        let now = Instant::now();
        let r = record(4, 3, 2, 0);
        classifier.classify("w", LearningMode::Recall, Some(&r), 45.0, now);
        classifier.classify("w", LearningMode::Recall, Some(&r), 45.0, now + Duration::from_secs(1));
        assert_eq!(classifier.stats().hits, 1);

        let changed = record(5, 4, 3, 0);
        classifier.classify("w", LearningMode::Recall, Some(&changed), 45.0, now + Duration::from_secs(2));
        assert_eq!(classifier.stats().misses, 2);

        classifier.classify("w", LearningMode::Recall, Some(&changed), 45.0, now + Duration::from_secs(60));
        assert_eq!(classifier.stats().misses, 3);

        classifier.purge_expired(now + Duration::from_secs(600));
        assert_eq!(classifier.stats().entries, 0);
    }
}
