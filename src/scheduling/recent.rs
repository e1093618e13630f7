//! Bounded, newest-first cache of recent answers, one per learning mode.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::scheduling::config::RecentCacheParams;
use crate::scheduling::types::{LearningMode, ProgressRecord, RecentAnswer};

#[derive(Debug, Clone, Default)]
struct ModeEntry {
    answers: VecDeque<RecentAnswer>,
    built_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct RecentAnswerCache {
    params: RecentCacheParams,
    modes: HashMap<LearningMode, ModeEntry>,
}

impl RecentAnswerCache {
    pub fn new(params: RecentCacheParams) -> Self {
        Self {
            params,
            modes: HashMap::new(),
        }
    }

    /// True while the snapshot for `mode` is within its TTL.
    pub fn is_fresh(&self, mode: LearningMode, now: Instant) -> bool {
        self.modes
            .get(&mode)
            .and_then(|entry| entry.built_at)
            .is_some_and(|built| now.duration_since(built) < self.params.ttl)
    }

    /// Replaces the snapshot for `mode` with answers reconstructed from the
    /// records' last-study data.
    pub fn rebuild<'a>(
        &mut self,
        mode: LearningMode,
        records: impl IntoIterator<Item = &'a ProgressRecord>,
        now: Instant,
    ) {
        let mut answers: Vec<RecentAnswer> = records
            .into_iter()
            .filter_map(|record| {
                let answered_at = record.last_studied?;
                let correct = record
                    .last_correct
                    .unwrap_or(record.consecutive_incorrect == 0 && record.attempts > 0);
                Some(RecentAnswer {
                    word: record.word.clone(),
                    correct,
                    answered_at,
                    consecutive_correct: record.consecutive_correct,
                })
            })
            .collect();
        answers.sort_by(|a, b| b.answered_at.cmp(&a.answered_at).then_with(|| a.word.cmp(&b.word)));
        answers.truncate(self.params.capacity);

        let entry = self.modes.entry(mode).or_default();
        entry.answers = answers.into();
        entry.built_at = Some(now);
    }

    /// Records an answer given during the session, keeping newest first.
    pub fn push(&mut self, mode: LearningMode, answer: RecentAnswer) {
        let entry = self.modes.entry(mode).or_default();
        entry.answers.retain(|a| a.word != answer.word);
        let index = entry
            .answers
            .iter()
            .position(|a| a.answered_at <= answer.answered_at)
            .unwrap_or(entry.answers.len());
        entry.answers.insert(index, answer);
        entry.answers.truncate(self.params.capacity);
    }

    pub fn answers(&self, mode: LearningMode) -> Vec<RecentAnswer> {
        self.modes
            .get(&mode)
            .map(|entry| entry.answers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, mode: LearningMode, word: &str) -> Option<&RecentAnswer> {
        self.modes
            .get(&mode)
            .and_then(|entry| entry.answers.iter().find(|a| a.word == word))
    }

    pub fn most_recent(&self, mode: LearningMode) -> Option<&RecentAnswer> {
        self.modes.get(&mode).and_then(|entry| entry.answers.front())
    }

    pub fn len(&self, mode: LearningMode) -> usize {
        self.modes.get(&mode).map_or(0, |entry| entry.answers.len())
    }

    pub fn reset(&mut self) {
        self.modes.clear();
    }
}

impl Default for RecentAnswerCache {
    fn default() -> Self {
        Self::new(RecentCacheParams::default())
    }
}

/// Newest answer per word.
pub fn latest_by_word(answers: &[RecentAnswer]) -> HashMap<&str, &RecentAnswer> {
    let mut out: HashMap<&str, &RecentAnswer> = HashMap::with_capacity(answers.len());
    for answer in answers {
        out.entry(answer.word.as_str())
            .and_modify(|existing| {
                if answer.answered_at > existing.answered_at {
                    *existing = answer;
                }
            })
            .or_insert(answer);
    }
    out
}
