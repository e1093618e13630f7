//! Reinsertion queue for words missed on their previous appearance.
//!
//! A missed word that would head the next batch is pulled out and comes back
//! after 2-5 other items (weighted toward 2). The countdown runs once per
//! scheduling call; when it reaches zero the word is placed at the head.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scheduling::config::ReinsertionParams;
use crate::scheduling::types::{LearningMode, PrioritizedItem, RecentAnswer};

const MIN_DELAY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReinsertion {
    pub mode: LearningMode,
    pub word: String,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReinsertionOutcome {
    pub pulled: usize,
    pub placed: usize,
    pub released: usize,
}

#[derive(Debug)]
pub struct ReinsertionQueue {
    params: ReinsertionParams,
    pending: Vec<PendingReinsertion>,
    /// Miss timestamp already deferred once, per word.
    handled: HashMap<(LearningMode, String), DateTime<Utc>>,
    rng: StdRng,
}

impl ReinsertionQueue {
    pub fn new(params: ReinsertionParams, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            params,
            pending: Vec::new(),
            handled: HashMap::new(),
            rng,
        }
    }

    /// Draws a delay in 2..=5 from the configured weights.
    pub fn draw_delay(&mut self) -> usize {
        let total: u32 = self.params.delay_weights.iter().sum();
        if total == 0 {
            return MIN_DELAY;
        }
        let mut roll = self.rng.random_range(0..total);
        for (offset, weight) in self.params.delay_weights.iter().enumerate() {
            if roll < *weight {
                return MIN_DELAY + offset;
            }
            roll -= weight;
        }
        MIN_DELAY
    }

    pub fn contains(&self, mode: LearningMode, word: &str) -> bool {
        self.pending.iter().any(|p| p.mode == mode && p.word == word)
    }

    pub fn remove(&mut self, mode: LearningMode, word: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| !(p.mode == mode && p.word == word));
        before != self.pending.len()
    }

    pub fn pending(&self, mode: LearningMode) -> impl Iterator<Item = &PendingReinsertion> {
        self.pending.iter().filter(move |p| p.mode == mode)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.handled.clear();
    }

    /// One scheduling call's worth of queue work on `sequence`:
    /// 1. tick every pending entry for `mode` and place it at its countdown
    ///    index, pulling it from `scored` when allocation dropped it
    /// 2. pull missed words off the head, one after another, and queue them
    ///
    /// `sequence` never grows past `max_len`.
    pub fn apply(
        &mut self,
        mode: LearningMode,
        sequence: &mut Vec<PrioritizedItem>,
        scored: &HashMap<String, PrioritizedItem>,
        recent: &[RecentAnswer],
        now: DateTime<Utc>,
        max_len: usize,
    ) -> ReinsertionOutcome {
        let mut outcome = ReinsertionOutcome::default();
        let window = self.params.miss_window_secs;
        self.handled
            .retain(|_, missed_at| (now - *missed_at).num_milliseconds() as f64 / 1000.0 <= window);

        let mut ticking: Vec<PendingReinsertion> = Vec::new();
        self.pending.retain(|p| {
            if p.mode == mode {
                ticking.push(p.clone());
                false
            } else {
                true
            }
        });
        ticking.sort_by_key(|p| p.remaining);

        let mut released: Vec<String> = Vec::new();
        let mut placements: Vec<(usize, PrioritizedItem)> = Vec::new();
        for mut entry in ticking {
            entry.remaining = entry.remaining.saturating_sub(1);
            let item = match sequence.iter().position(|i| i.word() == entry.word) {
                Some(index) => sequence.remove(index),
                None => match scored.get(&entry.word) {
                    Some(item) => item.clone(),
                    // no longer eligible
                    None => continue,
                },
            };
            placements.push((entry.remaining, item));
            if entry.remaining == 0 {
                released.push(entry.word.clone());
                outcome.released += 1;
            } else {
                self.pending.push(entry);
            }
        }
        for (index, item) in placements {
            place(sequence, index, item, max_len);
            outcome.placed += 1;
        }

        let latest = crate::scheduling::recent::latest_by_word(recent);
        let limit = sequence.len();
        for _ in 0..limit {
            let Some(head) = sequence.first() else {
                break;
            };
            let word = head.word().to_string();
            if released.contains(&word) || self.contains(mode, &word) {
                break;
            }
            let Some(answer) = latest.get(word.as_str()) else {
                break;
            };
            let fresh_miss = !answer.correct && answer.seconds_ago(now) <= window;
            let key = (mode, word.clone());
            if !fresh_miss || self.handled.get(&key) == Some(&answer.answered_at) {
                break;
            }

            let delay = self.draw_delay();
            let item = sequence.remove(0);
            self.handled.insert(key, answer.answered_at);
            self.pending.push(PendingReinsertion {
                mode,
                word: word.clone(),
                remaining: delay,
            });
            place(sequence, delay, item, max_len);
            outcome.pulled += 1;
            tracing::debug!(%mode, %word, delay, "missed word deferred");
        }
        outcome
    }
}

fn place(sequence: &mut Vec<PrioritizedItem>, index: usize, item: PrioritizedItem, max_len: usize) {
    if max_len > 0 && sequence.len() >= max_len {
        sequence.pop();
    }
    let index = index.min(sequence.len());
    sequence.insert(index, item);
}
