//! Anti-vibration - keeps just-answered words from bouncing straight back.
//!
//! Penalties:
//! - answered < 30s ago: severe (-100)
//! - correct within min_interval: large (-5)
//! - correct within 5 x min_interval: moderate (-2)
//! - correct streak >= threshold: extra moderate (-2), regardless of recency
//!
//! A penalised Position never drops below the floor of the word's category
//! band, so the penalty reorders within a category and never reclassifies.

use chrono::{DateTime, Utc};

use crate::scheduling::config::AntiVibrationParams;
use crate::scheduling::recent::latest_by_word;
use crate::scheduling::types::{PrioritizedItem, RecentAnswer};

#[derive(Debug, Clone)]
pub struct RecencyPenalizer {
    params: AntiVibrationParams,
}

impl RecencyPenalizer {
    pub fn new(params: AntiVibrationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AntiVibrationParams {
        &self.params
    }

    /// Penalty for one word, before clamping.
    pub fn penalty_for(&self, answer: Option<&RecentAnswer>, consecutive_correct: u32, now: DateTime<Utc>) -> f64 {
        let p = &self.params;
        let mut penalty = 0.0;

        if let Some(answer) = answer {
            let elapsed = answer.seconds_ago(now);
            if elapsed < p.severe_window_secs {
                penalty += p.severe_penalty;
            } else if answer.correct && elapsed < p.min_interval_secs {
                penalty += p.large_penalty;
            } else if answer.correct && elapsed < p.min_interval_secs * p.moderate_window_factor {
                penalty += p.moderate_penalty;
            }
        }

        if consecutive_correct >= p.consecutive_threshold {
            penalty += p.streak_penalty;
        }
        penalty
    }

    /// Returns the number of items whose Position changed.
    pub fn apply(&self, items: &mut [PrioritizedItem], recent: &[RecentAnswer], now: DateTime<Utc>) -> usize {
        let latest = latest_by_word(recent);
        let mut changed = 0;

        for item in items.iter_mut() {
            let answer = latest.get(item.word()).copied();
            let penalty = self.penalty_for(answer, item.consecutive_correct, now);
            if penalty <= 0.0 {
                continue;
            }
            let floor = item.category.floor();
            let adjusted = (item.position - penalty).max(floor);
            if adjusted != item.position {
                tracing::trace!(
                    word = %item.word(),
                    from = item.position,
                    to = adjusted,
                    "anti-vibration penalty"
                );
                item.position = adjusted;
                changed += 1;
            }
        }
        changed
    }

    /// 0-100 estimate of near-term repetition risk among the first `top_n`
    /// items of `items`. Diagnostic only.
    pub fn vibration_score(
        &self,
        items: &[PrioritizedItem],
        recent: &[RecentAnswer],
        top_n: usize,
        now: DateTime<Utc>,
    ) -> f64 {
        let n = top_n.min(items.len());
        if n == 0 {
            return 0.0;
        }
        let latest = latest_by_word(recent);
        let p = &self.params;

        let mut risk = 0.0;
        for (index, item) in items.iter().take(n).enumerate() {
            let Some(answer) = latest.get(item.word()) else {
                continue;
            };
            let elapsed = answer.seconds_ago(now);
            let weight = if elapsed < p.severe_window_secs {
                1.0
            } else if elapsed < p.min_interval_secs {
                0.6
            } else if elapsed < p.min_interval_secs * p.moderate_window_factor {
                0.3
            } else {
                0.0
            };
            // earlier slots repeat sooner
            let slot_weight = 1.0 - index as f64 / (2.0 * n as f64);
            risk += weight * slot_weight;
        }
        (risk / n as f64 * 100.0).clamp(0.0, 100.0)
    }
}

impl Default for RecencyPenalizer {
    fn default() -> Self {
        Self::new(AntiVibrationParams::default())
    }
}
