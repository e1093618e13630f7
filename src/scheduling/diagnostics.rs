use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scheduling::allocator::{Allocation, SlotCounts};
use crate::scheduling::batch::BatchStatus;
use crate::scheduling::classifier::MemoStats;
use crate::scheduling::locality::ReorderStats;
use crate::scheduling::signals::{RatioAdjustment, Signals, TimeOfDay};
use crate::scheduling::slot_config::SlotConfig;
use crate::scheduling::types::LearningMode;

/// Snapshot of the last scheduling call, for monitoring and tests.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub mode: LearningMode,
    pub generated_at: Option<DateTime<Utc>>,
    pub pool_size: usize,
    pub eligible: usize,
    pub output_len: usize,
    /// 0-100 repetition risk in the head of the output.
    pub vibration_score: f64,
    pub penalized: usize,
    pub available: SlotCounts,
    pub raw_slots: SlotCounts,
    pub allocated: SlotCounts,
    pub dynamic_limit_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_config: Option<SlotConfig>,
    pub locality_picks: usize,
    pub tie_swaps: usize,
    pub locality_degraded: bool,
    pub reorder: ReorderStats,
    pub head_moves: usize,
    pub time_of_day: TimeOfDay,
    pub cognitive_load: f64,
    pub signals: Signals,
    pub adjustment: RatioAdjustment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchStatus>,
    pub reinsertion_pending: usize,
    pub reinsertion_pulled: usize,
    pub invariant_violations: usize,
    pub classifier: MemoStats,
    pub elapsed_ms: f64,
}

impl Diagnostics {
    pub fn empty(mode: LearningMode, now: DateTime<Utc>) -> Self {
        Self {
            mode,
            generated_at: Some(now),
            ..Default::default()
        }
    }

    pub(crate) fn record_allocation(&mut self, allocation: &Allocation) {
        self.available = allocation.available;
        self.raw_slots = allocation.raw;
        self.allocated = allocation.allocated;
        self.dynamic_limit_applied = allocation.dynamic_limit_applied;
        self.effective_config = allocation.effective;
        self.locality_picks = allocation.locality_picks;
        self.tie_swaps = allocation.tie_swaps;
        self.locality_degraded = allocation.locality_degraded;
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
