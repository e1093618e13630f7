//! Slot allocation - turns scored words into four ranked, size-limited
//! category lists.
//!
//! Steps:
//! 1. partition by category
//! 2. sort each partition by Position, stable on input order
//! 3. raw slots = floor(total * ratio), after the dynamic review limit
//! 4. clamp to availability
//! 5. hand surplus out in priority order Incorrect > StillLearning > New > Mastered
//! 6. pick the top words per category, with optional locality picks and a
//!    bounded association tie-break

use std::cmp::Ordering;

use serde::Serialize;

use crate::scheduling::association::AssociationProvider;
use crate::scheduling::config::{DynamicLimitParams, LocalityParams};
use crate::scheduling::slot_config::SlotConfig;
use crate::scheduling::types::{Category, PrioritizedItem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCounts {
    pub incorrect: usize,
    pub still_learning: usize,
    pub new: usize,
    pub mastered: usize,
}

impl SlotCounts {
    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::Incorrect => self.incorrect,
            Category::StillLearning => self.still_learning,
            Category::New => self.new,
            Category::Mastered => self.mastered,
        }
    }

    pub fn set(&mut self, category: Category, value: usize) {
        match category {
            Category::Incorrect => self.incorrect = value,
            Category::StillLearning => self.still_learning = value,
            Category::New => self.new = value,
            Category::Mastered => self.mastered = value,
        }
    }

    pub fn total(&self) -> usize {
        self.incorrect + self.still_learning + self.new + self.mastered
    }
}

/// Per-category ranked lists, in category priority order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryLists {
    pub incorrect: Vec<PrioritizedItem>,
    pub still_learning: Vec<PrioritizedItem>,
    pub new: Vec<PrioritizedItem>,
    pub mastered: Vec<PrioritizedItem>,
}

impl CategoryLists {
    pub fn get(&self, category: Category) -> &Vec<PrioritizedItem> {
        match category {
            Category::Incorrect => &self.incorrect,
            Category::StillLearning => &self.still_learning,
            Category::New => &self.new,
            Category::Mastered => &self.mastered,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut Vec<PrioritizedItem> {
        match category {
            Category::Incorrect => &mut self.incorrect,
            Category::StillLearning => &mut self.still_learning,
            Category::New => &mut self.new,
            Category::Mastered => &mut self.mastered,
        }
    }

    pub fn len(&self) -> usize {
        Category::PRIORITY.iter().map(|c| self.get(*c).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> SlotCounts {
        let mut counts = SlotCounts::default();
        for category in Category::PRIORITY {
            counts.set(category, self.get(category).len());
        }
        counts
    }

    /// Lists concatenated in priority order.
    pub fn concat(&self) -> Vec<PrioritizedItem> {
        Category::PRIORITY
            .iter()
            .flat_map(|c| self.get(*c).iter().cloned())
            .collect()
    }
}

/// Category make-up of the whole progress pool for `mode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub review: usize,
}

impl PoolStats {
    pub fn from_positions(positions: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        for position in positions {
            stats.total += 1;
            if matches!(
                Category::from_position(position),
                Category::Incorrect | Category::StillLearning
            ) {
                stats.review += 1;
            }
        }
        stats
    }

    pub fn review_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.review as f64 / self.total as f64
    }
}

/// Association context for locality-biased picks.
#[derive(Clone, Copy)]
pub struct LocalityContext<'a> {
    pub provider: &'a dyn AssociationProvider,
    pub recent_words: &'a [String],
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub lists: CategoryLists,
    pub available: SlotCounts,
    pub raw: SlotCounts,
    pub allocated: SlotCounts,
    pub effective: Option<SlotConfig>,
    pub dynamic_limit_applied: bool,
    pub locality_picks: usize,
    pub tie_swaps: usize,
    pub locality_degraded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SlotAllocator {
    dynamic: DynamicLimitParams,
    locality: LocalityParams,
}

impl SlotAllocator {
    pub fn new(dynamic: DynamicLimitParams, locality: LocalityParams) -> Self {
        Self { dynamic, locality }
    }

    /// Ratios actually used, and whether the dynamic review limit replaced
    /// the configured ones.
    pub fn effective_config(&self, config: &SlotConfig, pool: Option<PoolStats>) -> (SlotConfig, bool) {
        match pool {
            Some(stats)
                if self.dynamic.enabled
                    && stats.review_fraction() > self.dynamic.review_limit_ratio =>
            {
                let mut fallback = self.dynamic.fallback;
                fallback.locality_ratio = config.locality_ratio;
                (fallback, true)
            }
            _ => (*config, false),
        }
    }

    pub fn raw_counts(config: &SlotConfig, total_slots: usize) -> SlotCounts {
        let mut counts = SlotCounts::default();
        for category in Category::PRIORITY {
            let ratio = config.ratio(category).max(0.0);
            // tolerance keeps 10 * 0.3 from flooring to 2
            let slots = (total_slots as f64 * ratio + 1e-9).floor() as usize;
            counts.set(category, slots.min(total_slots));
        }
        counts
    }

    /// Clamps to availability, then hands every unassigned slot to the
    /// categories in priority order.
    pub fn distribute(raw: SlotCounts, available: SlotCounts, total_slots: usize) -> SlotCounts {
        let mut allocated = SlotCounts::default();
        let mut assigned = 0usize;
        for category in Category::PRIORITY {
            let room = total_slots.saturating_sub(assigned);
            let slots = raw.get(category).min(available.get(category)).min(room);
            allocated.set(category, slots);
            assigned += slots;
        }

        let mut surplus = total_slots.saturating_sub(assigned);
        for category in Category::PRIORITY {
            if surplus == 0 {
                break;
            }
            let current = allocated.get(category);
            let extra = available.get(category).saturating_sub(current).min(surplus);
            allocated.set(category, current + extra);
            surplus -= extra;
        }
        allocated
    }

    pub fn allocate(
        &self,
        items: Vec<PrioritizedItem>,
        config: &SlotConfig,
        total_slots: usize,
        pool: Option<PoolStats>,
        locality: Option<LocalityContext<'_>>,
    ) -> Allocation {
        let mut partitions = partition(items);
        for category in Category::PRIORITY {
            sort_by_priority(partitions.get_mut(category));
        }

        let (effective, dynamic_limit_applied) = self.effective_config(config, pool);
        if dynamic_limit_applied {
            tracing::debug!(
                review_fraction = pool.map(|p| p.review_fraction()).unwrap_or_default(),
                "dynamic review limit applied"
            );
        }

        let available = partitions.counts();
        let raw = Self::raw_counts(&effective, total_slots);
        let allocated = Self::distribute(raw, available, total_slots);

        let mut allocation = Allocation {
            available,
            raw,
            allocated,
            effective: Some(effective),
            dynamic_limit_applied,
            ..Default::default()
        };

        for category in Category::PRIORITY {
            let list = std::mem::take(partitions.get_mut(category));
            let selection = self.select(list, allocated.get(category), effective.locality_ratio, locality);
            allocation.locality_picks += selection.locality_picks;
            allocation.tie_swaps += selection.tie_swaps;
            allocation.locality_degraded |= selection.degraded;
            *allocation.lists.get_mut(category) = selection.items;
        }
        allocation
    }

    fn select(
        &self,
        list: Vec<PrioritizedItem>,
        slots: usize,
        locality_ratio: f64,
        locality: Option<LocalityContext<'_>>,
    ) -> Selection {
        let slots = slots.min(list.len());
        let ctx = match locality {
            Some(ctx) if slots > 0 && locality_ratio > 0.0 && !ctx.recent_words.is_empty() => ctx,
            _ => {
                return Selection {
                    items: list.into_iter().take(slots).collect(),
                    ..Default::default()
                }
            }
        };

        let mut degraded = false;
        let scored: Vec<(PrioritizedItem, u8)> = list
            .into_iter()
            .map(|item| {
                let strength = match ctx.provider.max_strength(item.word(), ctx.recent_words) {
                    Ok(s) => s,
                    Err(err) => {
                        if !degraded {
                            tracing::warn!(error = %err, "association lookup failed; locality skipped for word");
                        }
                        degraded = true;
                        0
                    }
                };
                (item, strength)
            })
            .collect();

        let locality_slots = ((slots as f64) * locality_ratio).floor() as usize;
        let reserved = slots - locality_slots.min(slots);

        let mut chosen = vec![false; scored.len()];
        for flag in chosen.iter_mut().take(reserved) {
            *flag = true;
        }
        let mut locality_picks = 0;
        for (index, (_, strength)) in scored.iter().enumerate().skip(reserved) {
            if locality_picks == slots - reserved {
                break;
            }
            if *strength >= self.locality.min_strength {
                chosen[index] = true;
                locality_picks += 1;
            }
        }
        let mut remaining = slots - reserved - locality_picks;
        for flag in chosen.iter_mut() {
            if remaining == 0 {
                break;
            }
            if !*flag {
                *flag = true;
                remaining -= 1;
            }
        }

        let mut selected: Vec<(PrioritizedItem, u8)> = scored
            .into_iter()
            .zip(chosen)
            .filter_map(|(entry, keep)| keep.then_some(entry))
            .collect();
        let tie_swaps = self.tie_break(&mut selected);

        Selection {
            items: selected.into_iter().map(|(item, _)| item).collect(),
            locality_picks,
            tie_swaps,
            degraded,
        }
    }

    /// Lets a near-equal item jump ahead of its neighbours when it is much
    /// more associated with the recent context. The jumper is never more
    /// than `tie_max_position_delta` below any item it overtakes.
    fn tie_break(&self, selected: &mut [(PrioritizedItem, u8)]) -> usize {
        let p = &self.locality;
        let mut swaps = 0;
        let len = selected.len();
        for i in 0..len {
            let (anchor_key, anchor_strength) = (selected[i].0.sort_key(), selected[i].1);
            let end = (i + p.tie_window).min(len.saturating_sub(1));
            let candidate = (i + 1..=end).find(|&j| {
                let (ref item, strength) = selected[j];
                anchor_key - item.sort_key() <= p.tie_max_position_delta
                    && strength >= p.tie_min_strength
                    && strength >= anchor_strength.saturating_add(p.tie_min_advantage)
            });
            if let Some(j) = candidate {
                selected[i..=j].rotate_right(1);
                swaps += 1;
            }
        }
        swaps
    }
}

#[derive(Debug, Default)]
struct Selection {
    items: Vec<PrioritizedItem>,
    locality_picks: usize,
    tie_swaps: usize,
    degraded: bool,
}

fn partition(items: Vec<PrioritizedItem>) -> CategoryLists {
    let mut lists = CategoryLists::default();
    for item in items {
        lists.get_mut(item.category).push(item);
    }
    lists
}

/// Descending sort key; equal keys keep their input order.
pub fn sort_by_priority(items: &mut [PrioritizedItem]) {
    items.sort_by(|a, b| b.sort_key().partial_cmp(&a.sort_key()).unwrap_or(Ordering::Equal));
}
