//! Final output checks.
//!
//! Violations are defects in the scheduler itself. Under
//! `InvariantPolicy::Panic` they abort immediately; under `LogAndRecover`
//! they are logged at error level and the output is repaired to the closest
//! valid ordering.

use std::collections::HashSet;

use crate::error::InvariantViolation;
use crate::scheduling::allocator::CategoryLists;
use crate::scheduling::config::InvariantPolicy;
use crate::scheduling::types::{Category, PrioritizedItem};

pub fn banding_violations(lists: &CategoryLists) -> Vec<InvariantViolation> {
    let mut out = Vec::new();
    for category in Category::PRIORITY {
        for item in lists.get(category) {
            let banded = Category::from_position(item.position);
            if banded != category || item.category != category {
                out.push(InvariantViolation::Banding {
                    word: item.word().to_string(),
                    position: item.position,
                    slotted: category,
                    banded,
                });
            }
        }
    }
    out
}

pub fn output_violations(items: &[PrioritizedItem]) -> Vec<InvariantViolation> {
    let mut out = Vec::new();
    let mut seen: HashSet<&str> = HashSet::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        if index > 0 && items[index - 1].word() == item.word() {
            out.push(InvariantViolation::AdjacentRepeat {
                word: item.word().to_string(),
                index: index - 1,
            });
        } else if !seen.insert(item.word()) {
            out.push(InvariantViolation::Duplicate {
                word: item.word().to_string(),
                index,
            });
        }
    }
    out
}

/// Keeps the first occurrence of every word.
pub fn dedupe(items: Vec<PrioritizedItem>) -> Vec<PrioritizedItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.word().to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantGuard {
    policy: InvariantPolicy,
}

impl InvariantGuard {
    pub fn new(policy: InvariantPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> InvariantPolicy {
        self.policy
    }

    fn report(&self, violations: &[InvariantViolation]) {
        if violations.is_empty() {
            return;
        }
        match self.policy {
            InvariantPolicy::Panic => panic!("scheduler invariant violated: {}", violations[0]),
            InvariantPolicy::LogAndRecover => {
                for violation in violations {
                    tracing::error!(%violation, "scheduler invariant violated; recovering");
                }
            }
        }
    }

    /// Checks that every slotted item sits in its list's band, moving any
    /// stray Position back into the band it was slotted for.
    pub fn enforce_banding(&self, lists: &mut CategoryLists) -> usize {
        let violations = banding_violations(lists);
        self.report(&violations);
        if violations.is_empty() {
            return 0;
        }
        for category in Category::PRIORITY {
            for item in lists.get_mut(category).iter_mut() {
                item.category = category;
                item.position = category.clamp_into(item.position);
            }
        }
        violations.len()
    }

    /// Checks the final sequence for repeated words, dropping later copies.
    pub fn enforce_output(&self, items: Vec<PrioritizedItem>) -> (Vec<PrioritizedItem>, usize) {
        let violations = output_violations(&items);
        self.report(&violations);
        if violations.is_empty() {
            return (items, 0);
        }
        (dedupe(items), violations.len())
    }
}
