//! Chain learning: inside narrow Position buckets, walk strongly associated
//! words next to each other.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::error::AssociationError;
use crate::scheduling::allocator::CategoryLists;
use crate::scheduling::association::AssociationProvider;
use crate::scheduling::config::LocalityParams;
use crate::scheduling::types::{Category, PrioritizedItem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderStats {
    pub buckets_reordered: usize,
    /// Buckets left alone because nothing in them is associated.
    pub buckets_unlinked: usize,
    /// Buckets left alone because a lookup failed.
    pub buckets_failed: usize,
}

impl ReorderStats {
    fn merge(&mut self, other: ReorderStats) {
        self.buckets_reordered += other.buckets_reordered;
        self.buckets_unlinked += other.buckets_unlinked;
        self.buckets_failed += other.buckets_failed;
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalityReorderer {
    params: LocalityParams,
}

impl LocalityReorderer {
    pub fn new(params: LocalityParams) -> Self {
        Self { params }
    }

    /// Bucket index for a Position; 100 shares the top bucket.
    pub fn bucket_of(&self, position: f64) -> usize {
        let width = if self.params.bucket_width > 0.0 {
            self.params.bucket_width
        } else {
            10.0
        };
        let last = ((100.0 / width).ceil() as usize).saturating_sub(1);
        ((position.max(0.0) / width).floor() as usize).min(last)
    }

    /// Reorders the first `reorder_limit` items of `items` in place. The
    /// items themselves never change, only their order inside a bucket.
    pub fn reorder(&self, items: &mut [PrioritizedItem], provider: &dyn AssociationProvider) -> ReorderStats {
        let limit = self.params.reorder_limit.min(items.len());
        let mut stats = ReorderStats::default();
        let mut start = 0;
        while start < limit {
            let bucket = self.bucket_of(items[start].position);
            let mut end = start + 1;
            while end < limit && self.bucket_of(items[end].position) == bucket {
                end += 1;
            }
            stats.merge(self.reorder_bucket(&mut items[start..end], provider));
            start = end;
        }
        stats
    }

    /// Applies `reorder` to the category lists in priority order, sharing one
    /// `reorder_limit` budget across them.
    pub fn reorder_lists(&self, lists: &mut CategoryLists, provider: &dyn AssociationProvider) -> ReorderStats {
        let mut budget = self.params.reorder_limit;
        let mut stats = ReorderStats::default();
        for category in Category::PRIORITY {
            if budget == 0 {
                break;
            }
            let list = lists.get_mut(category);
            let take = budget.min(list.len());
            let scoped = Self::new(LocalityParams {
                reorder_limit: take,
                ..self.params.clone()
            });
            stats.merge(scoped.reorder(list, provider));
            budget -= take;
        }
        stats
    }

    fn reorder_bucket(&self, bucket: &mut [PrioritizedItem], provider: &dyn AssociationProvider) -> ReorderStats {
        if bucket.len() <= 2 {
            return ReorderStats::default();
        }
        match chain_order(bucket, provider) {
            Ok(Some(order)) => {
                let original: Vec<PrioritizedItem> = bucket.to_vec();
                for (slot, index) in order.into_iter().enumerate() {
                    bucket[slot] = original[index].clone();
                }
                ReorderStats {
                    buckets_reordered: 1,
                    ..Default::default()
                }
            }
            Ok(None) => ReorderStats {
                buckets_unlinked: 1,
                ..Default::default()
            },
            Err(err) => {
                tracing::warn!(error = %err, size = bucket.len(), "association lookup failed; bucket order kept");
                ReorderStats {
                    buckets_failed: 1,
                    ..Default::default()
                }
            }
        }
    }
}

fn word_hash(word: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    word.hash(&mut hasher);
    hasher.finish()
}

/// Greedy nearest-neighbour path through the bucket. `None` when the bucket
/// carries no association at all.
fn chain_order(
    bucket: &[PrioritizedItem],
    provider: &dyn AssociationProvider,
) -> Result<Option<Vec<usize>>, AssociationError> {
    let n = bucket.len();
    let mut strength = vec![vec![0u8; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s = provider.strength(bucket[i].word(), bucket[j].word())?;
            strength[i][j] = s;
            strength[j][i] = s;
        }
    }

    let totals: Vec<u32> = strength
        .iter()
        .map(|row| row.iter().map(|s| u32::from(*s)).sum())
        .collect();
    if totals.iter().all(|t| *t == 0) {
        return Ok(None);
    }
    let hashes: Vec<u64> = bucket.iter().map(|item| word_hash(item.word())).collect();

    let Some(seed) = (0..n).max_by_key(|&i| (totals[i], hashes[i])) else {
        return Ok(None);
    };
    let mut used = vec![false; n];
    used[seed] = true;
    let mut order = Vec::with_capacity(n);
    order.push(seed);

    while order.len() < n {
        let tail = order[order.len() - 1];
        let Some(next) = (0..n)
            .filter(|&j| !used[j])
            .max_by_key(|&j| (strength[tail][j], hashes[j]))
        else {
            break;
        };
        used[next] = true;
        order.push(next);
    }
    Ok(Some(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::association::{NoAssociations, StaticAssociations};
    use crate::scheduling::types::Item;

    fn item(word: &str, position: f64) -> PrioritizedItem {
        PrioritizedItem {
            item: Item::new(word),
            position,
            category: Category::from_position(position),
            attempts: 2,
            consecutive_correct: 0,
            final_priority: None,
        }
    }

    fn words(items: &[PrioritizedItem]) -> Vec<&str> {
        items.iter().map(|i| i.word()).collect()
    }

    #[test]
    fn test_bucket_boundaries() {
        let reorderer = LocalityReorderer::default();
        assert_eq!(reorderer.bucket_of(100.0), 9);
        assert_eq!(reorderer.bucket_of(99.9), 9);
        assert_eq!(reorderer.bucket_of(70.0), 7);
        assert_eq!(reorderer.bucket_of(69.99), 6);
        assert_eq!(reorderer.bucket_of(0.0), 0);
    }

    #[test]
    fn test_unassociated_bucket_keeps_order() {
        let reorderer = LocalityReorderer::default();
        let mut items = vec![item("c", 65.0), item("a", 64.0), item("b", 63.0)];
        let stats = reorderer.reorder(&mut items, &NoAssociations);
        assert_eq!(words(&items), vec!["c", "a", "b"]);
        assert_eq!(stats.buckets_unlinked, 1);
        assert_eq!(stats.buckets_reordered, 0);
    }

    #[test]
    fn test_associated_words_end_up_adjacent() {
        let reorderer = LocalityReorderer::default();
        let mut items = vec![item("x", 66.0), item("cat", 65.0), item("y", 64.0), item("kitten", 63.0)];
        let assoc = StaticAssociations::new().with("cat", "kitten", 90);
        reorderer.reorder(&mut items, &assoc);
        let order = words(&items);
        let cat = order.iter().position(|w| *w == "cat").unwrap();
        let kitten = order.iter().position(|w| *w == "kitten").unwrap();
        assert_eq!(cat.abs_diff(kitten), 1, "order {order:?}");
    }

    #[test]
    fn test_buckets_do_not_mix() {
        let reorderer = LocalityReorderer::default();
        let mut items = vec![
            item("a", 68.0),
            item("b", 67.0),
            item("c", 66.0),
            item("d", 55.0),
            item("e", 54.0),
            item("f", 53.0),
        ];
        let assoc = StaticAssociations::new().with("a", "f", 100).with("b", "c", 80);
        reorderer.reorder(&mut items, &assoc);
        let head: Vec<&str> = words(&items[..3]);
        assert!(head.contains(&"a") && head.contains(&"b") && head.contains(&"c"));
        let tail: Vec<&str> = words(&items[3..]);
        assert_eq!(tail, vec!["d", "e", "f"]);
    }

    #[test]
    fn test_small_buckets_untouched() {
        let reorderer = LocalityReorderer::default();
        let mut items = vec![item("a", 65.0), item("b", 64.0)];
        let assoc = StaticAssociations::new().with("a", "b", 100);
        let stats = reorderer.reorder(&mut items, &assoc);
        assert_eq!(words(&items), vec!["a", "b"]);
        assert_eq!(stats, ReorderStats::default());
    }

    #[test]
    fn test_reorder_limit_leaves_tail_alone() {
        let reorderer = LocalityReorderer::new(LocalityParams {
            reorder_limit: 2,
            ..Default::default()
        });
        let mut items = vec![item("a", 65.0), item("b", 64.0), item("c", 63.0), item("d", 62.0)];
        let assoc = StaticAssociations::new().with("c", "d", 100).with("a", "d", 100);
        reorderer.reorder(&mut items, &assoc);
        assert_eq!(words(&items), vec!["a", "b", "c", "d"]);
    }

    struct Broken;

    impl AssociationProvider for Broken {
        fn strength(&self, a: &str, _b: &str) -> Result<u8, AssociationError> {
            Err(AssociationError::Lookup(a.to_string()))
        }
    }

    #[test]
    fn test_lookup_failure_keeps_bucket_order() {
        let reorderer = LocalityReorderer::default();
        let mut items = vec![item("c", 65.0), item("a", 64.0), item("b", 63.0)];
        let stats = reorderer.reorder(&mut items, &Broken);
        assert_eq!(words(&items), vec!["c", "a", "b"]);
        assert_eq!(stats.buckets_failed, 1);
    }

    #[test]
    fn test_reorder_lists_shares_budget() {
        let reorderer = LocalityReorderer::new(LocalityParams {
            reorder_limit: 3,
            ..Default::default()
        });
        let mut lists = CategoryLists {
            incorrect: vec![item("i1", 80.0), item("i2", 79.0), item("i3", 78.0)],
            still_learning: vec![item("s1", 60.0), item("s2", 59.0), item("s3", 58.0)],
            ..Default::default()
        };
        let assoc = StaticAssociations::new()
            .with("i1", "i3", 100)
            .with("s1", "s3", 100)
            .with("i2", "i3", 10);
        let stats = reorderer.reorder_lists(&mut lists, &assoc);
        assert_eq!(stats.buckets_reordered, 1);
        assert_eq!(words(&lists.still_learning), vec!["s1", "s2", "s3"]);
        assert_eq!(lists.incorrect.len(), 3);
    }
}
