//! Merges the four category lists into one sequence.

use std::collections::{HashSet, VecDeque};

use crate::scheduling::allocator::CategoryLists;
use crate::scheduling::config::InterleaveWeights;
use crate::scheduling::types::{Category, PrioritizedItem};

#[derive(Debug, Clone, Default)]
pub struct CategoryInterleaver {
    weights: InterleaveWeights,
}

impl CategoryInterleaver {
    pub fn new(weights: InterleaveWeights) -> Self {
        Self { weights }
    }

    fn weight(&self, category: Category) -> usize {
        let w = match category {
            Category::Incorrect => self.weights.incorrect,
            Category::StillLearning => self.weights.still_learning,
            Category::New => self.weights.new,
            Category::Mastered => self.weights.mastered,
        };
        w.max(1)
    }

    /// Weighted round-robin in priority order. Each list keeps its internal
    /// order; a word already emitted is skipped.
    pub fn interleave(&self, lists: &CategoryLists) -> Vec<PrioritizedItem> {
        let mut queues: Vec<(Category, VecDeque<&PrioritizedItem>)> = Category::PRIORITY
            .iter()
            .map(|c| (*c, lists.get(*c).iter().collect()))
            .collect();
        let mut seen: HashSet<&str> = HashSet::with_capacity(lists.len());
        let mut out = Vec::with_capacity(lists.len());

        while queues.iter().any(|(_, q)| !q.is_empty()) {
            for (category, queue) in queues.iter_mut() {
                let mut taken = 0;
                while taken < self.weight(*category) {
                    let Some(item) = queue.pop_front() else {
                        break;
                    };
                    if seen.insert(item.word()) {
                        out.push(item.clone());
                        taken += 1;
                    }
                }
            }
        }
        out
    }
}

fn head_char(item: &PrioritizedItem) -> Option<char> {
    item.word().chars().next()
}

/// Splits runs of words sharing a first character by pulling forward the
/// nearest later word that starts differently. Returns the number of moves.
pub fn diversify_heads(items: &mut Vec<PrioritizedItem>) -> usize {
    let mut moves = 0;
    for i in 1..items.len() {
        let previous = head_char(&items[i - 1]);
        if previous.is_none() || head_char(&items[i]) != previous {
            continue;
        }
        if let Some(offset) = items[i + 1..].iter().position(|item| head_char(item) != previous) {
            let moved = items.remove(i + 1 + offset);
            items.insert(i, moved);
            moves += 1;
        }
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::types::Item;

    fn item(word: &str, position: f64) -> PrioritizedItem {
        PrioritizedItem {
            item: Item::new(word),
            position,
            category: Category::from_position(position),
            attempts: 1,
            consecutive_correct: 0,
            final_priority: None,
        }
    }

    fn words(items: &[PrioritizedItem]) -> Vec<&str> {
        items.iter().map(|i| i.word()).collect()
    }

    #[test]
    fn test_weighted_round_robin() {
        let lists = CategoryLists {
            incorrect: vec![item("i1", 90.0), item("i2", 85.0), item("i3", 80.0)],
            still_learning: vec![item("s1", 60.0)],
            new: vec![item("n1", 35.0), item("n2", 30.0)],
            mastered: vec![item("m1", 10.0)],
        };
        let out = CategoryInterleaver::default().interleave(&lists);
        assert_eq!(words(&out), vec!["i1", "i2", "s1", "n1", "m1", "i3", "n2"]);
    }

    #[test]
    fn test_interleave_keeps_list_order_and_membership() {
        let lists = CategoryLists {
            incorrect: vec![item("b", 75.0), item("a", 90.0)],
            new: vec![item("z", 25.0), item("y", 38.0)],
            ..Default::default()
        };
        let out = CategoryInterleaver::default().interleave(&lists);
        let incorrect: Vec<&str> = out
            .iter()
            .filter(|i| i.category == Category::Incorrect)
            .map(|i| i.word())
            .collect();
        assert_eq!(incorrect, vec!["b", "a"]);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_interleave_skips_duplicates() {
        let lists = CategoryLists {
            incorrect: vec![item("dup", 90.0)],
            still_learning: vec![item("dup", 50.0), item("s", 45.0)],
            ..Default::default()
        };
        let out = CategoryInterleaver::default().interleave(&lists);
        assert_eq!(words(&out), vec!["dup", "s"]);
    }

    #[test]
    fn test_empty_lists() {
        let out = CategoryInterleaver::default().interleave(&CategoryLists::default());
        assert!(out.is_empty());
    }

    #[test]
    fn test_diversify_heads_splits_runs() {
        let mut items = vec![
            item("電車", 35.0),
            item("電話", 34.0),
            item("山", 33.0),
            item("川", 32.0),
        ];
        let moves = diversify_heads(&mut items);
        assert_eq!(moves, 1);
        assert_eq!(words(&items), vec!["電車", "山", "電話", "川"]);
    }

    #[test]
    fn test_diversify_heads_without_alternative() {
        let mut items = vec![item("aa", 30.0), item("ab", 29.0), item("ac", 28.0)];
        assert_eq!(diversify_heads(&mut items), 0);
        assert_eq!(words(&items), vec!["aa", "ab", "ac"]);
    }
}
