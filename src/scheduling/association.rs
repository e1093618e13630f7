//! Association strength between two words, 0-100.
//!
//! Used by the allocator's locality slots and the chain-learning reorder.
//! Lookups may fail; callers treat a failure as "no locality here".

use std::collections::{HashMap, HashSet};

use crate::error::AssociationError;
use crate::scheduling::types::Item;

pub trait AssociationProvider: Send + Sync {
    fn strength(&self, a: &str, b: &str) -> Result<u8, AssociationError>;

    /// Strongest association between `word` and any of `context`.
    fn max_strength(&self, word: &str, context: &[String]) -> Result<u8, AssociationError> {
        let mut best = 0u8;
        for other in context {
            if other == word {
                continue;
            }
            best = best.max(self.strength(word, other)?);
        }
        Ok(best)
    }
}

/// Provider with no associations at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssociations;

impl AssociationProvider for NoAssociations {
    fn strength(&self, _a: &str, _b: &str) -> Result<u8, AssociationError> {
        Ok(0)
    }
}

/// Explicit pair table. Lookups are symmetric: the stronger of the two
/// directions wins.
#[derive(Debug, Clone, Default)]
pub struct StaticAssociations {
    pairs: HashMap<(String, String), u8>,
}

impl StaticAssociations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, a: impl Into<String>, b: impl Into<String>, strength: u8) {
        self.pairs.insert((a.into(), b.into()), strength.min(100));
    }

    pub fn with(mut self, a: impl Into<String>, b: impl Into<String>, strength: u8) -> Self {
        self.insert(a, b, strength);
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl AssociationProvider for StaticAssociations {
    fn strength(&self, a: &str, b: &str) -> Result<u8, AssociationError> {
        let forward = self.pairs.get(&(a.to_string(), b.to_string())).copied().unwrap_or(0);
        let backward = self.pairs.get(&(b.to_string(), a.to_string())).copied().unwrap_or(0);
        Ok(forward.max(backward))
    }
}

#[derive(Debug, Clone)]
struct Profile {
    tags: HashSet<String>,
    meaning_tokens: HashSet<String>,
    chars: Vec<char>,
}

/// Associations derived from item metadata: shared topic tags, shared
/// meaning tokens and shared leading characters.
#[derive(Debug, Clone, Default)]
pub struct MetadataAssociations {
    profiles: HashMap<String, Profile>,
}

impl MetadataAssociations {
    pub fn from_items(items: &[Item]) -> Self {
        let profiles = items
            .iter()
            .map(|item| {
                let tags = item.tags.iter().map(|t| t.to_lowercase()).collect();
                let meaning_tokens = item
                    .meaning
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| t.chars().count() > 2)
                    .map(|t| t.to_lowercase())
                    .collect();
                let chars = item.word.chars().collect();
                (
                    item.word.clone(),
                    Profile {
                        tags,
                        meaning_tokens,
                        chars,
                    },
                )
            })
            .collect();
        Self { profiles }
    }

    fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let shared = a.intersection(b).count() as f64;
        let union = a.union(b).count() as f64;
        shared / union
    }

    fn shared_prefix(a: &[char], b: &[char]) -> f64 {
        let shorter = a.len().min(b.len());
        if shorter == 0 {
            return 0.0;
        }
        let common = a.iter().zip(b).take_while(|(x, y)| x == y).count();
        common as f64 / shorter as f64
    }
}

impl AssociationProvider for MetadataAssociations {
    fn strength(&self, a: &str, b: &str) -> Result<u8, AssociationError> {
        let pa = self
            .profiles
            .get(a)
            .ok_or_else(|| AssociationError::UnknownWord(a.to_string()))?;
        let pb = self
            .profiles
            .get(b)
            .ok_or_else(|| AssociationError::UnknownWord(b.to_string()))?;
        if a == b {
            return Ok(100);
        }

        let tag = Self::jaccard(&pa.tags, &pb.tags);
        let meaning = Self::jaccard(&pa.meaning_tokens, &pb.meaning_tokens);
        let prefix = Self::shared_prefix(&pa.chars, &pb.chars);
        let score = (tag * 100.0).max(meaning * 90.0).max(prefix * 80.0);
        Ok(score.round().clamp(0.0, 100.0) as u8)
    }
}
