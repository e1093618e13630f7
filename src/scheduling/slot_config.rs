use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scheduling::types::{Category, LearningMode};
use crate::store::keys::slot_config_key;
use crate::store::KeyValueStore;

/// Share of a batch handed to each category, plus the share of each
/// category's slots reserved for association-biased picks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotConfig {
    pub incorrect: f64,
    pub still_learning: f64,
    pub mastered: f64,
    #[serde(default)]
    pub new: Option<f64>,
    #[serde(default)]
    pub locality_ratio: f64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self::raw(0.3, 0.3, 0.1, 0.3, 0.25)
    }
}

impl SlotConfig {
    /// Builds a normalised config.
    pub fn new(incorrect: f64, still_learning: f64, mastered: f64, new: f64, locality_ratio: f64) -> Self {
        Self::raw(incorrect, still_learning, mastered, new, locality_ratio).normalized()
    }

    /// Builds a config as given, without normalisation.
    pub fn raw(
        incorrect: f64,
        still_learning: f64,
        mastered: f64,
        new: f64,
        locality_ratio: f64,
    ) -> Self {
        Self {
            incorrect,
            still_learning,
            mastered,
            new: Some(new),
            locality_ratio,
        }
    }

    /// New takes whatever the three review ratios leave over.
    pub fn with_remainder(incorrect: f64, still_learning: f64, mastered: f64, locality_ratio: f64) -> Self {
        Self {
            incorrect,
            still_learning,
            mastered,
            new: None,
            locality_ratio,
        }
        .normalized()
    }

    pub fn ratio(&self, category: Category) -> f64 {
        match category {
            Category::Incorrect => self.incorrect,
            Category::StillLearning => self.still_learning,
            Category::Mastered => self.mastered,
            Category::New => self
                .new
                .unwrap_or_else(|| (1.0 - self.incorrect - self.still_learning - self.mastered).max(0.0)),
        }
    }

    pub fn set_ratio(&mut self, category: Category, value: f64) {
        match category {
            Category::Incorrect => self.incorrect = value,
            Category::StillLearning => self.still_learning = value,
            Category::Mastered => self.mastered = value,
            Category::New => self.new = Some(value),
        }
    }

    pub fn total(&self) -> f64 {
        Category::PRIORITY.iter().map(|c| self.ratio(*c)).sum()
    }

    /// Clears negative or non-finite ratios, rescales the four category
    /// ratios to sum to 1 and clamps the locality ratio into [0,1]. A config
    /// with nothing left falls back to the default ratios.
    pub fn normalized(&self) -> Self {
        let sanitize = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        let mut out = Self {
            incorrect: sanitize(self.incorrect),
            still_learning: sanitize(self.still_learning),
            mastered: sanitize(self.mastered),
            new: None,
            locality_ratio: if self.locality_ratio.is_finite() {
                self.locality_ratio.clamp(0.0, 1.0)
            } else {
                0.0
            },
        };
        let new = match self.new {
            Some(v) => sanitize(v),
            None => (1.0 - out.incorrect - out.still_learning - out.mastered).max(0.0),
        };
        out.new = Some(new);

        let total = out.total();
        if total <= f64::EPSILON {
            let mut fallback = Self::default();
            fallback.locality_ratio = out.locality_ratio;
            return fallback;
        }
        for category in Category::PRIORITY {
            let value = out.ratio(category) / total;
            out.set_ratio(category, value);
        }
        out
    }

    pub fn is_normalized(&self) -> bool {
        (self.total() - 1.0).abs() < 1e-9
            && Category::PRIORITY.iter().all(|c| self.ratio(*c) >= 0.0)
            && (0.0..=1.0).contains(&self.locality_ratio)
    }
}

/// Per-mode slot configs; modes without an override use the default.
#[derive(Debug, Clone)]
pub struct SlotConfigTable {
    default: SlotConfig,
    overrides: HashMap<LearningMode, SlotConfig>,
}

impl Default for SlotConfigTable {
    fn default() -> Self {
        Self::new(SlotConfig::default())
    }
}

impl SlotConfigTable {
    pub fn new(default: SlotConfig) -> Self {
        Self {
            default: default.normalized(),
            overrides: HashMap::new(),
        }
    }

    pub fn get(&self, mode: LearningMode) -> SlotConfig {
        self.overrides.get(&mode).copied().unwrap_or(self.default)
    }

    pub fn set(&mut self, mode: LearningMode, config: SlotConfig) {
        self.overrides.insert(mode, config.normalized());
    }

    pub fn clear(&mut self, mode: LearningMode) {
        self.overrides.remove(&mode);
    }

    /// Loads the persisted override for `mode`, normalising it. Unreadable
    /// payloads are logged and ignored.
    pub async fn load<K: KeyValueStore>(&mut self, store: &K, mode: LearningMode) -> Result<SlotConfig, StoreError> {
        let key = slot_config_key(mode);
        if let Some(payload) = store.load(&key).await? {
            match serde_json::from_str::<SlotConfig>(&payload) {
                Ok(config) => {
                    let normalized = config.normalized();
                    if !config.is_normalized() {
                        tracing::debug!(%mode, "normalized persisted slot config");
                    }
                    self.overrides.insert(mode, normalized);
                }
                Err(err) => {
                    tracing::warn!(error = %err, %mode, "ignoring malformed slot config override");
                }
            }
        }
        Ok(self.get(mode))
    }

    pub async fn save<K: KeyValueStore>(&mut self, store: &K, mode: LearningMode, config: SlotConfig) -> Result<(), StoreError> {
        let normalized = config.normalized();
        let payload = serde_json::to_string(&normalized)?;
        store.save(&slot_config_key(mode), payload).await?;
        self.overrides.insert(mode, normalized);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyValueStore;

    #[test]
    fn test_normalizes_to_one() {
        let config = SlotConfig::new(2.0, 2.0, 1.0, 5.0, 0.3);
        assert!(config.is_normalized());
        assert!((config.ratio(Category::New) - 0.5).abs() < 1e-9);
        assert!((config.ratio(Category::Mastered) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_negative_ratios_are_zeroed() {
        let config = SlotConfig::new(-0.5, 0.5, 0.0, 0.5, 1.7);
        assert_eq!(config.incorrect, 0.0);
        assert!((config.still_learning - 0.5).abs() < 1e-9);
        assert_eq!(config.locality_ratio, 1.0);
        assert!(config.is_normalized());
    }

    #[test]
    fn test_new_is_remainder() {
        let config = SlotConfig::with_remainder(0.2, 0.2, 0.1, 0.0);
        assert!((config.ratio(Category::New) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_all_zero_falls_back_to_default() {
        let config = SlotConfig::new(0.0, 0.0, 0.0, 0.0, 0.4);
        assert!(config.is_normalized());
        assert_eq!(config.locality_ratio, 0.4);
        assert!((config.incorrect - SlotConfig::default().incorrect).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_table_loads_and_normalizes_override() {
        let store = MemoryKeyValueStore::new();
        store
            .save(
                &slot_config_key(LearningMode::Listening),
                r#"{"incorrect":1.0,"stillLearning":1.0,"mastered":0.0,"new":2.0,"localityRatio":0.1}"#.to_string(),
            )
            .await
            .unwrap();

        let mut table = SlotConfigTable::default();
        let config = table.load(&store, LearningMode::Listening).await.unwrap();
        assert!(config.is_normalized());
        assert!((config.ratio(Category::New) - 0.5).abs() < 1e-9);
        assert_eq!(table.get(LearningMode::Recall), SlotConfig::default().normalized());
    }

    #[tokio::test]
    async fn test_table_ignores_malformed_payload() {
        let store = MemoryKeyValueStore::new();
        store
            .save(&slot_config_key(LearningMode::Recall), "not json".to_string())
            .await
            .unwrap();
        let mut table = SlotConfigTable::default();
        let config = table.load(&store, LearningMode::Recall).await.unwrap();
        assert_eq!(config, SlotConfig::default().normalized());
    }
}
