use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduling::slot_config::SlotConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreParams {
    /// Auto-promotion: a cached StillLearning score is recomputed once the
    /// word has at least this many attempts...
    pub promote_min_attempts: u32,
    /// ...this many correct answers...
    pub promote_min_correct: u32,
    /// ...and a current correct streak of at least this length.
    pub promote_min_streak: u32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            promote_min_attempts: 3,
            promote_min_correct: 3,
            promote_min_streak: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierParams {
    /// Below this many attempts the accuracy ratio is not trusted and the
    /// streak heuristics decide. Must exceed `mastered_streak`, otherwise a
    /// streak long enough for Mastered never takes the streak path.
    pub min_attempts_for_ratio: u32,
    pub mastered_streak: u32,
    pub mastered_to_incorrect_min_misses: u32,
    pub new_to_mastered_min_attempts: u32,
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            min_attempts_for_ratio: 5,
            mastered_streak: 3,
            mastered_to_incorrect_min_misses: 2,
            new_to_mastered_min_attempts: 3,
            cache_ttl: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiVibrationParams {
    pub severe_window_secs: f64,
    pub min_interval_secs: f64,
    /// The moderate window is `min_interval_secs * moderate_window_factor`.
    pub moderate_window_factor: f64,
    pub consecutive_threshold: u32,
    pub severe_penalty: f64,
    pub large_penalty: f64,
    pub moderate_penalty: f64,
    pub streak_penalty: f64,
}

impl Default for AntiVibrationParams {
    fn default() -> Self {
        Self {
            severe_window_secs: 30.0,
            min_interval_secs: 60.0,
            moderate_window_factor: 5.0,
            consecutive_threshold: 3,
            severe_penalty: 100.0,
            large_penalty: 5.0,
            moderate_penalty: 2.0,
            streak_penalty: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicLimitParams {
    pub enabled: bool,
    /// Share of the whole progress pool in Incorrect + StillLearning above
    /// which the fallback ratios replace the configured ones.
    pub review_limit_ratio: f64,
    pub fallback: SlotConfig,
}

impl Default for DynamicLimitParams {
    fn default() -> Self {
        Self {
            enabled: true,
            review_limit_ratio: 0.2,
            // Sums to 0.8; the remainder is handed out by surplus
            // redistribution.
            fallback: SlotConfig::raw(0.2, 0.2, 0.1, 0.3, 0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalityParams {
    /// Association needed for a word to take a locality slot.
    pub min_strength: u8,
    pub tie_window: usize,
    pub tie_max_position_delta: f64,
    pub tie_min_strength: u8,
    /// Extra association an item needs over the one it overtakes.
    pub tie_min_advantage: u8,
    /// Number of recently answered words forming the association context.
    pub context_words: usize,
    pub bucket_width: f64,
    pub reorder_limit: usize,
}

impl Default for LocalityParams {
    fn default() -> Self {
        Self {
            min_strength: 50,
            tie_window: 8,
            tie_max_position_delta: 3.0,
            tie_min_strength: 70,
            tie_min_advantage: 20,
            context_words: 5,
            bucket_width: 10.0,
            reorder_limit: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterleaveWeights {
    pub incorrect: usize,
    pub still_learning: usize,
    pub new: usize,
    pub mastered: usize,
}

impl Default for InterleaveWeights {
    fn default() -> Self {
        Self {
            incorrect: 2,
            still_learning: 2,
            new: 1,
            mastered: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinsertionParams {
    /// Relative weights for delays 2, 3, 4 and 5.
    pub delay_weights: [u32; 4],
    /// A miss older than this no longer triggers reinsertion.
    pub miss_window_secs: f64,
}

impl Default for ReinsertionParams {
    fn default() -> Self {
        Self {
            delay_weights: [4, 3, 2, 1],
            miss_window_secs: 120.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalParams {
    pub error_weight: f64,
    pub duration_weight: f64,
    pub duration_cap_minutes: f64,
    pub fatigue_load: f64,
    pub fatigue_minutes: f64,
    pub struggling_error_rate: f64,
    pub struggling_min_answers: u32,
    pub overlearning_streak: u32,
    pub easier_shift: f64,
    pub harder_shift: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            error_weight: 0.6,
            duration_weight: 0.4,
            duration_cap_minutes: 45.0,
            fatigue_load: 0.7,
            fatigue_minutes: 40.0,
            struggling_error_rate: 0.4,
            struggling_min_answers: 5,
            overlearning_streak: 8,
            easier_shift: 0.1,
            harder_shift: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDefaults {
    pub batch_size: usize,
    pub clear_threshold: f64,
    /// Position below which an active word counts as cleared.
    pub cleared_below: f64,
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self {
            batch_size: 100,
            clear_threshold: 0.7,
            cleared_below: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentCacheParams {
    pub capacity: usize,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
}

impl Default for RecentCacheParams {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantPolicy {
    Panic,
    LogAndRecover,
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::LogAndRecover
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub score: ScoreParams,
    pub classifier: ClassifierParams,
    pub anti_vibration: AntiVibrationParams,
    pub dynamic_limit: DynamicLimitParams,
    pub locality: LocalityParams,
    pub interleave: InterleaveWeights,
    pub reinsertion: ReinsertionParams,
    pub signals: SignalParams,
    pub batch: BatchDefaults,
    pub recent_cache: RecentCacheParams,
    pub invariant_policy: InvariantPolicy,
    pub vibration_top_n: usize,
    pub rng_seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            score: ScoreParams::default(),
            classifier: ClassifierParams::default(),
            anti_vibration: AntiVibrationParams::default(),
            dynamic_limit: DynamicLimitParams::default(),
            locality: LocalityParams::default(),
            interleave: InterleaveWeights::default(),
            reinsertion: ReinsertionParams::default(),
            signals: SignalParams::default(),
            batch: BatchDefaults::default(),
            recent_cache: RecentCacheParams::default(),
            invariant_policy: InvariantPolicy::default(),
            vibration_top_n: 10,
            rng_seed: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<f64>("SCHEDULER_MIN_INTERVAL_SECS") {
            config.anti_vibration.min_interval_secs = val.max(0.0);
        }
        if let Some(val) = env_parse::<u32>("SCHEDULER_CONSECUTIVE_THRESHOLD") {
            config.anti_vibration.consecutive_threshold = val;
        }
        if let Some(val) = env_parse::<bool>("SCHEDULER_DYNAMIC_LIMIT_ENABLED") {
            config.dynamic_limit.enabled = val;
        }
        if let Some(val) = env_parse::<f64>("SCHEDULER_REVIEW_LIMIT_RATIO") {
            config.dynamic_limit.review_limit_ratio = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_parse::<usize>("SCHEDULER_BATCH_SIZE") {
            config.batch.batch_size = val.max(1);
        }
        if let Some(val) = env_parse::<f64>("SCHEDULER_CLEAR_THRESHOLD") {
            config.batch.clear_threshold = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_parse::<u32>("SCHEDULER_MIN_ATTEMPTS") {
            config.classifier.min_attempts_for_ratio = val;
        }
        if let Some(val) = env_parse::<u64>("SCHEDULER_RNG_SEED") {
            config.rng_seed = Some(val);
        }
        if let Ok(val) = std::env::var("SCHEDULER_INVARIANT_POLICY") {
            config.invariant_policy = match val.to_lowercase().as_str() {
                "panic" => InvariantPolicy::Panic,
                "recover" | "log" | "log_and_recover" => InvariantPolicy::LogAndRecover,
                _ => config.invariant_policy,
            };
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = SchedulerConfig::default();
        assert_eq!(config.anti_vibration.min_interval_secs, 60.0);
        assert_eq!(config.anti_vibration.consecutive_threshold, 3);
        assert_eq!(config.locality.tie_window, 8);
        assert_eq!(config.locality.tie_min_strength, 70);
        assert_eq!(config.recent_cache.capacity, 100);
        assert!((config.dynamic_limit.review_limit_ratio - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_config_serde_roundtrip_keeps_durations() {
        let config = SchedulerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SchedulerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.classifier.cache_ttl, config.classifier.cache_ttl);
        assert_eq!(back.recent_cache.ttl, config.recent_cache.ttl);
    }
}
