use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const POSITION_MIN: f64 = 0.0;
pub const POSITION_MAX: f64 = 100.0;
/// Score returned for words with no progress record.
pub const NEUTRAL_POSITION: f64 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum LearningMode {
    #[default]
    Recognition,
    Recall,
    Listening,
    Spelling,
}

impl LearningMode {
    pub fn all() -> &'static [LearningMode] {
        &[
            LearningMode::Recognition,
            LearningMode::Recall,
            LearningMode::Listening,
            LearningMode::Spelling,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recognition => "recognition",
            Self::Recall => "recall",
            Self::Listening => "listening",
            Self::Spelling => "spelling",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "recall" => Self::Recall,
            "listening" => Self::Listening,
            "spelling" => Self::Spelling,
            _ => Self::Recognition,
        }
    }
}

impl std::fmt::Display for LearningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Mid,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Mid => "mid",
            Self::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "easy" => Self::Easy,
            "hard" => Self::Hard,
            _ => Self::Mid,
        }
    }
}

/// Priority class of a word. Each variant owns a fixed, non-overlapping
/// Position band; the category of a scored word is always the band its
/// Position falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Incorrect,
    StillLearning,
    New,
    Mastered,
}

impl Category {
    /// Redistribution and interleave priority order.
    pub const PRIORITY: [Category; 4] = [
        Category::Incorrect,
        Category::StillLearning,
        Category::New,
        Category::Mastered,
    ];

    pub fn from_position(position: f64) -> Self {
        if position >= 70.0 {
            Self::Incorrect
        } else if position >= 40.0 {
            Self::StillLearning
        } else if position >= 20.0 {
            Self::New
        } else {
            Self::Mastered
        }
    }

    /// Inclusive floor of the band.
    pub fn floor(&self) -> f64 {
        match self {
            Self::Incorrect => 70.0,
            Self::StillLearning => 40.0,
            Self::New => 20.0,
            Self::Mastered => 0.0,
        }
    }

    /// Exclusive ceiling of the band, except Incorrect which includes 100.
    pub fn ceiling(&self) -> f64 {
        match self {
            Self::Incorrect => POSITION_MAX,
            Self::StillLearning => 70.0,
            Self::New => 40.0,
            Self::Mastered => 20.0,
        }
    }

    pub fn contains(&self, position: f64) -> bool {
        Self::from_position(position) == *self
    }

    /// Moves `position` into this band, keeping it unchanged when it is
    /// already inside.
    pub fn clamp_into(&self, position: f64) -> f64 {
        if self.contains(position) {
            return position;
        }
        let top = match self {
            Self::Incorrect => POSITION_MAX,
            // largest f64 still inside a half-open band
            other => prev_float(other.ceiling()),
        };
        position.clamp(self.floor(), top)
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Incorrect => 0,
            Self::StillLearning => 1,
            Self::New => 2,
            Self::Mastered => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incorrect => "incorrect",
            Self::StillLearning => "still_learning",
            Self::New => "new",
            Self::Mastered => "mastered",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn prev_float(x: f64) -> f64 {
    f64::from_bits(x.to_bits() - 1)
}

/// A drillable word and its static metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub word: String,
    #[serde(default)]
    pub difficulty: DifficultyLevel,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reading: String,
    #[serde(default)]
    pub meaning: String,
}

impl Item {
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            difficulty: DifficultyLevel::default(),
            tags: Vec::new(),
            reading: String::new(),
            meaning: String::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_meaning(mut self, meaning: impl Into<String>) -> Self {
        self.meaning = meaning.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: DifficultyLevel) -> Self {
        self.difficulty = difficulty;
        self
    }
}

/// Learning progress for one (word, mode) pair, owned by the progress store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub word: String,
    pub mode: LearningMode,
    pub attempts: u32,
    pub correct: u32,
    pub consecutive_correct: u32,
    pub consecutive_incorrect: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_studied: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_ms: Option<u64>,
    /// Previously saved Position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_position: Option<f64>,
    /// Self-rated difficulty in [0,1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_difficulty: Option<f64>,
    /// Aggregate difficulty across learners in [0,1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_score: Option<f64>,
}

impl ProgressRecord {
    pub fn new(word: impl Into<String>, mode: LearningMode) -> Self {
        Self {
            word: word.into(),
            mode,
            attempts: 0,
            correct: 0,
            consecutive_correct: 0,
            consecutive_incorrect: 0,
            last_studied: None,
            last_correct: None,
            last_response_ms: None,
            saved_position: None,
            user_difficulty: None,
            difficulty_score: None,
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        (self.correct.min(self.attempts) as f64) / self.attempts as f64
    }

    pub fn incorrect(&self) -> u32 {
        self.attempts.saturating_sub(self.correct)
    }

    /// Applies one answer to the counters.
    pub fn apply_answer(&mut self, correct: bool, at: DateTime<Utc>) {
        self.attempts += 1;
        if correct {
            self.correct += 1;
            self.consecutive_correct += 1;
            self.consecutive_incorrect = 0;
        } else {
            self.consecutive_incorrect += 1;
            self.consecutive_correct = 0;
        }
        self.last_correct = Some(correct);
        self.last_studied = Some(at);
    }
}

/// A scored, classified word, built fresh for each scheduling call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedItem {
    pub item: Item,
    pub position: f64,
    pub category: Category,
    pub attempts: u32,
    pub consecutive_correct: u32,
    /// Ordering key from a `PriorityScorer`, applied after anti-vibration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_priority: Option<f64>,
}

impl PrioritizedItem {
    pub fn word(&self) -> &str {
        &self.item.word
    }

    /// Sort key: the external priority when present, else Position.
    pub fn sort_key(&self) -> f64 {
        self.final_priority.unwrap_or(self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentAnswer {
    pub word: String,
    pub correct: bool,
    pub answered_at: DateTime<Utc>,
    pub consecutive_correct: u32,
}

impl RecentAnswer {
    pub fn seconds_ago(&self, now: DateTime<Utc>) -> f64 {
        (now - self.answered_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Live statistics of the current drill session, supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub answered: u32,
    pub correct: u32,
    pub current_streak: u32,
    pub started_at: DateTime<Utc>,
}

impl SessionStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            answered: 0,
            correct: 0,
            current_streak: 0,
            started_at,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.answered == 0 {
            return 0.0;
        }
        self.answered.saturating_sub(self.correct) as f64 / self.answered as f64
    }

    pub fn duration_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_seconds().max(0) as f64 / 60.0
    }

    pub fn record(&mut self, correct: bool) {
        self.answered += 1;
        if correct {
            self.correct += 1;
            self.current_streak += 1;
        } else {
            self.current_streak = 0;
        }
    }
}

/// Per-call switches for `Scheduler::schedule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOptions {
    pub total_slots: usize,
    pub batch_gating: bool,
    pub locality: bool,
    pub reinsertion: bool,
    pub signals: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            total_slots: 20,
            batch_gating: false,
            locality: true,
            reinsertion: true,
            signals: true,
        }
    }
}
