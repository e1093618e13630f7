use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduling::config::SignalParams;
use crate::scheduling::slot_config::SlotConfig;
use crate::scheduling::types::{Category, RecentAnswer, SessionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum TimeOfDay {
    #[default]
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=21 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

/// Read-only inputs derived once per scheduling call.
#[derive(Debug, Clone)]
pub struct ScheduleContext {
    pub time_of_day: TimeOfDay,
    /// 0-1 blend of session error rate and session length.
    pub cognitive_load: f64,
    pub session_minutes: f64,
    pub stats: SessionStats,
    pub recent: Vec<RecentAnswer>,
}

impl ScheduleContext {
    pub fn build(stats: SessionStats, recent: Vec<RecentAnswer>, now: DateTime<Utc>, params: &SignalParams) -> Self {
        let session_minutes = stats.duration_minutes(now);
        let cap = params.duration_cap_minutes.max(f64::EPSILON);
        let load = params.error_weight * stats.error_rate() + params.duration_weight * (session_minutes / cap).min(1.0);
        Self {
            time_of_day: TimeOfDay::from_hour(now.hour()),
            cognitive_load: load.clamp(0.0, 1.0),
            session_minutes,
            stats,
            recent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signals {
    pub fatigue: bool,
    pub struggling: bool,
    pub overlearning: bool,
}

impl Signals {
    pub fn detect(ctx: &ScheduleContext, params: &SignalParams) -> Self {
        let stats = &ctx.stats;
        Self {
            fatigue: ctx.cognitive_load >= params.fatigue_load || ctx.session_minutes >= params.fatigue_minutes,
            struggling: stats.answered >= params.struggling_min_answers
                && stats.error_rate() >= params.struggling_error_rate,
            overlearning: stats.current_streak >= params.overlearning_streak,
        }
    }

    pub fn adjustment(&self) -> RatioAdjustment {
        if self.fatigue || self.struggling {
            RatioAdjustment::Easier
        } else if self.overlearning {
            RatioAdjustment::Harder
        } else {
            RatioAdjustment::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum RatioAdjustment {
    #[default]
    None,
    /// Less new material, more familiar review.
    Easier,
    /// More new material, less mastered review.
    Harder,
}

impl RatioAdjustment {
    /// Shifts ratio mass between categories and renormalises. Only the
    /// ratios change; Positions and bands are untouched.
    pub fn apply(&self, config: &SlotConfig, params: &SignalParams) -> SlotConfig {
        let mut adjusted = *config;
        match self {
            Self::None => return adjusted,
            Self::Easier => {
                let new = config.ratio(Category::New);
                let moved = params.easier_shift.min(new).max(0.0);
                adjusted.set_ratio(Category::New, new - moved);
                adjusted.set_ratio(Category::StillLearning, config.still_learning + moved / 2.0);
                adjusted.set_ratio(Category::Mastered, config.mastered + moved / 2.0);
            }
            Self::Harder => {
                let moved = params.harder_shift.min(config.mastered).max(0.0);
                adjusted.set_ratio(Category::Mastered, config.mastered - moved);
                adjusted.set_ratio(Category::New, config.ratio(Category::New) + moved);
            }
        }
        adjusted.normalized()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Easier => "easier",
            Self::Harder => "harder",
        }
    }
}
