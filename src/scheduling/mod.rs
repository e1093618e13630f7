//! Question scheduling pipeline.
//!
//! Leaf to root: scoring (`position`), classification (`classifier`),
//! anti-vibration (`anti_vibration`), slot ratios (`slot_config`),
//! allocation (`allocator`), chain-learning reorder (`locality`),
//! interleaving (`interleave`), batch gating (`batch`) and the
//! orchestrating `Scheduler`.

pub mod allocator;
pub mod anti_vibration;
pub mod association;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod interleave;
pub mod invariants;
pub mod locality;
pub mod position;
pub mod recent;
pub mod reinsertion;
pub mod scheduler;
pub mod signals;
pub mod slot_config;
pub mod types;

pub use allocator::{Allocation, CategoryLists, PoolStats, SlotAllocator, SlotCounts};
pub use anti_vibration::RecencyPenalizer;
pub use association::{AssociationProvider, MetadataAssociations, NoAssociations, StaticAssociations};
pub use batch::{BatchGate, BatchPhase, BatchState, BatchStatus};
pub use classifier::CategoryClassifier;
pub use config::{InvariantPolicy, SchedulerConfig};
pub use diagnostics::Diagnostics;
pub use interleave::CategoryInterleaver;
pub use locality::LocalityReorderer;
pub use position::{HeuristicPosition, PositionStrategy, PriorityScorer, ScoreEngine};
pub use scheduler::Scheduler;
pub use signals::{RatioAdjustment, ScheduleContext, Signals};
pub use slot_config::{SlotConfig, SlotConfigTable};
#[allow(unused_imports)]
pub use types::*;
