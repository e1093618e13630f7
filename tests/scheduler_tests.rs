//! End-to-end tests for `Scheduler` against the in-memory stores.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use drill_scheduler::scheduling::{
    BatchPhase, BatchState, Category, InvariantPolicy, Item, LearningMode, ProgressRecord, RatioAdjustment,
    ScheduleOptions, Scheduler, SchedulerConfig, SessionStats, SlotConfig, StaticAssociations,
};
use drill_scheduler::store::keys::batch_state_key;
use drill_scheduler::store::{InMemoryProgressStore, JsonFileStore, KeyValueStore, MemoryKeyValueStore};

type MemScheduler = Scheduler<InMemoryProgressStore, MemoryKeyValueStore>;

const MODE: LearningMode = LearningMode::Recall;

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        rng_seed: Some(42),
        invariant_policy: InvariantPolicy::Panic,
        ..Default::default()
    }
}

fn scheduler_with(store: InMemoryProgressStore, config: SchedulerConfig) -> MemScheduler {
    Scheduler::new(Arc::new(store), Arc::new(MemoryKeyValueStore::new()), config)
}

fn words(prefix: &str, n: usize) -> Vec<Item> {
    (0..n).map(|i| Item::new(format!("{prefix}{i:03}"))).collect()
}

fn record(word: &str, attempts: u32, correct: u32, streak: u32, misses: u32, saved: f64) -> ProgressRecord {
    let mut r = ProgressRecord::new(word, MODE);
    r.attempts = attempts;
    r.correct = correct;
    r.consecutive_correct = streak;
    r.consecutive_incorrect = misses;
    r.saved_position = Some(saved);
    r.last_studied = Some(fixed_now() - Duration::days(2));
    r.last_correct = Some(misses == 0);
    r
}

fn assert_well_formed(out: &[Item]) {
    let mut seen = HashSet::new();
    for (i, item) in out.iter().enumerate() {
        assert!(seen.insert(item.word.as_str()), "duplicate {} at {i}", item.word);
        if i > 0 {
            assert_ne!(out[i - 1].word, item.word, "adjacent repeat at {i}");
        }
    }
}

#[tokio::test]
async fn test_empty_pool_returns_empty_sequence() {
    let mut scheduler = scheduler_with(InMemoryProgressStore::new(), test_config());
    let now = fixed_now();
    let out = scheduler
        .schedule(&[], MODE, &SessionStats::new(now), &ScheduleOptions::default(), now)
        .await
        .expect("empty pool is not an error");
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_mixed_pool_session_stays_well_formed() {
    let items = words("w", 40);
    let store = InMemoryProgressStore::new();
    for (i, item) in items.iter().enumerate() {
        let r = match i % 4 {
            0 => record(&item.word, 6, 2, 0, 2, 85.0),
            1 => record(&item.word, 5, 3, 1, 0, 55.0),
            2 => record(&item.word, 8, 8, 6, 0, 8.0),
            _ => continue,
        };
        store.insert(r);
    }
    let mut scheduler = scheduler_with(store, test_config());
    let mut stats = SessionStats::new(fixed_now());
    let options = ScheduleOptions {
        total_slots: 12,
        ..Default::default()
    };

    for round in 0..15 {
        let now = fixed_now() + Duration::seconds(15 * round);
        let out = scheduler.schedule(&items, MODE, &stats, &options, now).await.unwrap();
        assert!(!out.is_empty());
        assert!(out.len() <= options.total_slots);
        assert_well_formed(&out);

        let diag = scheduler.diagnostics().unwrap();
        assert_eq!(diag.invariant_violations, 0);
        assert!((0.0..=100.0).contains(&diag.vibration_score));
        for category in Category::PRIORITY {
            assert!(diag.allocated.get(category) <= diag.available.get(category));
        }

        let correct = round % 3 != 0;
        scheduler
            .record_answer(&out[0].word, correct, 1500, MODE, now)
            .await
            .unwrap();
        stats.record(correct);
    }
}

#[tokio::test]
async fn test_just_answered_word_does_not_lead_next_batch() {
    let items = words("w", 8);
    let store = InMemoryProgressStore::new();
    for item in &items[..4] {
        store.insert(record(&item.word, 6, 1, 0, 3, 90.0));
    }
    let mut scheduler = scheduler_with(store, test_config());
    let now = fixed_now();
    let stats = SessionStats::new(now);
    let options = ScheduleOptions {
        reinsertion: false,
        ..Default::default()
    };

    let first = scheduler.schedule(&items, MODE, &stats, &options, now).await.unwrap();
    let head = first[0].word.clone();
    scheduler.record_answer(&head, true, 800, MODE, now).await.unwrap();

    let later = now + Duration::seconds(5);
    let second = scheduler.schedule(&items, MODE, &stats, &options, later).await.unwrap();
    assert_ne!(second[0].word, head);
}

#[tokio::test]
async fn test_missed_head_is_reinserted_after_a_few_items() {
    let items = words("w", 6);
    let mut scheduler = scheduler_with(InMemoryProgressStore::new(), test_config());
    let now = fixed_now();
    let missed = items[0].word.clone();
    scheduler
        .record_answer(&missed, false, 2000, MODE, now - Duration::seconds(5))
        .await
        .unwrap();

    let out = scheduler
        .schedule(&items, MODE, &SessionStats::new(now), &ScheduleOptions::default(), now)
        .await
        .unwrap();
    assert_well_formed(&out);
    assert_ne!(out[0].word, missed);
    let index = out.iter().position(|i| i.word == missed).expect("missed word still scheduled");
    assert!((2..=5).contains(&index), "reinserted at {index}");
    assert_eq!(scheduler.pending_reinsertions(), 1);
    assert_eq!(scheduler.diagnostics().unwrap().reinsertion_pulled, 1);

    // answering it drops the pending entry
    scheduler
        .record_answer(&missed, true, 900, MODE, now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(scheduler.pending_reinsertions(), 0);
}

#[tokio::test]
async fn test_batch_gating_unlocks_next_chunk() {
    let items = words("b", 250);
    let mut config = test_config();
    config.batch.batch_size = 100;
    config.batch.clear_threshold = 0.7;
    let mut scheduler = scheduler_with(InMemoryProgressStore::new(), config);
    let now = fixed_now();
    let stats = SessionStats::new(now);
    let options = ScheduleOptions {
        batch_gating: true,
        ..Default::default()
    };

    let first = scheduler.schedule(&items, MODE, &stats, &options, now).await.unwrap();
    let first_batch: HashSet<&str> = items[..100].iter().map(|i| i.word.as_str()).collect();
    assert!(first.iter().all(|i| first_batch.contains(i.word.as_str())));
    let status = scheduler.diagnostics().unwrap().batch.clone().unwrap();
    assert_eq!(status.active, 100);
    assert_eq!(status.batch_index, 1);
    assert!(!status.can_advance);

    for item in &items[..70] {
        scheduler
            .store()
            .insert(record(&item.word, 6, 6, 6, 0, 5.0));
    }
    scheduler.schedule(&items, MODE, &stats, &options, now).await.unwrap();
    let status = scheduler.diagnostics().unwrap().batch.clone().unwrap();
    assert_eq!(status.batch_index, 2);
    assert_eq!(status.active, 130);
    assert_eq!(status.phase, BatchPhase::Active);
    assert_eq!(scheduler.diagnostics().unwrap().eligible, 130);

    scheduler.reset_batches(MODE).await.unwrap();
    assert!(scheduler.batch_status(MODE, now).await.unwrap().is_none());
}

#[tokio::test]
async fn test_review_heavy_pool_triggers_dynamic_limit() {
    let items = words("r", 20);
    let store = InMemoryProgressStore::new();
    for item in &items[..10] {
        store.insert(record(&item.word, 6, 2, 0, 2, 80.0));
    }
    let mut scheduler = scheduler_with(store, test_config());
    let now = fixed_now();
    let options = ScheduleOptions {
        total_slots: 10,
        reinsertion: false,
        ..Default::default()
    };
    let out = scheduler
        .schedule(&items, MODE, &SessionStats::new(now), &options, now)
        .await
        .unwrap();
    assert_eq!(out.len(), 10);
    let diag = scheduler.diagnostics().unwrap();
    assert!(diag.dynamic_limit_applied);
    assert_eq!(diag.allocated.total(), 10);
}

#[tokio::test]
async fn test_struggling_session_shifts_ratios_easier() {
    let items = words("s", 10);
    let mut scheduler = scheduler_with(InMemoryProgressStore::new(), test_config());
    let now = fixed_now();
    let stats = SessionStats {
        answered: 10,
        correct: 4,
        current_streak: 0,
        started_at: now - Duration::minutes(5),
    };
    scheduler
        .schedule(&items, MODE, &stats, &ScheduleOptions::default(), now)
        .await
        .unwrap();
    let diag = scheduler.diagnostics().unwrap();
    assert!(diag.signals.struggling);
    assert_eq!(diag.adjustment, RatioAdjustment::Easier);
}

#[tokio::test]
async fn test_slot_override_persists_across_schedulers() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
    let override_config = SlotConfig::new(0.0, 0.0, 0.0, 1.0, 0.0);

    let mut first = Scheduler::new(Arc::new(InMemoryProgressStore::new()), Arc::clone(&kv), test_config());
    first.save_slot_config(MODE, override_config).await.unwrap();

    let mut second = Scheduler::new(Arc::new(InMemoryProgressStore::new()), kv, test_config());
    let loaded = second.slot_config(MODE).await.unwrap();
    assert_eq!(loaded, override_config);
    assert_eq!(
        second.slot_config(LearningMode::Listening).await.unwrap(),
        SlotConfig::default().normalized()
    );
}

#[tokio::test]
async fn test_malformed_slot_override_falls_back_to_default() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    kv.save(&drill_scheduler::store::keys::slot_config_key(MODE), "not json".to_string())
        .await
        .unwrap();
    let mut scheduler = Scheduler::new(Arc::new(InMemoryProgressStore::new()), kv, test_config());
    assert_eq!(scheduler.slot_config(MODE).await.unwrap(), SlotConfig::default().normalized());
}

#[tokio::test]
async fn test_associated_words_are_chained() {
    let items: Vec<Item> = ["x1", "cat", "x2", "kitten", "x3"].iter().map(|w| Item::new(*w)).collect();
    let store = InMemoryProgressStore::new();
    for (i, item) in items.iter().enumerate() {
        store.insert(record(&item.word, 5, 3, 1, 0, 60.0 - i as f64));
    }
    let associations = StaticAssociations::new().with("cat", "kitten", 95);
    let mut scheduler = scheduler_with(store, test_config()).with_associations(Arc::new(associations));
    let now = fixed_now();
    let out = scheduler
        .schedule(&items, MODE, &SessionStats::new(now), &ScheduleOptions::default(), now)
        .await
        .unwrap();
    let cat = out.iter().position(|i| i.word == "cat").unwrap();
    let kitten = out.iter().position(|i| i.word == "kitten").unwrap();
    assert_eq!(cat.abs_diff(kitten), 1, "{:?}", out.iter().map(|i| &i.word).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_inconsistent_stored_batch_state_is_repaired() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let words: Vec<String> = ["a", "b", "c"].iter().map(|w| w.to_string()).collect();
    let mut stored = BatchState::new(MODE, words, 2, 0.7, fixed_now());
    stored.unlocked = 9;
    stored.batch_size = 0;
    kv.save(&batch_state_key(MODE), serde_json::to_string(&stored).unwrap())
        .await
        .unwrap();

    let config = SchedulerConfig {
        invariant_policy: InvariantPolicy::LogAndRecover,
        ..test_config()
    };
    let mut scheduler = Scheduler::new(Arc::new(InMemoryProgressStore::new()), kv, config);
    let items: Vec<Item> = ["a", "b", "c"].iter().map(|w| Item::new(*w)).collect();
    let options = ScheduleOptions {
        batch_gating: true,
        ..Default::default()
    };
    let now = fixed_now();
    let out = scheduler
        .schedule(&items, MODE, &SessionStats::new(now), &options, now)
        .await
        .expect("stored state is repaired, not fatal");
    assert_well_formed(&out);
    assert_eq!(scheduler.diagnostics().unwrap().batch.as_ref().unwrap().remaining, 0);
}
