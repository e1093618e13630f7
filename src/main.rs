use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use drill_scheduler::config::Config;
use drill_scheduler::scheduling::{
    Item, LearningMode, MetadataAssociations, ScheduleOptions, Scheduler, SchedulerConfig, SessionStats,
};
use drill_scheduler::store::{InMemoryProgressStore, JsonFileStore, KeyValueStore, MemoryKeyValueStore};
use drill_scheduler::SchedulerError;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let items = match &config.word_list {
        Some(path) => match load_word_list(path).await {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "word list unreadable; using sample");
                sample_words()
            }
        },
        None => sample_words(),
    };
    let mode = LearningMode::parse(&config.mode);
    tracing::info!(%mode, words = items.len(), rounds = config.rounds, "starting drill session");

    let result = match &config.data_dir {
        Some(dir) => match JsonFileStore::open(dir).await {
            Ok(kv) => run_session(Arc::new(kv), &items, mode, config.rounds).await,
            Err(err) => {
                tracing::error!(error = %err, dir = %dir.display(), "cannot open data directory");
                return;
            }
        },
        None => run_session(Arc::new(MemoryKeyValueStore::new()), &items, mode, config.rounds).await,
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "drill session failed");
    }
}

async fn run_session<K: KeyValueStore>(
    kv: Arc<K>,
    items: &[Item],
    mode: LearningMode,
    rounds: usize,
) -> Result<(), SchedulerError> {
    let store = Arc::new(InMemoryProgressStore::new());
    let associations = Arc::new(MetadataAssociations::from_items(items));
    let mut scheduler =
        Scheduler::new(store, kv, SchedulerConfig::from_env()).with_associations(associations);

    let started = Utc::now();
    let mut stats = SessionStats::new(started);
    let options = ScheduleOptions {
        total_slots: 10,
        batch_gating: true,
        ..Default::default()
    };
    let mut rng = rand::rng();

    for round in 0..rounds {
        let now = started + Duration::seconds(20 * round as i64);
        let batch = scheduler.schedule(items, mode, &stats, &options, now).await?;
        let Some(head) = batch.first() else {
            tracing::info!("nothing left to schedule");
            break;
        };
        let correct = rng.random_bool(0.7);
        let response_ms = rng.random_range(600..4000);
        let position = scheduler
            .record_answer(&head.word, correct, response_ms, mode, now)
            .await?;
        stats.record(correct);

        let upcoming: Vec<&str> = batch.iter().skip(1).take(4).map(|i| i.word.as_str()).collect();
        println!(
            "round {:>2}: {} ({}) -> {:.1} | next: {}",
            round + 1,
            head.word,
            if correct { "correct" } else { "missed" },
            position,
            upcoming.join(", ")
        );
    }

    if let Some(diagnostics) = scheduler.diagnostics() {
        match diagnostics.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => tracing::warn!(error = %err, "cannot serialise diagnostics"),
        }
    }
    Ok(())
}

async fn load_word_list(path: &Path) -> Result<Vec<Item>, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let items: Vec<Item> = serde_json::from_str(&raw)?;
    Ok(items)
}

fn sample_words() -> Vec<Item> {
    [
        ("電車", "train", &["transport"][..]),
        ("電話", "telephone", &["device"][..]),
        ("電気", "electricity", &["device"][..]),
        ("駅", "station", &["transport"][..]),
        ("切符", "ticket", &["transport"][..]),
        ("りんご", "apple", &["food", "fruit"][..]),
        ("みかん", "mandarin orange", &["food", "fruit"][..]),
        ("ぶどう", "grape", &["food", "fruit"][..]),
        ("ご飯", "cooked rice, meal", &["food"][..]),
        ("水", "water", &["food", "nature"][..]),
        ("山", "mountain", &["nature"][..]),
        ("川", "river", &["nature"][..]),
        ("海", "sea", &["nature"][..]),
        ("空", "sky", &["nature"][..]),
        ("先生", "teacher", &["people", "school"][..]),
        ("学生", "student", &["people", "school"][..]),
        ("学校", "school", &["school"][..]),
        ("本", "book", &["school"][..]),
    ]
    .iter()
    .map(|(word, meaning, tags)| Item::new(*word).with_meaning(*meaning).with_tags(tags.iter().copied()))
    .collect()
}
