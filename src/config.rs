use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Directory for persisted batch state and slot overrides. In-memory
    /// storage when unset.
    pub data_dir: Option<PathBuf>,
    /// Optional JSON word list for the demo session.
    pub word_list: Option<PathBuf>,
    pub mode: String,
    pub rounds: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let data_dir = std::env::var("DRILL_DATA_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let word_list = std::env::var("DRILL_WORD_LIST")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let mode = std::env::var("DRILL_MODE").unwrap_or_else(|_| "recognition".to_string());

        let rounds = std::env::var("DRILL_ROUNDS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(12);

        Self {
            log_level,
            data_dir,
            word_list,
            mode,
            rounds,
        }
    }
}
