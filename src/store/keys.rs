use crate::scheduling::types::LearningMode;

pub fn batch_state_key(mode: LearningMode) -> String {
    format!("batch:{}:state", mode.as_str())
}

pub fn slot_config_key(mode: LearningMode) -> String {
    format!("slots:{}:config", mode.as_str())
}

/// Key made safe for use as a file name.
pub fn file_name(key: &str) -> String {
    let mut out: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    out.push_str(".json");
    out
}
