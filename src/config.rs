//! Process configuration: storage paths and the pattern significance
//! threshold. Loaded from an optional TOML file; CLI flags override fields.

use crate::error::LedgerResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const GENESIS_HASH: &str = "GENESIS";

/// Default number of matching-harm occurrences before a pattern is treated
/// as significant by the advisory layer.
pub const DEFAULT_PATTERN_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database holding decisions, outcomes, responses and anchors.
    pub db_path: PathBuf,
    /// Snapshot of the current chain tip hash (key=value lines).
    pub anchor_file: PathBuf,
    /// Append-only log of every tip hash ever written.
    pub anchor_history: PathBuf,
    /// Minimum occurrence count for a pattern to produce a warning.
    pub pattern_threshold: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ledger.db"),
            anchor_file: PathBuf::from("ANCHOR.txt"),
            anchor_history: PathBuf::from("ANCHOR_HISTORY.log"),
            pattern_threshold: DEFAULT_PATTERN_THRESHOLD,
        }
    }
}

impl LedgerConfig {
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Root all paths under `dir`. Used by tests and by callers that keep the
    /// ledger in a dedicated directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db_path: dir.join("ledger.db"),
            anchor_file: dir.join("ANCHOR.txt"),
            anchor_history: dir.join("ANCHOR_HISTORY.log"),
            pattern_threshold: DEFAULT_PATTERN_THRESHOLD,
        }
    }

    pub fn with_pattern_threshold(mut self, threshold: usize) -> Self {
        self.pattern_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.db_path, PathBuf::from("ledger.db"));
        assert_eq!(cfg.pattern_threshold, 2);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: LedgerConfig = toml::from_str("pattern_threshold = 3").unwrap();
        assert_eq!(cfg.pattern_threshold, 3);
        assert_eq!(cfg.anchor_file, PathBuf::from("ANCHOR.txt"));
    }
}
