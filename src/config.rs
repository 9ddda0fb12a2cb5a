use std::path::PathBuf;

/// Runtime settings, read from `BEDLEDGER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// WAL appends since the last compaction before a facility is compacted.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Restrict a run to one facility instead of every WAL in `data_dir`.
    pub facility: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
            facility: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("BEDLEDGER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: lookup("BEDLEDGER_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: lookup("BEDLEDGER_METRICS_PORT").and_then(|s| s.parse().ok()),
            facility: lookup("BEDLEDGER_FACILITY").filter(|s| !s.is_empty()),
        }
    }
}
