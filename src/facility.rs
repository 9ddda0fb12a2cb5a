use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::limits::*;

/// Manages per-facility engines. Each facility gets its own Engine + WAL;
/// bed numbers are unique within a facility.
pub struct FacilityManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Keep only path-safe characters of a facility name.
fn sanitize(facility: &str) -> String {
    facility
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl FacilityManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get or lazily open the engine for a facility.
    pub fn get_or_create(&self, facility: &str) -> std::io::Result<Arc<Engine>> {
        if facility.len() > MAX_FACILITY_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "facility name too long",
            ));
        }
        let safe_name = sanitize(facility);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty facility name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_FACILITIES {
            return Err(std::io::Error::other("too many facilities"));
        }

        let engine = match self.engines.entry(safe_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path)?);
                e.insert(engine.clone());
                engine
            }
        };
        info!(facility = %safe_name, "facility opened");
        metrics::gauge!(crate::observability::FACILITIES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    /// Open every facility that has a WAL in the data directory.
    pub fn open_all(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wal") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if sanitize(stem) != stem {
                warn!(file = %path.display(), "skipping WAL with an invalid facility name");
                continue;
            }
            self.get_or_create(stem)?;
            names.push(stem.to_string());
        }
        names.sort();
        Ok(names)
    }

    pub fn facilities(&self) -> Vec<(String, Arc<Engine>)> {
        let mut all: Vec<_> = self
            .engines
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Compact the facility's WAL if enough appends accumulated since the
    /// last compaction. Returns whether it compacted.
    pub async fn compact_if_due(&self, engine: &Engine) -> Result<bool, crate::engine::EngineError> {
        let appends = engine.wal_appends_since_compact().await;
        if appends < self.compact_threshold {
            return Ok(false);
        }
        engine.compact_wal().await?;
        info!(appends, "compacted WAL");
        Ok(true)
    }
}
