//! Versioned snapshot of all durable engagement state.
//!
//! Writes are atomic: the document goes to `<path>.tmp` and is renamed over
//! `<path>`. The previous good file is copied to `<path>.backup` first, and
//! [`SnapshotStore::load_with_recovery`] falls back to it when the primary
//! file is corrupt. Files that cannot be read at all are renamed to
//! `<path>.corrupt-N` so no later save overwrites them. A snapshot from an
//! unknown schema version is never recovered around: loading fails.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alliance::AllianceState;
use crate::bounded_set::BoundedSet;
use crate::breaker::CapabilityHealth;
use crate::budget::BudgetWindow;
use crate::capability::Capability;
use crate::error::{EngagementError, EngagementResult};

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub alliance: AllianceState,
    #[serde(default)]
    pub budgets: BTreeMap<Capability, BudgetWindow>,
    #[serde(default)]
    pub dedup: BTreeMap<Capability, BoundedSet>,
    #[serde(default)]
    pub breaker: BTreeMap<Capability, CapabilityHealth>,
    #[serde(default)]
    pub followed_agents: BTreeSet<String>,
    #[serde(default = "empty_id_set")]
    pub screened_replies: BoundedSet,
    #[serde(default = "empty_id_set")]
    pub responded_replies: BoundedSet,
    #[serde(default = "empty_id_set")]
    pub received_upvotes: BoundedSet,
    #[serde(default)]
    pub search_cursor: usize,
}

fn empty_id_set() -> BoundedSet {
    BoundedSet::new(1)
}

impl Snapshot {
    /// Empty snapshot stamped `saved_at`.
    pub fn empty(saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            alliance: AllianceState::new(),
            budgets: BTreeMap::new(),
            dedup: BTreeMap::new(),
            breaker: BTreeMap::new(),
            followed_agents: BTreeSet::new(),
            screened_replies: empty_id_set(),
            responded_replies: empty_id_set(),
            received_upvotes: empty_id_set(),
            search_cursor: 0,
        }
    }

    /// Parse and version-check a snapshot document.
    pub fn from_json(path: &Path, content: &str) -> EngagementResult<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| EngagementError::invalid_snapshot(path, e.to_string()))?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| EngagementError::invalid_snapshot(path, "missing version"))?;
        if version != u64::from(SNAPSHOT_VERSION) {
            return Err(EngagementError::UnsupportedVersion {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                expected: SNAPSHOT_VERSION,
            });
        }
        serde_json::from_value(value)
            .map_err(|e| EngagementError::invalid_snapshot(path, e.to_string()))
    }
}

/// File-backed snapshot persistence.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, "backup")
    }

    fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, "tmp")
    }

    /// Load the primary snapshot only.
    pub fn load(&self) -> EngagementResult<Snapshot> {
        Self::load_from(&self.path)
    }

    fn load_from(path: &Path) -> EngagementResult<Snapshot> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngagementError::snapshot_not_found(path));
            }
            Err(e) => return Err(e.into()),
        };
        Snapshot::from_json(path, &content)
    }

    /// Load the snapshot, falling back to the backup if the primary is
    /// missing or corrupt.
    ///
    /// Returns `Ok(None)` when there is no usable snapshot at all, so the
    /// caller starts from defaults. Unreadable files are first moved aside
    /// to `<path>.corrupt-N`. An unsupported version in either file is an
    /// error and leaves both files untouched.
    pub fn load_with_recovery(&self) -> EngagementResult<Option<Snapshot>> {
        let mut unreadable = Vec::new();
        match self.load() {
            Ok(snapshot) => return Ok(Some(snapshot)),
            Err(EngagementError::SnapshotNotFound { .. }) => {}
            Err(e) if e.is_corruption() => {
                tracing::warn!(path = %self.path.display(), error = %e, "Snapshot corrupted, trying backup");
                unreadable.push(self.path.clone());
            }
            Err(e) => return Err(e),
        }

        let backup_path = self.backup_path();
        match Self::load_from(&backup_path) {
            Ok(snapshot) => {
                tracing::info!(path = %backup_path.display(), "Recovered snapshot from backup");
                set_aside(unreadable)?;
                return Ok(Some(snapshot));
            }
            Err(EngagementError::SnapshotNotFound { .. }) => {}
            Err(e) if e.is_corruption() => {
                tracing::warn!(path = %backup_path.display(), error = %e, "Backup also unusable");
                unreadable.push(backup_path);
            }
            Err(e) => return Err(e),
        }

        set_aside(unreadable)?;
        Ok(None)
    }

    /// Write the snapshot atomically. On failure the previous file is intact.
    pub fn save(&self, snapshot: &Snapshot) -> EngagementResult<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| EngagementError::persist_failed(&self.path, e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngagementError::persist_failed(&self.path, e.to_string()))?;
        }

        if self.path.exists() {
            if let Err(e) = std::fs::copy(&self.path, self.backup_path()) {
                // Backup is best-effort.
                tracing::warn!(error = %e, "Failed to create snapshot backup");
            }
        }

        let temp_path = self.temp_path();
        std::fs::write(&temp_path, content)
            .map_err(|e| EngagementError::persist_failed(&self.path, e.to_string()))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            EngagementError::persist_failed(&self.path, e.to_string())
        })?;

        tracing::debug!(path = %self.path.display(), "Snapshot saved");
        Ok(())
    }
}

fn set_aside(paths: Vec<PathBuf>) -> EngagementResult<()> {
    for path in paths {
        let aside = quarantine(&path)?;
        tracing::warn!(
            from = %path.display(),
            to = %aside.display(),
            "Moved unreadable snapshot aside"
        );
    }
    Ok(())
}

/// Rename `path` to the first free `<path>.corrupt-N`.
fn quarantine(path: &Path) -> EngagementResult<PathBuf> {
    let mut n = 0u32;
    loop {
        let aside = with_suffix(path, &format!("corrupt-{n}"));
        if !aside.exists() {
            std::fs::rename(path, &aside)
                .map_err(|e| EngagementError::persist_failed(path, e.to_string()))?;
            return Ok(aside);
        }
        n += 1;
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}
