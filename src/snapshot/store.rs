//! File-backed snapshot store.
//!
//! Each snapshot is stored as a JSON file in
//! `{data_dir}/snapshots/{sourceCommunityId}_{snapshotId}.json` and cached in
//! memory. Uses atomic writes (write to .tmp, rename) to prevent corruption.
//! The file name doubles as the fast path for lookups by id, so a snapshot
//! written by another process is still found without a refresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use super::{storage_key, DeletedSnapshotSummary, Snapshot, SnapshotSummary};
use crate::error::{Error, Result};

/// File-backed snapshot store with in-memory cache.
#[derive(Clone)]
pub struct SnapshotStore {
    /// In-memory cache: "{communityId}_{snapshotId}" -> Snapshot
    snapshots: Arc<DashMap<String, Snapshot>>,
    /// Directory for persistence (`{data_dir}/snapshots/`). None = in-memory only.
    snapshots_dir: Option<PathBuf>,
}

impl SnapshotStore {
    /// Create a new snapshot store.
    ///
    /// Snapshot files live in `{data_dir}/snapshots/`.
    pub fn new(data_dir: Option<&str>) -> Self {
        let snapshots_dir = data_dir.map(|d| PathBuf::from(d).join("snapshots"));
        Self {
            snapshots: Arc::new(DashMap::new()),
            snapshots_dir,
        }
    }

    /// Load all snapshot files from disk into memory.
    ///
    /// Called once at startup. Returns the number of snapshots loaded.
    pub fn load_from_disk(&self) -> usize {
        let dir = match &self.snapshots_dir {
            Some(d) => d,
            None => {
                tracing::info!("[Store] No data_dir configured, running in-memory only");
                return 0;
            }
        };

        if !dir.exists() {
            tracing::info!(path = %dir.display(), "[Store] No snapshots directory, starting fresh");
            return 0;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %dir.display(),
                    "[Store] Failed to read snapshots directory"
                );
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match read_snapshot_file(&path) {
                Ok(snapshot) => {
                    self.snapshots.insert(snapshot.storage_key(), snapshot);
                    count += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %path.display(),
                        "[Store] Failed to load snapshot file, skipping"
                    );
                }
            }
        }

        tracing::info!(count = count, "[Store] Snapshots loaded from disk");
        count
    }

    /// Drop the cache and reload everything from disk.
    ///
    /// In-memory-only stores keep their contents.
    pub fn refresh(&self) -> usize {
        if self.snapshots_dir.is_none() {
            return self.snapshots.len();
        }
        self.snapshots.clear();
        self.load_from_disk()
    }

    fn file_path(&self, key: &str) -> Option<PathBuf> {
        self.snapshots_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key)))
    }

    /// Persist a snapshot and cache it.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if !is_file_segment(&snapshot.source_community_id) || !is_file_segment(&snapshot.id) {
            return Err(Error::Storage(format!(
                "invalid snapshot key {}",
                snapshot.storage_key()
            )));
        }
        let key = snapshot.storage_key();

        if let Some(path) = self.file_path(&key) {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let json = serde_json::to_string_pretty(snapshot)?;

            // Atomic write: temp file + rename
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, &json)?;
            if let Err(e) = std::fs::rename(&tmp_path, &path) {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(Error::Storage(format!(
                    "failed to finalize {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        tracing::info!(
            guild_id = snapshot.source_community_id.as_str(),
            snapshot_id = snapshot.id.as_str(),
            name = snapshot.name.as_str(),
            roles = snapshot.roles.len(),
            channels = snapshot.channels.len(),
            emojis = snapshot.emojis.len(),
            messages = snapshot.messages.len(),
            "[Store] Snapshot written"
        );
        self.snapshots.insert(key, snapshot.clone());
        Ok(())
    }

    /// Whether a snapshot with this exact id exists for the guild.
    pub fn contains(&self, community_id: &str, snapshot_id: &str) -> bool {
        self.lookup_by_key(community_id, snapshot_id).is_some()
    }

    /// Direct key lookup: cache first, then the snapshot file by name.
    fn lookup_by_key(&self, community_id: &str, snapshot_id: &str) -> Option<Snapshot> {
        if !is_file_segment(community_id) || !is_file_segment(snapshot_id) {
            return None;
        }
        let key = storage_key(community_id, snapshot_id);
        if let Some(s) = self.snapshots.get(&key) {
            return Some(s.clone());
        }

        let path = self.file_path(&key)?;
        if !path.exists() {
            return None;
        }
        match read_snapshot_file(&path) {
            Ok(snapshot) => {
                self.snapshots.insert(key, snapshot.clone());
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "[Store] Unreadable snapshot file");
                None
            }
        }
    }

    /// Resolve `id_or_name` for a guild.
    ///
    /// Tries the `{guild}_{id}` key first, then scans every guild's
    /// snapshots for a case-insensitive name or literal id match. Matches
    /// owned by `community_id` win over other guilds'; newest wins otherwise.
    fn resolve(&self, community_id: &str, id_or_name: &str) -> Option<Snapshot> {
        if let Some(snapshot) = self.lookup_by_key(community_id, id_or_name) {
            return Some(snapshot);
        }

        let needle = id_or_name.to_lowercase();
        let matches: Vec<Snapshot> = self
            .list(community_id, None, true)
            .into_iter()
            .filter(|s| s.id == id_or_name || s.name.to_lowercase() == needle)
            .collect();

        matches
            .iter()
            .find(|s| s.source_community_id == community_id)
            .or_else(|| matches.first())
            .cloned()
    }

    /// Read a snapshot by id, falling back to name.
    pub fn read(&self, community_id: &str, id_or_name: &str) -> Result<Snapshot> {
        self.resolve(community_id, id_or_name)
            .ok_or_else(|| Error::NotFound(id_or_name.to_string()))
    }

    /// Snapshots sorted by `created_at`, newest first.
    ///
    /// Only `community_id`'s snapshots unless `include_other_communities`.
    pub fn list(
        &self,
        community_id: &str,
        limit: Option<usize>,
        include_other_communities: bool,
    ) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> = self
            .snapshots
            .iter()
            .filter(|r| include_other_communities || r.value().source_community_id == community_id)
            .map(|r| r.value().clone())
            .collect();

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            snapshots.truncate(limit);
        }
        snapshots
    }

    /// Same ordering as [`list`](Self::list), as summaries.
    pub fn list_summaries(
        &self,
        community_id: &str,
        limit: Option<usize>,
        include_other_communities: bool,
    ) -> Vec<SnapshotSummary> {
        self.list(community_id, limit, include_other_communities)
            .iter()
            .map(SnapshotSummary::from)
            .collect()
    }

    /// Delete a snapshot owned by `community_id`.
    ///
    /// Resolves like [`read`](Self::read); a snapshot captured from another
    /// guild is never deleted and yields [`Error::ForeignOwnership`].
    pub fn delete(&self, community_id: &str, id_or_name: &str) -> Result<DeletedSnapshotSummary> {
        let snapshot = self.read(community_id, id_or_name)?;

        if snapshot.source_community_id != community_id {
            tracing::warn!(
                guild_id = community_id,
                owner_guild_id = snapshot.source_community_id.as_str(),
                snapshot_id = snapshot.id.as_str(),
                "[Store] Refusing to delete another guild's snapshot"
            );
            return Err(Error::ForeignOwnership {
                snapshot_id: snapshot.id,
                owner_guild_id: snapshot.source_community_id,
                guild_id: community_id.to_string(),
            });
        }

        let key = snapshot.storage_key();
        if let Some(path) = self.file_path(&key) {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        self.snapshots.remove(&key);

        tracing::info!(
            guild_id = community_id,
            snapshot_id = snapshot.id.as_str(),
            "[Store] Snapshot deleted"
        );
        Ok(SnapshotSummary::from(&snapshot))
    }

    /// Number of cached snapshots.
    pub fn count(&self) -> usize {
        self.snapshots.len()
    }
}

/// Ids come from URL segments; they must not escape the snapshots directory.
fn is_file_segment(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\']) && !id.contains("..")
}

fn read_snapshot_file(path: &Path) -> Result<Snapshot> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
