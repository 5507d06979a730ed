//! Backup service: the store, engine settings and per-guild restore locks
//! behind one cloneable handle.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::capture::{capture, CaptureRequest};
use super::report::RestoreReport;
use super::restore::restore;
use super::ProgressFn;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::platform::{GuildReader, GuildWriter};
use crate::snapshot::{DeletedSnapshotSummary, Snapshot, SnapshotStore, SnapshotSummary};

#[derive(Clone)]
pub struct BackupService {
    store: SnapshotStore,
    config: Arc<EngineConfig>,
    /// Guild ids with a restore currently running.
    restoring: Arc<DashMap<String, ()>>,
}

/// Releases the guild's restore lock when dropped.
struct RestoreLock {
    restoring: Arc<DashMap<String, ()>>,
    guild_id: String,
}

impl Drop for RestoreLock {
    fn drop(&mut self) {
        self.restoring.remove(&self.guild_id);
    }
}

impl BackupService {
    pub fn new(store: SnapshotStore, config: EngineConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            restoring: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Capture `reader`'s guild under `request.name`.
    pub async fn capture<R>(&self, reader: &R, request: &CaptureRequest) -> Result<Snapshot>
    where
        R: GuildReader + ?Sized,
    {
        capture(reader, &self.store, request, &self.config).await
    }

    /// Summaries of a guild's snapshots, newest first.
    pub fn list(
        &self,
        guild_id: &str,
        limit: Option<usize>,
        include_other_guilds: bool,
    ) -> Vec<SnapshotSummary> {
        self.store.list_summaries(guild_id, limit, include_other_guilds)
    }

    pub fn read(&self, guild_id: &str, id_or_name: &str) -> Result<Snapshot> {
        self.store.read(guild_id, id_or_name)
    }

    pub fn delete(&self, guild_id: &str, id_or_name: &str) -> Result<DeletedSnapshotSummary> {
        self.store.delete(guild_id, id_or_name)
    }

    /// Restore a snapshot into `target`, the guild `guild_id`.
    ///
    /// Only snapshot resolution and the per-guild lock can fail the call;
    /// everything else is reported in the [`RestoreReport`].
    pub async fn restore<T>(
        &self,
        guild_id: &str,
        target: &T,
        id_or_name: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<RestoreReport>
    where
        T: GuildReader + GuildWriter + ?Sized,
    {
        let _lock = self.lock_guild(guild_id)?;
        let snapshot = self.store.read(guild_id, id_or_name)?;
        Ok(restore(target, &snapshot, &self.config, progress).await)
    }

    fn lock_guild(&self, guild_id: &str) -> Result<RestoreLock> {
        match self.restoring.entry(guild_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(guild_id, "[Restore] Restore already in progress");
                Err(Error::AlreadyInProgress(guild_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(RestoreLock {
                    restoring: Arc::clone(&self.restoring),
                    guild_id: guild_id.to_string(),
                })
            }
        }
    }
}
