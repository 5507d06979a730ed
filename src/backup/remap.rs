//! Source-id → target-id mapping built during one restore.

use std::collections::HashMap;

use crate::platform::{Overwrite, OverwriteKind};
use crate::snapshot::OverwriteRecord;

/// Scratch table mapping snapshot ids to freshly created target ids.
///
/// Lives for a single restore call. A missing entry means the entity was
/// never created in the target, and callers must drop the reference rather
/// than fall back to the source id.
#[derive(Debug, Default, Clone)]
pub struct RemapTable {
    roles: HashMap<String, String>,
    channels: HashMap<String, String>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_role(&mut self, old_id: &str, new_id: &str) {
        self.roles.insert(old_id.to_string(), new_id.to_string());
    }

    pub fn insert_channel(&mut self, old_id: &str, new_id: &str) {
        self.channels.insert(old_id.to_string(), new_id.to_string());
    }

    pub fn role(&self, old_id: &str) -> Option<&str> {
        self.roles.get(old_id).map(String::as_str)
    }

    pub fn channel(&self, old_id: &str) -> Option<&str> {
        self.channels.get(old_id).map(String::as_str)
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Remap channel overwrites, dropping any whose subject has no target.
    ///
    /// Only role subjects are remappable; member overwrites are dropped.
    pub fn remap_overwrites(&self, records: &[OverwriteRecord]) -> (Vec<Overwrite>, usize) {
        let mut dropped = 0;
        let overwrites = records
            .iter()
            .filter_map(|ow| {
                let mapped = match ow.subject_kind {
                    OverwriteKind::Role => self.role(&ow.subject_id),
                    OverwriteKind::Member => None,
                };
                match mapped {
                    Some(id) => Some(Overwrite {
                        id: id.to_string(),
                        kind: ow.subject_kind,
                        allow: ow.allow_bits,
                        deny: ow.deny_bits,
                    }),
                    None => {
                        dropped += 1;
                        None
                    }
                }
            })
            .collect();
        (overwrites, dropped)
    }

    /// Remap a role grant list, omitting roles that were not recreated.
    pub fn remap_roles(&self, role_ids: &[String]) -> Vec<String> {
        role_ids
            .iter()
            .filter_map(|id| self.role(id).map(str::to_string))
            .collect()
    }
}
