//! Snapshot records.
//!
//! A [`Snapshot`] is the immutable capture of one guild's structure and
//! (optionally) its message history. Records are serialized as camelCase
//! JSON and persisted one file per snapshot by [`SnapshotStore`].

pub mod store;

use serde::{Deserialize, Serialize};

use crate::platform::{ChannelKind, OverwriteKind};

pub use store::SnapshotStore;

/// A captured guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Time-based id, unique within the source guild.
    pub id: String,
    pub source_community_id: String,
    pub source_community_name: String,
    /// Base64 image bytes of the guild icon at capture time.
    #[serde(default)]
    pub source_community_icon: Option<String>,
    #[serde(default)]
    pub source_community_description: Option<String>,
    /// User-supplied label, unique (case-insensitive) per source guild.
    pub name: String,
    pub roles: Vec<RoleRecord>,
    pub channels: Vec<ChannelRecord>,
    pub emojis: Vec<EmojiRecord>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    #[serde(default)]
    pub message_fetch_errors: Vec<MessageFetchError>,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub created_by: String,
}

impl Snapshot {
    /// Whether `role` is the source guild's @everyone role.
    pub fn is_everyone_role(&self, role: &RoleRecord) -> bool {
        role.id == self.source_community_id
    }

    /// Key used for the on-disk file name and the store cache.
    pub fn storage_key(&self) -> String {
        storage_key(&self.source_community_id, &self.id)
    }
}

/// `{communityId}_{snapshotId}`.
pub fn storage_key(community_id: &str, snapshot_id: &str) -> String {
    format!("{}_{}", community_id, snapshot_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub id: String,
    pub name: String,
    pub color: u32,
    pub position: i32,
    pub permission_bits: u64,
    pub mentionable: bool,
    pub hoisted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub position: i32,
    pub parent_id: Option<String>,
    pub overwrites: Vec<OverwriteRecord>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub age_restricted: bool,
    #[serde(default)]
    pub slow_mode_seconds: u32,
}

/// A per-channel allow/deny rule. `subject_id` is in source-guild id space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverwriteRecord {
    pub subject_id: String,
    pub subject_kind: OverwriteKind,
    pub allow_bits: u64,
    pub deny_bits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiRecord {
    pub id: String,
    pub name: String,
    pub animated: bool,
    /// Inlined image; empty when the download failed but a URL was kept.
    #[serde(default)]
    pub image_bytes_base64: String,
    pub mime_type: String,
    /// Source-space role ids allowed to use the emoji.
    #[serde(default)]
    pub role_ids: Vec<String>,
    /// CDN URL, used to re-download when the inlined image is unusable.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub source_channel_id: String,
    pub content: String,
    pub author_name: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
}

/// A channel whose history could not be captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFetchError {
    pub channel_id: String,
    pub channel_name: String,
    pub error: String,
}

/// Summary returned by list endpoints (omits the large arrays).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: String,
    pub name: String,
    pub source_community_id: String,
    pub source_community_name: String,
    pub role_count: usize,
    pub channel_count: usize,
    pub emoji_count: usize,
    pub message_count: usize,
    pub created_at: i64,
    pub created_by: String,
}

/// What `delete` reports about the snapshot it removed.
pub type DeletedSnapshotSummary = SnapshotSummary;

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            source_community_id: snapshot.source_community_id.clone(),
            source_community_name: snapshot.source_community_name.clone(),
            role_count: snapshot.roles.len(),
            channel_count: snapshot.channels.len(),
            emoji_count: snapshot.emojis.len(),
            message_count: snapshot.messages.len(),
            created_at: snapshot.created_at,
            created_by: snapshot.created_by.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A small snapshot of guild `guild_id` with one category and one text channel.
    pub fn snapshot(guild_id: &str, id: &str, name: &str, created_at: i64) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            source_community_id: guild_id.to_string(),
            source_community_name: "Test Guild".to_string(),
            source_community_icon: None,
            source_community_description: None,
            name: name.to_string(),
            roles: vec![
                RoleRecord {
                    id: guild_id.to_string(),
                    name: "@everyone".to_string(),
                    color: 0,
                    position: 0,
                    permission_bits: 1024,
                    mentionable: false,
                    hoisted: false,
                },
                RoleRecord {
                    id: "r-mod".to_string(),
                    name: "Moderator".to_string(),
                    color: 0x2ecc71,
                    position: 1,
                    permission_bits: 8192,
                    mentionable: true,
                    hoisted: true,
                },
            ],
            channels: vec![
                ChannelRecord {
                    id: "c-cat".to_string(),
                    name: "General".to_string(),
                    kind: ChannelKind::Category,
                    position: 0,
                    parent_id: None,
                    overwrites: vec![],
                    topic: None,
                    age_restricted: false,
                    slow_mode_seconds: 0,
                },
                ChannelRecord {
                    id: "c-chat".to_string(),
                    name: "chat".to_string(),
                    kind: ChannelKind::Text,
                    position: 0,
                    parent_id: Some("c-cat".to_string()),
                    overwrites: vec![OverwriteRecord {
                        subject_id: "r-mod".to_string(),
                        subject_kind: OverwriteKind::Role,
                        allow_bits: 8192,
                        deny_bits: 0,
                    }],
                    topic: Some("talk here".to_string()),
                    age_restricted: false,
                    slow_mode_seconds: 5,
                },
            ],
            emojis: vec![],
            messages: vec![],
            message_fetch_errors: vec![],
            created_at,
            created_by: "user-1".to_string(),
        }
    }
}
