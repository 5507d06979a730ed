//! Platform accessors.
//!
//! The backup engine never talks to Discord directly. It reads a live guild
//! through [`GuildReader`] and mutates one through [`GuildWriter`]. Every
//! method returns a [`CallResult`] so that a throttled call is always
//! distinguishable from a hard failure at the call site.
//!
//! - [`discord::DiscordGuild`] implements both over the Discord REST API.
//! - `memory::MemoryGuild` (tests only) implements both in memory.

pub mod discord;
#[cfg(test)]
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;

pub use discord::{DiscordConnector, DiscordGuild};

/// Outcome of a failed platform call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The platform rate limiter rejected the call; retry after the interval.
    #[error("rate limited (retry after {}ms)", retry_after.as_millis())]
    Throttled { retry_after: Duration },
    /// Permission denied, unknown entity, invalid payload, transport error.
    #[error("{0}")]
    Failed(String),
}

/// Result of any platform call.
pub type CallResult<T> = Result<T, PlatformError>;

// ── Live Entities ─────────────────────────────────────────────────────────────

/// Discord channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Announcement,
    Stage,
    Forum,
    Unknown,
}

impl ChannelKind {
    /// Whether channels of this kind carry a message history.
    pub fn is_text_capable(&self) -> bool {
        matches!(
            self,
            ChannelKind::Text | ChannelKind::Announcement | ChannelKind::Voice
        )
    }

    /// Discord's numeric channel type.
    pub fn as_discord_type(&self) -> u8 {
        match self {
            ChannelKind::Text => 0,
            ChannelKind::Voice => 2,
            ChannelKind::Category => 4,
            ChannelKind::Announcement => 5,
            ChannelKind::Stage => 13,
            ChannelKind::Forum => 15,
            ChannelKind::Unknown => 0,
        }
    }
}

impl From<u8> for ChannelKind {
    fn from(value: u8) -> Self {
        match value {
            0 => ChannelKind::Text,
            2 => ChannelKind::Voice,
            4 => ChannelKind::Category,
            5 => ChannelKind::Announcement,
            13 => ChannelKind::Stage,
            15 => ChannelKind::Forum,
            _ => ChannelKind::Unknown,
        }
    }
}

/// Who a permission overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteKind {
    Role,
    Member,
}

impl OverwriteKind {
    /// Discord's numeric overwrite type (0 = role, 1 = member).
    pub fn as_discord_type(&self) -> u8 {
        match self {
            OverwriteKind::Role => 0,
            OverwriteKind::Member => 1,
        }
    }
}

/// A channel permission overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overwrite {
    pub id: String,
    pub kind: OverwriteKind,
    pub allow: u64,
    pub deny: u64,
}

/// Top-level guild metadata.
#[derive(Debug, Clone)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
    pub description: Option<String>,
    /// The @everyone role. Discord gives it the guild's own id.
    pub default_role_id: String,
}

#[derive(Debug, Clone)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub color: u32,
    pub position: i32,
    pub permissions: u64,
    pub mentionable: bool,
    pub hoist: bool,
    /// Owned by an integration (bot role, booster role).
    pub managed: bool,
    /// Sits below the acting bot's highest role.
    pub deletable: bool,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub position: i32,
    pub parent_id: Option<String>,
    pub overwrites: Vec<Overwrite>,
    pub topic: Option<String>,
    pub nsfw: bool,
    pub rate_limit_per_user: u32,
    pub deletable: bool,
}

#[derive(Debug, Clone)]
pub struct Emoji {
    pub id: String,
    pub name: String,
    pub animated: bool,
    pub url: String,
    pub role_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub timestamp_ms: i64,
    pub embeds: Vec<serde_json::Value>,
    pub attachments: Vec<Attachment>,
}

/// Downloaded binary asset.
#[derive(Debug, Clone)]
pub struct Asset {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

// ── Write Specs ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub name: String,
    pub color: u32,
    pub position: i32,
    pub permissions: u64,
    pub mentionable: bool,
    pub hoist: bool,
}

#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub name: String,
    pub kind: ChannelKind,
    pub position: i32,
    pub parent_id: Option<String>,
    pub overwrites: Vec<Overwrite>,
    pub topic: Option<String>,
    pub nsfw: bool,
    pub rate_limit_per_user: u32,
}

#[derive(Debug, Clone)]
pub struct EmojiSpec {
    pub name: String,
    pub image: Vec<u8>,
    pub content_type: String,
    pub role_ids: Vec<String>,
}

/// A channel-scoped relay endpoint (a webhook on Discord).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayHandle {
    pub id: String,
    pub token: String,
}

/// One message to post through a relay endpoint.
#[derive(Debug, Clone)]
pub struct RelayPayload {
    pub content: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub embeds: Vec<serde_json::Value>,
    /// When set, the platform must not ping anyone mentioned in the content.
    pub suppress_mentions: bool,
}

// ── Accessor Traits ───────────────────────────────────────────────────────────

/// Read access to a live guild.
#[async_trait]
pub trait GuildReader: Send + Sync {
    async fn guild_info(&self) -> CallResult<GuildInfo>;

    /// Roles in the order the platform exposes them.
    async fn list_roles(&self) -> CallResult<Vec<Role>>;

    async fn list_channels(&self) -> CallResult<Vec<Channel>>;

    /// Effective permissions of the acting account in a channel.
    async fn channel_permissions(&self, channel_id: &str) -> CallResult<Permissions>;

    /// One page of history, newest first, strictly older than `before`.
    async fn fetch_history_page(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> CallResult<Vec<Message>>;

    async fn list_emoji(&self) -> CallResult<Vec<Emoji>>;

    async fn download_asset(&self, url: &str) -> CallResult<Asset>;
}

/// Write access to a live guild.
#[async_trait]
pub trait GuildWriter: Send + Sync {
    /// Returns the new role's id.
    async fn create_role(&self, spec: &RoleSpec) -> CallResult<String>;

    async fn delete_role(&self, role_id: &str) -> CallResult<()>;

    /// Returns the new channel's id.
    async fn create_channel(&self, spec: &ChannelSpec) -> CallResult<String>;

    async fn delete_channel(&self, channel_id: &str) -> CallResult<()>;

    /// Returns the new emoji's id.
    async fn create_emoji(&self, spec: &EmojiSpec) -> CallResult<String>;

    async fn delete_emoji(&self, emoji_id: &str) -> CallResult<()>;

    async fn set_icon(&self, image: &[u8], content_type: &str) -> CallResult<()>;

    async fn set_name(&self, name: &str) -> CallResult<()>;

    /// Find the named relay endpoint on a channel, creating it if missing.
    async fn get_or_create_relay(&self, channel_id: &str, name: &str) -> CallResult<RelayHandle>;

    async fn relay_send(&self, relay: &RelayHandle, payload: &RelayPayload) -> CallResult<()>;
}

/// A guild that can be both read and written.
pub trait Guild: GuildReader + GuildWriter {}

impl<T: GuildReader + GuildWriter> Guild for T {}

/// Hands out accessors for guilds by id.
pub trait GuildConnector: Send + Sync {
    fn connect(&self, guild_id: &str) -> Arc<dyn Guild>;
}
