//! Restore engine: rebuilds a snapshot's structure inside a target guild.
//!
//! ```text
//! ┌──────────┐  ┌──────────┐  ┌───────┐  ┌────────────┐  ┌───────┐  ┌────────┐
//! │ Cosmetic │─▶│ Teardown │─▶│ Roles │─▶│ Channels   │─▶│ Emoji │─▶│ Replay │
//! │ icon+name│  │ ch, roles│  │ desc. │  │ cats, rest │  │ +/−   │  │ relay  │
//! └──────────┘  └──────────┘  └───────┘  └────────────┘  └───────┘  └────────┘
//!                                  │            │            │           │
//!                                  └──── RemapTable (old id → new id) ───┘
//! ```
//!
//! Every phase is best-effort. A failed entity is recorded in the
//! [`ErrorAccumulator`] and the phase moves on; nothing is rolled back.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::relay;
use super::remap::RemapTable;
use super::report::{ErrorAccumulator, RestoreReport};
use super::ProgressFn;
use crate::config::{pause, EngineConfig};
use crate::platform::{ChannelKind, ChannelSpec, EmojiSpec, GuildReader, GuildWriter, RoleSpec};
use crate::snapshot::{ChannelRecord, EmojiRecord, Snapshot};

/// Restore phases, executed strictly in [`RestorePhase::ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    /// Guild icon and name.
    Cosmetic,
    TeardownChannels,
    TeardownRoles,
    RoleCreate,
    /// Categories only.
    ChannelCreatePass1,
    /// Everything that is not a category.
    ChannelCreatePass2,
    EmojiCreate,
    /// Pre-existing emoji not replaced by this restore.
    EmojiDelete,
    MessageReplay,
}

impl RestorePhase {
    pub const ORDER: [RestorePhase; 9] = [
        RestorePhase::Cosmetic,
        RestorePhase::TeardownChannels,
        RestorePhase::TeardownRoles,
        RestorePhase::RoleCreate,
        RestorePhase::ChannelCreatePass1,
        RestorePhase::ChannelCreatePass2,
        RestorePhase::EmojiCreate,
        RestorePhase::EmojiDelete,
        RestorePhase::MessageReplay,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RestorePhase::Cosmetic => "cosmetic",
            RestorePhase::TeardownChannels => "teardown-channels",
            RestorePhase::TeardownRoles => "teardown-roles",
            RestorePhase::RoleCreate => "role-create",
            RestorePhase::ChannelCreatePass1 => "channel-create-categories",
            RestorePhase::ChannelCreatePass2 => "channel-create-channels",
            RestorePhase::EmojiCreate => "emoji-create",
            RestorePhase::EmojiDelete => "emoji-delete",
            RestorePhase::MessageReplay => "message-replay",
        }
    }
}

/// Restore `snapshot` into `target`.
///
/// Never fails outright: per-entity failures end up in
/// [`RestoreReport::errors`] next to the counts of what did succeed.
pub async fn restore<T>(
    target: &T,
    snapshot: &Snapshot,
    config: &EngineConfig,
    progress: Option<&ProgressFn>,
) -> RestoreReport
where
    T: GuildReader + GuildWriter + ?Sized,
{
    tracing::info!(
        snapshot_id = snapshot.id.as_str(),
        source_guild_id = snapshot.source_community_id.as_str(),
        "[Restore] Starting restore"
    );

    let mut run = RestoreRun {
        target,
        snapshot,
        config,
        progress,
        default_role_id: None,
        remap: RemapTable::new(),
        errors: ErrorAccumulator::new(),
        report: RestoreReport {
            snapshot_id: snapshot.id.clone(),
            snapshot_name: snapshot.name.clone(),
            ..Default::default()
        },
        existing_emoji: Vec::new(),
        created_emoji: HashSet::new(),
    };

    match target.guild_info().await {
        Ok(info) => run.default_role_id = Some(info.default_role_id),
        Err(e) => run.errors.record("Target guild info", e),
    }

    for phase in RestorePhase::ORDER {
        tracing::debug!(phase = phase.label(), "[Restore] Entering phase");
        run.execute(phase).await;
    }

    let mut report = run.report;
    report.errors = run.errors.into_vec();
    tracing::info!(
        snapshot_id = snapshot.id.as_str(),
        roles = report.roles_created,
        channels = report.channels_created,
        emojis = report.emojis_created,
        messages = report.messages_restored,
        errors = report.errors.len(),
        "[Restore] Restore finished"
    );
    report
}

struct RestoreRun<'a, T: ?Sized> {
    target: &'a T,
    snapshot: &'a Snapshot,
    config: &'a EngineConfig,
    progress: Option<&'a ProgressFn>,
    default_role_id: Option<String>,
    remap: RemapTable,
    errors: ErrorAccumulator,
    report: RestoreReport,
    /// Target emoji ids present before any emoji was created.
    existing_emoji: Vec<String>,
    created_emoji: HashSet<String>,
}

impl<'a, T> RestoreRun<'a, T>
where
    T: GuildReader + GuildWriter + ?Sized,
{
    async fn execute(&mut self, phase: RestorePhase) {
        match phase {
            RestorePhase::Cosmetic => self.cosmetic().await,
            RestorePhase::TeardownChannels => self.teardown_channels().await,
            RestorePhase::TeardownRoles => self.teardown_roles().await,
            RestorePhase::RoleCreate => self.create_roles().await,
            RestorePhase::ChannelCreatePass1 => self.create_channels(true).await,
            RestorePhase::ChannelCreatePass2 => self.create_channels(false).await,
            RestorePhase::EmojiCreate => self.create_emoji().await,
            RestorePhase::EmojiDelete => self.delete_replaced_emoji().await,
            RestorePhase::MessageReplay => self.replay_messages().await,
        }
    }

    fn notify(&self, status: &str) {
        tracing::info!(status, "[Restore] Progress");
        if let Some(cb) = self.progress {
            cb(status);
        }
    }

    async fn cosmetic(&mut self) {
        let target = self.target;
        let retry = &self.config.retry;

        if let Some(encoded) = &self.snapshot.source_community_icon {
            match BASE64.decode(encoded) {
                Ok(image) => {
                    let content_type = sniff_image_type(&image);
                    if let Err(e) = retry
                        .run("set_icon", || target.set_icon(&image, content_type))
                        .await
                    {
                        tracing::warn!(error = %e, "[Restore] Failed to set guild icon");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "[Restore] Stored guild icon is not valid base64"),
            }
        }

        let name = self.snapshot.source_community_name.as_str();
        if let Err(e) = retry.run("set_name", || target.set_name(name)).await {
            tracing::warn!(error = %e, "[Restore] Failed to set guild name");
        }
    }

    async fn teardown_channels(&mut self) {
        let target = self.target;
        let channels = match target.list_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                self.errors.record("List target channels", e);
                return;
            }
        };

        for channel in channels.iter().filter(|c| c.deletable) {
            match self
                .config
                .retry
                .run("delete_channel", || target.delete_channel(&channel.id))
                .await
            {
                Ok(()) => self.report.channels_deleted += 1,
                Err(e) => self.errors.record(format!("Delete channel #{}", channel.name), e),
            }
            pause(self.config.throttle.channel_delay).await;
        }
        tracing::debug!(deleted = self.report.channels_deleted, "[Restore] Channels torn down");
    }

    async fn teardown_roles(&mut self) {
        let target = self.target;
        let roles = match target.list_roles().await {
            Ok(roles) => roles,
            Err(e) => {
                self.errors.record("List target roles", e);
                return;
            }
        };

        let default_role_id = self.default_role_id.clone();
        let removable = roles.iter().filter(|r| {
            r.deletable && !r.managed && Some(r.id.as_str()) != default_role_id.as_deref()
        });
        for role in removable {
            match self
                .config
                .retry
                .run("delete_role", || target.delete_role(&role.id))
                .await
            {
                Ok(()) => self.report.roles_deleted += 1,
                Err(e) => self.errors.record(format!("Delete role \"{}\"", role.name), e),
            }
            pause(self.config.throttle.role_delay).await;
        }
        tracing::debug!(deleted = self.report.roles_deleted, "[Restore] Roles torn down");
    }

    async fn create_roles(&mut self) {
        let target = self.target;
        let snapshot = self.snapshot;

        if let Some(default_role_id) = &self.default_role_id {
            self.remap
                .insert_role(&snapshot.source_community_id, default_role_id);
        }

        let mut roles: Vec<_> = snapshot
            .roles
            .iter()
            .filter(|r| !snapshot.is_everyone_role(r))
            .collect();
        roles.sort_by(|a, b| b.position.cmp(&a.position));
        let total = roles.len();

        for role in roles {
            let spec = RoleSpec {
                name: role.name.clone(),
                color: role.color,
                position: role.position,
                permissions: role.permission_bits,
                mentionable: role.mentionable,
                hoist: role.hoisted,
            };
            match self
                .config
                .retry
                .run("create_role", || target.create_role(&spec))
                .await
            {
                Ok(new_id) => {
                    self.remap.insert_role(&role.id, &new_id);
                    self.report.roles_created += 1;
                }
                Err(e) => self.errors.record(format!("Role \"{}\"", role.name), e),
            }
            pause(self.config.throttle.role_delay).await;
        }

        tracing::debug!(mapped = self.remap.role_count(), "[Restore] Role ids remapped");
        self.notify(&format!(
            "Roles restored: {}/{}",
            self.report.roles_created, total
        ));
    }

    /// One channel pass: categories when `categories` is set, everything else otherwise.
    async fn create_channels(&mut self, categories: bool) {
        let target = self.target;
        let mut batch: Vec<&ChannelRecord> = self
            .snapshot
            .channels
            .iter()
            .filter(|c| (c.kind == ChannelKind::Category) == categories)
            .collect();
        batch.sort_by_key(|c| c.position);

        for channel in batch {
            let (overwrites, dropped) = self.remap.remap_overwrites(&channel.overwrites);
            if dropped > 0 {
                tracing::debug!(
                    channel = channel.name.as_str(),
                    dropped,
                    "[Restore] Dropped overwrites without a target subject"
                );
            }

            let parent_id = match channel.parent_id.as_deref() {
                Some(old) => {
                    let resolved = self.remap.channel(old).map(str::to_string);
                    if resolved.is_none() {
                        tracing::debug!(
                            channel = channel.name.as_str(),
                            parent = old,
                            "[Restore] Parent not restored, creating without parent"
                        );
                    }
                    resolved
                }
                None => None,
            };

            let spec = ChannelSpec {
                name: channel.name.clone(),
                kind: channel.kind,
                position: channel.position,
                parent_id,
                overwrites,
                topic: channel.topic.clone(),
                nsfw: channel.age_restricted,
                rate_limit_per_user: channel.slow_mode_seconds,
            };
            match self
                .config
                .retry
                .run("create_channel", || target.create_channel(&spec))
                .await
            {
                Ok(new_id) => {
                    self.remap.insert_channel(&channel.id, &new_id);
                    self.report.channels_created += 1;
                }
                Err(e) => self.errors.record(format!("Channel #{}", channel.name), e),
            }
            pause(self.config.throttle.channel_delay).await;
        }

        if !categories {
            tracing::debug!(mapped = self.remap.channel_count(), "[Restore] Channel ids remapped");
            self.notify(&format!(
                "Channels restored: {}/{}",
                self.report.channels_created,
                self.snapshot.channels.len()
            ));
        }
    }

    async fn create_emoji(&mut self) {
        let target = self.target;
        let snapshot = self.snapshot;

        match target.list_emoji().await {
            Ok(existing) => self.existing_emoji = existing.into_iter().map(|e| e.id).collect(),
            Err(e) => self.errors.record("List target emoji", e),
        }

        for emoji in &snapshot.emojis {
            let (image, content_type) = match self.emoji_image(emoji).await {
                Ok(image) => image,
                Err(e) => {
                    self.errors.record(format!("Emoji :{}:", emoji.name), e);
                    continue;
                }
            };
            let spec = EmojiSpec {
                name: emoji.name.clone(),
                image,
                content_type,
                role_ids: self.remap.remap_roles(&emoji.role_ids),
            };
            match self
                .config
                .retry
                .run("create_emoji", || target.create_emoji(&spec))
                .await
            {
                Ok(new_id) => {
                    self.created_emoji.insert(new_id);
                    self.report.emojis_created += 1;
                }
                Err(e) => self.errors.record(format!("Emoji :{}:", emoji.name), e),
            }
            pause(self.config.throttle.emoji_delay).await;
        }

        self.notify(&format!(
            "Emoji restored: {}/{}",
            self.report.emojis_created,
            snapshot.emojis.len()
        ));
    }

    /// Inlined image bytes, or a fresh download from the captured URL.
    async fn emoji_image(&self, emoji: &EmojiRecord) -> Result<(Vec<u8>, String), String> {
        if !emoji.image_bytes_base64.is_empty() {
            match BASE64.decode(&emoji.image_bytes_base64) {
                Ok(bytes) if !bytes.is_empty() => {
                    let content_type = if emoji.mime_type.is_empty() {
                        sniff_image_type(&bytes).to_string()
                    } else {
                        emoji.mime_type.clone()
                    };
                    return Ok((bytes, content_type));
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(
                    emoji = emoji.name.as_str(),
                    error = %e,
                    "[Restore] Inlined emoji image unreadable, trying URL"
                ),
            }
        }

        let Some(url) = emoji.url.as_deref() else {
            return Err("no image data".to_string());
        };
        let asset = self
            .config
            .retry
            .run("download_asset", || self.target.download_asset(url))
            .await
            .map_err(|e| e.to_string())?;
        Ok((asset.bytes, asset.content_type))
    }

    async fn delete_replaced_emoji(&mut self) {
        let target = self.target;
        let stale: Vec<String> = self
            .existing_emoji
            .iter()
            .filter(|id| !self.created_emoji.contains(*id))
            .cloned()
            .collect();

        for emoji_id in stale {
            match self
                .config
                .retry
                .run("delete_emoji", || target.delete_emoji(&emoji_id))
                .await
            {
                Ok(()) => self.report.emojis_deleted += 1,
                Err(e) => self.errors.record(format!("Delete emoji {}", emoji_id), e),
            }
            pause(self.config.throttle.emoji_delay).await;
        }
    }

    async fn replay_messages(&mut self) {
        if self.snapshot.messages.is_empty() {
            return;
        }
        let outcome = relay::replay(
            self.target,
            &self.snapshot.messages,
            &self.remap,
            self.config,
            self.progress,
        )
        .await;
        self.report.messages_restored = outcome.restored;
        self.report.messages_skipped = outcome.skipped;
        self.errors.extend(outcome.errors);
    }
}

/// Guess an image MIME type from its leading bytes. Defaults to PNG.
pub fn sniff_image_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/png",
    }
}
