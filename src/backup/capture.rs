//! Capture engine: walks a live guild and writes one immutable snapshot.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;

use crate::config::{pause, EngineConfig};
use crate::error::{Error, Result};
use crate::permissions::can_read_history;
use crate::platform::{Channel, ChannelKind, GuildReader, Message};
use crate::snapshot::{
    AttachmentRecord, ChannelRecord, EmojiRecord, MessageFetchError, MessageRecord,
    OverwriteRecord, RoleRecord, Snapshot, SnapshotStore,
};

/// History page size (the platform maximum).
const HISTORY_PAGE_SIZE: usize = 100;

/// What to capture and who asked for it.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub name: String,
    /// Per-channel cap on captured messages. `None` captures everything.
    pub message_limit: Option<usize>,
    pub created_by: String,
}

/// Capture `reader`'s guild and persist the snapshot in `store`.
///
/// Fails with [`Error::DuplicateName`] when the guild already has a snapshot
/// with the same name (case-insensitive). Channels whose history cannot be
/// read, and emoji whose image cannot be downloaded, do not fail the capture.
pub async fn capture<R>(
    reader: &R,
    store: &SnapshotStore,
    request: &CaptureRequest,
    config: &EngineConfig,
) -> Result<Snapshot>
where
    R: GuildReader + ?Sized,
{
    let info = reader.guild_info().await?;
    let name = request.name.trim().to_string();
    let guild_id = info.id.as_str();

    let lowered = name.to_lowercase();
    if store
        .list(guild_id, None, false)
        .iter()
        .any(|s| s.name.to_lowercase() == lowered)
    {
        return Err(Error::DuplicateName {
            guild_id: guild_id.to_string(),
            name,
        });
    }

    tracing::info!(guild_id, name = name.as_str(), "[Capture] Starting capture");

    let icon = match &info.icon_url {
        Some(url) => match reader.download_asset(url).await {
            Ok(asset) => Some(BASE64.encode(&asset.bytes)),
            Err(e) => {
                tracing::warn!(guild_id, error = %e, "[Capture] Failed to download guild icon");
                None
            }
        },
        None => None,
    };

    let roles: Vec<RoleRecord> = reader
        .list_roles()
        .await?
        .into_iter()
        .map(|r| RoleRecord {
            id: r.id,
            name: r.name,
            color: r.color,
            position: r.position,
            permission_bits: r.permissions,
            mentionable: r.mentionable,
            hoisted: r.hoist,
        })
        .collect();

    let live_channels = order_categories_first(reader.list_channels().await?);
    let channels: Vec<ChannelRecord> = live_channels.iter().map(channel_record).collect();

    let mut messages = Vec::new();
    let mut fetch_errors = Vec::new();
    if request.message_limit != Some(0) {
        for channel in live_channels.iter().filter(|c| c.kind.is_text_capable()) {
            match capture_history(reader, channel, request.message_limit, config).await {
                Ok(history) => messages.extend(history),
                Err((partial, error)) => {
                    tracing::warn!(
                        guild_id,
                        channel = channel.name.as_str(),
                        error = error.as_str(),
                        "[Capture] Skipping channel history"
                    );
                    messages.extend(partial);
                    fetch_errors.push(MessageFetchError {
                        channel_id: channel.id.clone(),
                        channel_name: channel.name.clone(),
                        error,
                    });
                }
            }
            pause(config.throttle.fetch_delay).await;
        }
    }

    let mut emojis = Vec::new();
    for emoji in reader.list_emoji().await? {
        match reader.download_asset(&emoji.url).await {
            Ok(asset) => emojis.push(EmojiRecord {
                id: emoji.id,
                name: emoji.name,
                animated: emoji.animated,
                image_bytes_base64: BASE64.encode(&asset.bytes),
                mime_type: asset.content_type,
                role_ids: emoji.role_ids,
                url: Some(emoji.url),
            }),
            Err(e) => {
                tracing::warn!(
                    guild_id,
                    emoji = emoji.name.as_str(),
                    error = %e,
                    "[Capture] Failed to download emoji, omitting"
                );
            }
        }
        pause(config.throttle.fetch_delay).await;
    }

    let snapshot = Snapshot {
        id: next_snapshot_id(store, guild_id),
        source_community_id: info.id.clone(),
        source_community_name: info.name,
        source_community_icon: icon,
        source_community_description: info.description,
        name,
        roles,
        channels,
        emojis,
        messages,
        message_fetch_errors: fetch_errors,
        created_at: Utc::now().timestamp_millis(),
        created_by: request.created_by.clone(),
    };

    store.write(&snapshot)?;

    tracing::info!(
        guild_id,
        snapshot_id = snapshot.id.as_str(),
        roles = snapshot.roles.len(),
        channels = snapshot.channels.len(),
        emojis = snapshot.emojis.len(),
        messages = snapshot.messages.len(),
        fetch_errors = snapshot.message_fetch_errors.len(),
        "[Capture] Capture complete"
    );
    Ok(snapshot)
}

/// Categories first, then everything else; each group by position.
fn order_categories_first(mut channels: Vec<Channel>) -> Vec<Channel> {
    channels.sort_by_key(|c| (c.kind != ChannelKind::Category, c.position));
    channels
}

fn channel_record(channel: &Channel) -> ChannelRecord {
    ChannelRecord {
        id: channel.id.clone(),
        name: channel.name.clone(),
        kind: channel.kind,
        position: channel.position,
        parent_id: channel.parent_id.clone(),
        overwrites: channel
            .overwrites
            .iter()
            .map(|ow| OverwriteRecord {
                subject_id: ow.id.clone(),
                subject_kind: ow.kind,
                allow_bits: ow.allow,
                deny_bits: ow.deny,
            })
            .collect(),
        topic: channel.topic.clone(),
        age_restricted: channel.nsfw,
        slow_mode_seconds: channel.rate_limit_per_user,
    }
}

/// Page backward through a channel's history and return it oldest first.
///
/// On failure returns whatever was collected so far alongside the error.
async fn capture_history<R>(
    reader: &R,
    channel: &Channel,
    limit: Option<usize>,
    config: &EngineConfig,
) -> std::result::Result<Vec<MessageRecord>, (Vec<MessageRecord>, String)>
where
    R: GuildReader + ?Sized,
{
    match reader.channel_permissions(&channel.id).await {
        Ok(perms) if can_read_history(perms) => {}
        Ok(_) => {
            return Err((
                Vec::new(),
                "Missing View Channel or Read Message History permission".to_string(),
            ))
        }
        Err(e) => return Err((Vec::new(), format!("Permission check failed: {}", e))),
    }

    let mut collected: Vec<Message> = Vec::new();
    let mut before: Option<String> = None;
    let mut failure = None;

    loop {
        let remaining = limit.map_or(usize::MAX, |l| l.saturating_sub(collected.len()));
        if remaining == 0 {
            break;
        }
        let page_size = remaining.min(HISTORY_PAGE_SIZE);

        let page = config
            .retry
            .run("fetch_history_page", || {
                reader.fetch_history_page(&channel.id, page_size, before.as_deref())
            })
            .await;

        match page {
            Ok(page) => {
                let exhausted = page.len() < page_size;
                before = page.last().map(|m| m.id.clone());
                collected.extend(page);
                if exhausted || before.is_none() {
                    break;
                }
            }
            Err(e) => {
                failure = Some(format!("History fetch failed: {}", e));
                break;
            }
        }
    }

    // Pages arrive newest first.
    collected.reverse();
    let records: Vec<MessageRecord> = collected
        .into_iter()
        .map(|m| message_record(&channel.id, m))
        .collect();

    tracing::debug!(
        channel = channel.name.as_str(),
        messages = records.len(),
        "[Capture] Channel history captured"
    );

    match failure {
        Some(error) => Err((records, error)),
        None => Ok(records),
    }
}

fn message_record(channel_id: &str, message: Message) -> MessageRecord {
    MessageRecord {
        source_channel_id: channel_id.to_string(),
        content: message.content,
        author_name: message.author_name,
        author_avatar_url: message.author_avatar_url,
        timestamp_ms: message.timestamp_ms,
        embeds: message.embeds,
        attachments: message
            .attachments
            .into_iter()
            .map(|a| AttachmentRecord {
                filename: a.filename,
                url: a.url,
            })
            .collect(),
    }
}

/// Epoch-millisecond id, bumped until unique within the guild.
fn next_snapshot_id(store: &SnapshotStore, guild_id: &str) -> String {
    let mut candidate = Utc::now().timestamp_millis();
    while store.contains(guild_id, &candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryGuild;
    use crate::platform::{Overwrite, OverwriteKind};

    fn request(name: &str, limit: Option<usize>) -> CaptureRequest {
        CaptureRequest {
            name: name.to_string(),
            message_limit: limit,
            created_by: "user-1".to_string(),
        }
    }

    fn source_guild() -> MemoryGuild {
        let guild = MemoryGuild::new("111", "Source").with_icon("https://cdn.test/icon.png", b"ICON");
        guild.add_role("r-admin", "Admin", 2);
        guild.add_role("r-mod", "Moderator", 1);
        guild.add_channel("c-text", "chat", ChannelKind::Text, 0, Some("c-cat"), vec![
            Overwrite {
                id: "r-mod".to_string(),
                kind: OverwriteKind::Role,
                allow: 8192,
                deny: 0,
            },
        ]);
        guild.add_channel("c-cat", "General", ChannelKind::Category, 0, None, vec![]);
        guild.add_channel("c-voice", "Voice", ChannelKind::Voice, 1, Some("c-cat"), vec![]);
        guild.add_emoji("e-1", "wave", b"PNGDATA", &["r-mod"]);
        guild
    }

    #[tokio::test]
    async fn test_capture_structure() {
        let guild = source_guild();
        let store = SnapshotStore::new(None);

        let snapshot = capture(&guild, &store, &request("weekly", None), &EngineConfig::for_tests())
            .await
            .unwrap();

        assert_eq!(snapshot.source_community_id, "111");
        assert_eq!(snapshot.source_community_name, "Source");
        assert_eq!(snapshot.source_community_icon.as_deref(), Some(BASE64.encode(b"ICON").as_str()));
        assert_eq!(snapshot.roles.len(), 3);
        assert!(snapshot.roles.iter().any(|r| snapshot.is_everyone_role(r)));
        assert_eq!(snapshot.channels.len(), 3);
        assert_eq!(snapshot.channels[0].kind, ChannelKind::Category);
        assert_eq!(snapshot.channels[1].overwrites[0].subject_id, "r-mod");
        assert_eq!(snapshot.emojis.len(), 1);
        assert_eq!(snapshot.emojis[0].image_bytes_base64, BASE64.encode(b"PNGDATA"));
        assert_eq!(snapshot.emojis[0].mime_type, "image/png");
        assert!(store.contains("111", &snapshot.id));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_per_guild() {
        let store = SnapshotStore::new(None);
        let config = EngineConfig::for_tests();

        capture(&source_guild(), &store, &request("foo", None), &config).await.unwrap();
        let second = capture(&source_guild(), &store, &request("FOO", None), &config).await;
        assert!(matches!(second, Err(Error::DuplicateName { .. })));

        let other = MemoryGuild::new("222", "Other");
        assert!(capture(&other, &store, &request("foo", None), &config).await.is_ok());
    }

    #[tokio::test]
    async fn test_history_paged_and_chronological() {
        let guild = source_guild();
        guild.add_messages("c-text", 250);
        let store = SnapshotStore::new(None);

        let snapshot = capture(&guild, &store, &request("full", None), &EngineConfig::for_tests())
            .await
            .unwrap();

        let text: Vec<&MessageRecord> = snapshot
            .messages
            .iter()
            .filter(|m| m.source_channel_id == "c-text")
            .collect();
        assert_eq!(text.len(), 250);
        assert!(text.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
        assert_eq!(text[0].content, "c-text message 0");
    }

    #[tokio::test]
    async fn test_message_limit_keeps_newest() {
        let guild = source_guild();
        guild.add_messages("c-text", 150);
        let store = SnapshotStore::new(None);

        let snapshot = capture(&guild, &store, &request("capped", Some(120)), &EngineConfig::for_tests())
            .await
            .unwrap();

        assert_eq!(snapshot.messages.len(), 120);
        assert_eq!(snapshot.messages[0].content, "c-text message 30");
        assert_eq!(snapshot.messages[119].content, "c-text message 149");
    }

    #[tokio::test]
    async fn test_missing_history_permission_is_partial() {
        let guild = source_guild();
        guild.add_messages("c-text", 5);
        guild.add_messages("c-voice", 3);
        guild.deny_history("c-text");
        let store = SnapshotStore::new(None);

        let snapshot = capture(&guild, &store, &request("partial", None), &EngineConfig::for_tests())
            .await
            .unwrap();

        assert_eq!(snapshot.message_fetch_errors.len(), 1);
        assert_eq!(snapshot.message_fetch_errors[0].channel_id, "c-text");
        assert_eq!(snapshot.message_fetch_errors[0].channel_name, "chat");
        assert_eq!(snapshot.messages.len(), 3);
        assert!(snapshot.messages.iter().all(|m| m.source_channel_id == "c-voice"));
    }

    #[tokio::test]
    async fn test_history_failure_keeps_fetched_pages() {
        let guild = source_guild();
        guild.add_messages("c-text", 250);
        guild.fail_history_after("c-text", 1);
        let store = SnapshotStore::new(None);

        let snapshot = capture(&guild, &store, &request("midway", None), &EngineConfig::for_tests())
            .await
            .unwrap();

        assert_eq!(snapshot.message_fetch_errors.len(), 1);
        assert_eq!(snapshot.message_fetch_errors[0].channel_id, "c-text");
        assert!(snapshot.message_fetch_errors[0].error.contains("500"));

        // The newest page survived, still oldest first.
        let text: Vec<&MessageRecord> = snapshot
            .messages
            .iter()
            .filter(|m| m.source_channel_id == "c-text")
            .collect();
        assert_eq!(text.len(), 100);
        assert_eq!(text[0].content, "c-text message 150");
        assert_eq!(text[99].content, "c-text message 249");
    }

    #[tokio::test]
    async fn test_failed_emoji_download_omitted() {
        let guild = source_guild();
        guild.add_emoji("e-2", "broken", b"X", &[]);
        guild.fail_download("https://cdn.test/emojis/e-2.png");
        let store = SnapshotStore::new(None);

        let snapshot = capture(&guild, &store, &request("emoji", None), &EngineConfig::for_tests())
            .await
            .unwrap();

        assert_eq!(snapshot.emojis.len(), 1);
        assert_eq!(snapshot.emojis[0].name, "wave");
    }

    #[tokio::test]
    async fn test_zero_limit_skips_history() {
        let guild = source_guild();
        guild.add_messages("c-text", 10);
        let store = SnapshotStore::new(None);

        let snapshot = capture(&guild, &store, &request("structure", Some(0)), &EngineConfig::for_tests())
            .await
            .unwrap();
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.message_fetch_errors.is_empty());
    }
}
