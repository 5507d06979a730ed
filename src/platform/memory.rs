//! In-memory guild used by engine tests.
//!
//! Behaves like a strict platform: it rejects channels whose parent does not
//! exist, overwrites and emoji grants that reference unknown roles, and
//! emoji without image data. Individual operations can be made to fail or
//! throttle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::*;

#[derive(Default)]
struct State {
    info: Option<GuildInfo>,
    icon: Option<Vec<u8>>,
    roles: Vec<Role>,
    channels: Vec<Channel>,
    emoji: Vec<Emoji>,
    /// channel id → messages, oldest first
    messages: HashMap<String, Vec<Message>>,
    assets: HashMap<String, Asset>,
    history_denied: HashSet<String>,
    failing_roles: HashSet<String>,
    failing_channels: HashSet<String>,
    failing_downloads: HashSet<String>,
    failing_deletes: HashSet<String>,
    cosmetics_fail: bool,
    /// channel id → history pages served before fetches start failing
    history_page_budget: HashMap<String, usize>,
    /// Number of upcoming relay sends to answer with `Throttled`.
    throttled_sends: usize,
    failing_send_contents: HashSet<String>,
    relays: HashMap<String, RelayHandle>,
    /// (channel id, payload) in send order
    sent: Vec<(String, RelayPayload)>,
}

pub struct MemoryGuild {
    state: Mutex<State>,
    next_id: AtomicUsize,
}

impl MemoryGuild {
    /// A guild with only the @everyone role.
    pub fn new(id: &str, name: &str) -> Self {
        let state = State {
            info: Some(GuildInfo {
                id: id.to_string(),
                name: name.to_string(),
                icon_url: None,
                description: None,
                default_role_id: id.to_string(),
            }),
            roles: vec![Role {
                id: id.to_string(),
                name: "@everyone".to_string(),
                color: 0,
                position: 0,
                permissions: 1024 | 65536,
                mentionable: false,
                hoist: false,
                managed: false,
                deletable: false,
            }],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            next_id: AtomicUsize::new(1),
        }
    }

    fn id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // ── Builders ──────────────────────────────────────────────────────────

    pub fn with_icon(self, url: &str, bytes: &[u8]) -> Self {
        {
            let mut s = self.state();
            if let Some(info) = s.info.as_mut() {
                info.icon_url = Some(url.to_string());
            }
            s.assets.insert(
                url.to_string(),
                Asset {
                    bytes: bytes.to_vec(),
                    content_type: "image/png".to_string(),
                },
            );
        }
        self
    }

    pub fn add_role(&self, id: &str, name: &str, position: i32) {
        self.state().roles.push(Role {
            id: id.to_string(),
            name: name.to_string(),
            color: 0x336699,
            position,
            permissions: 2048,
            mentionable: true,
            hoist: false,
            managed: false,
            deletable: true,
        });
    }

    pub fn add_managed_role(&self, id: &str, name: &str, position: i32) {
        self.add_role(id, name, position);
        if let Some(role) = self.state().roles.iter_mut().find(|r| r.id == id) {
            role.managed = true;
            role.deletable = false;
        }
    }

    pub fn add_channel(
        &self,
        id: &str,
        name: &str,
        kind: ChannelKind,
        position: i32,
        parent_id: Option<&str>,
        overwrites: Vec<Overwrite>,
    ) {
        self.state().channels.push(Channel {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            position,
            parent_id: parent_id.map(str::to_string),
            overwrites,
            topic: None,
            nsfw: false,
            rate_limit_per_user: 0,
            deletable: true,
        });
    }

    pub fn add_emoji(&self, id: &str, name: &str, bytes: &[u8], role_ids: &[&str]) {
        let url = format!("https://cdn.test/emojis/{}.png", id);
        let mut s = self.state();
        s.assets.insert(
            url.clone(),
            Asset {
                bytes: bytes.to_vec(),
                content_type: "image/png".to_string(),
            },
        );
        s.emoji.push(Emoji {
            id: id.to_string(),
            name: name.to_string(),
            animated: false,
            url,
            role_ids: role_ids.iter().map(|r| r.to_string()).collect(),
        });
    }

    /// Append `count` messages to a channel, oldest first.
    pub fn add_messages(&self, channel_id: &str, count: usize) {
        let mut s = self.state();
        let list = s.messages.entry(channel_id.to_string()).or_default();
        let start = list.len();
        for i in start..start + count {
            list.push(Message {
                id: format!("{}-m{}", channel_id, i),
                content: format!("{} message {}", channel_id, i),
                author_name: format!("user{}", i % 3),
                author_avatar_url: None,
                timestamp_ms: 1_700_000_000_000 + i as i64,
                embeds: vec![],
                attachments: vec![],
            });
        }
    }

    // ── Fault injection ───────────────────────────────────────────────────

    pub fn deny_history(&self, channel_id: &str) {
        self.state().history_denied.insert(channel_id.to_string());
    }

    pub fn fail_role(&self, name: &str) {
        self.state().failing_roles.insert(name.to_string());
    }

    pub fn fail_channel(&self, name: &str) {
        self.state().failing_channels.insert(name.to_string());
    }

    pub fn fail_download(&self, url: &str) {
        self.state().failing_downloads.insert(url.to_string());
    }

    pub fn fail_delete(&self, id: &str) {
        self.state().failing_deletes.insert(id.to_string());
    }

    /// Make `set_icon` and `set_name` fail.
    pub fn fail_cosmetics(&self) {
        self.state().cosmetics_fail = true;
    }

    /// Serve `pages` history pages for a channel, then fail every fetch.
    pub fn fail_history_after(&self, channel_id: &str, pages: usize) {
        self.state()
            .history_page_budget
            .insert(channel_id.to_string(), pages);
    }

    pub fn throttle_sends(&self, count: usize) {
        self.state().throttled_sends = count;
    }

    pub fn fail_send_containing(&self, content: &str) {
        self.state().failing_send_contents.insert(content.to_string());
    }

    // ── Inspection ────────────────────────────────────────────────────────

    pub fn name(&self) -> String {
        self.state().info.as_ref().map(|i| i.name.clone()).unwrap_or_default()
    }

    pub fn icon(&self) -> Option<Vec<u8>> {
        self.state().icon.clone()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.state().roles.clone()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.state().channels.clone()
    }

    pub fn emoji(&self) -> Vec<Emoji> {
        self.state().emoji.clone()
    }

    pub fn sent(&self) -> Vec<(String, RelayPayload)> {
        self.state().sent.clone()
    }

    pub fn relay_count(&self) -> usize {
        self.state().relays.len()
    }

    pub fn channel_by_name(&self, name: &str) -> Option<Channel> {
        self.state().channels.iter().find(|c| c.name == name).cloned()
    }

    pub fn role_by_name(&self, name: &str) -> Option<Role> {
        self.state().roles.iter().find(|r| r.name == name).cloned()
    }
}

fn fail<T>(msg: impl Into<String>) -> CallResult<T> {
    Err(PlatformError::Failed(msg.into()))
}

#[async_trait]
impl GuildReader for MemoryGuild {
    async fn guild_info(&self) -> CallResult<GuildInfo> {
        match self.state().info.clone() {
            Some(info) => Ok(info),
            None => fail("404: Unknown Guild"),
        }
    }

    async fn list_roles(&self) -> CallResult<Vec<Role>> {
        Ok(self.roles())
    }

    async fn list_channels(&self) -> CallResult<Vec<Channel>> {
        Ok(self.channels())
    }

    async fn channel_permissions(&self, channel_id: &str) -> CallResult<Permissions> {
        if self.state().history_denied.contains(channel_id) {
            Ok(Permissions::VIEW_CHANNEL)
        } else {
            Ok(Permissions::VIEW_CHANNEL.merge(Permissions::READ_MESSAGE_HISTORY))
        }
    }

    async fn fetch_history_page(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> CallResult<Vec<Message>> {
        let mut s = self.state();
        if let Some(budget) = s.history_page_budget.get_mut(channel_id) {
            if *budget == 0 {
                return fail("500: Internal Server Error");
            }
            *budget -= 1;
        }
        let Some(all) = s.messages.get(channel_id) else {
            return Ok(Vec::new());
        };
        let end = match before {
            Some(id) => all.iter().position(|m| m.id == id).unwrap_or(0),
            None => all.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(all[start..end].iter().rev().cloned().collect())
    }

    async fn list_emoji(&self) -> CallResult<Vec<Emoji>> {
        Ok(self.emoji())
    }

    async fn download_asset(&self, url: &str) -> CallResult<Asset> {
        let s = self.state();
        if s.failing_downloads.contains(url) {
            return fail("503: CDN unavailable");
        }
        match s.assets.get(url) {
            Some(asset) => Ok(asset.clone()),
            None => fail("404: Not Found"),
        }
    }
}

#[async_trait]
impl GuildWriter for MemoryGuild {
    async fn create_role(&self, spec: &RoleSpec) -> CallResult<String> {
        if self.state().failing_roles.contains(&spec.name) {
            return fail("403: Missing Permissions");
        }
        let id = self.id("role-");
        self.state().roles.push(Role {
            id: id.clone(),
            name: spec.name.clone(),
            color: spec.color,
            position: spec.position,
            permissions: spec.permissions,
            mentionable: spec.mentionable,
            hoist: spec.hoist,
            managed: false,
            deletable: true,
        });
        Ok(id)
    }

    async fn delete_role(&self, role_id: &str) -> CallResult<()> {
        let mut s = self.state();
        if s.failing_deletes.contains(role_id) {
            return fail("403: Missing Permissions");
        }
        let before = s.roles.len();
        s.roles.retain(|r| r.id != role_id);
        if s.roles.len() == before {
            return fail("404: Unknown Role");
        }
        for emoji in s.emoji.iter_mut() {
            emoji.role_ids.retain(|r| r != role_id);
        }
        Ok(())
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> CallResult<String> {
        let id = self.id("chan-");
        let mut s = self.state();
        if s.failing_channels.contains(&spec.name) {
            return fail("400: Invalid Form Body");
        }
        if let Some(parent) = &spec.parent_id {
            let parent_ok = s
                .channels
                .iter()
                .any(|c| &c.id == parent && c.kind == ChannelKind::Category);
            if !parent_ok {
                return fail(format!("400: Unknown parent category {}", parent));
            }
        }
        for ow in &spec.overwrites {
            if ow.kind == OverwriteKind::Role && !s.roles.iter().any(|r| r.id == ow.id) {
                return fail(format!("400: Unknown overwrite role {}", ow.id));
            }
        }
        s.channels.push(Channel {
            id: id.clone(),
            name: spec.name.clone(),
            kind: spec.kind,
            position: spec.position,
            parent_id: spec.parent_id.clone(),
            overwrites: spec.overwrites.clone(),
            topic: spec.topic.clone(),
            nsfw: spec.nsfw,
            rate_limit_per_user: spec.rate_limit_per_user,
            deletable: true,
        });
        Ok(id)
    }

    async fn delete_channel(&self, channel_id: &str) -> CallResult<()> {
        let mut s = self.state();
        if s.failing_deletes.contains(channel_id) {
            return fail("403: Missing Permissions");
        }
        let before = s.channels.len();
        s.channels.retain(|c| c.id != channel_id);
        if s.channels.len() == before {
            return fail("404: Unknown Channel");
        }
        for channel in s.channels.iter_mut() {
            if channel.parent_id.as_deref() == Some(channel_id) {
                channel.parent_id = None;
            }
        }
        s.messages.remove(channel_id);
        s.relays.remove(channel_id);
        Ok(())
    }

    async fn create_emoji(&self, spec: &EmojiSpec) -> CallResult<String> {
        if spec.image.is_empty() {
            return fail("400: Invalid image data");
        }
        let id = self.id("emoji-");
        let mut s = self.state();
        if let Some(unknown) = spec.role_ids.iter().find(|r| !s.roles.iter().any(|x| &x.id == *r)) {
            return fail(format!("400: Unknown role {}", unknown));
        }
        let url = format!("https://cdn.test/emojis/{}.png", id);
        s.assets.insert(
            url.clone(),
            Asset {
                bytes: spec.image.clone(),
                content_type: spec.content_type.clone(),
            },
        );
        s.emoji.push(Emoji {
            id: id.clone(),
            name: spec.name.clone(),
            animated: spec.content_type == "image/gif",
            url,
            role_ids: spec.role_ids.clone(),
        });
        Ok(id)
    }

    async fn delete_emoji(&self, emoji_id: &str) -> CallResult<()> {
        let mut s = self.state();
        let before = s.emoji.len();
        s.emoji.retain(|e| e.id != emoji_id);
        if s.emoji.len() == before {
            return fail("404: Unknown Emoji");
        }
        Ok(())
    }

    async fn set_icon(&self, image: &[u8], _content_type: &str) -> CallResult<()> {
        let mut s = self.state();
        if s.cosmetics_fail {
            return fail("403: Missing Permissions");
        }
        s.icon = Some(image.to_vec());
        Ok(())
    }

    async fn set_name(&self, name: &str) -> CallResult<()> {
        let mut s = self.state();
        if s.cosmetics_fail {
            return fail("403: Missing Permissions");
        }
        if let Some(info) = s.info.as_mut() {
            info.name = name.to_string();
        }
        Ok(())
    }

    async fn get_or_create_relay(&self, channel_id: &str, _name: &str) -> CallResult<RelayHandle> {
        let id = self.id("wh-");
        let mut s = self.state();
        if !s.channels.iter().any(|c| c.id == channel_id) {
            return fail("404: Unknown Channel");
        }
        let handle = s
            .relays
            .entry(channel_id.to_string())
            .or_insert_with(|| RelayHandle {
                id,
                token: format!("token-{}", channel_id),
            })
            .clone();
        Ok(handle)
    }

    async fn relay_send(&self, relay: &RelayHandle, payload: &RelayPayload) -> CallResult<()> {
        // Yield so concurrent relay tasks interleave like real I/O.
        tokio::task::yield_now().await;

        let mut s = self.state();
        if s.throttled_sends > 0 {
            s.throttled_sends -= 1;
            return Err(PlatformError::Throttled {
                retry_after: Duration::from_millis(1),
            });
        }
        if s.failing_send_contents.iter().any(|c| payload.content.contains(c)) {
            return fail("400: Cannot send an empty message");
        }
        let channel_id = s
            .relays
            .iter()
            .find(|(_, h)| *h == relay)
            .map(|(c, _)| c.clone());
        match channel_id {
            Some(channel_id) => {
                s.sent.push((channel_id, payload.clone()));
                Ok(())
            }
            None => fail("404: Unknown Webhook"),
        }
    }
}
