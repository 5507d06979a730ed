//! Discord REST adapter.
//!
//! Implements [`GuildReader`] and [`GuildWriter`] for one guild using a bot
//! token. HTTP 429 is surfaced as [`PlatformError::Throttled`] with the
//! server's `retry_after`; every other non-success status becomes
//! [`PlatformError::Failed`] carrying the status and Discord's message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::*;
use crate::permissions::{compute_channel_permissions, OverwriteBits};

/// Discord CDN base URL.
const CDN_URL: &str = "https://cdn.discordapp.com";

/// Wait used when a 429 carries no usable retry interval.
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

// ── API Response Types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DiscordGuildResponse {
    id: String,
    name: String,
    icon: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    owner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordRoleResponse {
    id: String,
    name: String,
    #[serde(default)]
    color: u32,
    #[serde(default)]
    hoist: bool,
    #[serde(default)]
    position: i32,
    #[serde(default)]
    permissions: String,
    #[serde(default)]
    managed: bool,
    #[serde(default)]
    mentionable: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordChannelResponse {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    channel_type: u8,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: i32,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    nsfw: bool,
    #[serde(default)]
    rate_limit_per_user: u32,
    #[serde(default)]
    permission_overwrites: Vec<DiscordOverwrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiscordOverwrite {
    id: String,
    #[serde(rename = "type")]
    overwrite_type: u8,
    #[serde(default)]
    allow: String,
    #[serde(default)]
    deny: String,
}

#[derive(Debug, Deserialize)]
struct DiscordUserResponse {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordMemberResponse {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordAttachmentResponse {
    filename: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct DiscordMessageResponse {
    id: String,
    #[serde(default)]
    content: String,
    author: DiscordUserResponse,
    timestamp: String,
    #[serde(default)]
    embeds: Vec<serde_json::Value>,
    #[serde(default)]
    attachments: Vec<DiscordAttachmentResponse>,
}

#[derive(Debug, Deserialize)]
struct DiscordEmojiResponse {
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    animated: bool,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordWebhookResponse {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordCreatedResponse {
    id: String,
}

// ── Adapter ──────────────────────────────────────────────────────────────────

/// Bot identity in the guild, resolved once per adapter.
#[derive(Debug, Clone)]
struct BotMember {
    user_id: String,
    role_ids: Vec<String>,
}

/// One Discord guild, accessed with a bot token.
pub struct DiscordGuild {
    client: Client,
    api_url: String,
    bot_token: String,
    guild_id: String,
    bot: OnceCell<BotMember>,
}

impl DiscordGuild {
    pub fn new(client: Client, api_url: &str, bot_token: &str, guild_id: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            guild_id: guild_id.to_string(),
            bot: OnceCell::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> CallResult<Response> {
        let response = request
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await
            .map_err(|e| PlatformError::Failed(format!("Discord request failed: {}", e)))?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CallResult<T> {
        let response = self.send(self.client.get(self.url(path))).await?;
        parse_json(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> CallResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.client.post(self.url(path)).json(body))
            .await?;
        parse_json(response).await
    }

    async fn patch<B: Serialize + ?Sized + Sync>(&self, path: &str, body: &B) -> CallResult<()> {
        self.send(self.client.patch(self.url(path)).json(body))
            .await
            .map(|_| ())
    }

    async fn delete(&self, path: &str) -> CallResult<()> {
        self.send(self.client.delete(self.url(path))).await.map(|_| ())
    }

    async fn fetch_guild(&self) -> CallResult<DiscordGuildResponse> {
        self.get_json(&format!("/guilds/{}", self.guild_id)).await
    }

    async fn fetch_roles(&self) -> CallResult<Vec<DiscordRoleResponse>> {
        self.get_json(&format!("/guilds/{}/roles", self.guild_id))
            .await
    }

    async fn bot_member(&self) -> CallResult<&BotMember> {
        self.bot
            .get_or_try_init(|| async {
                let me: DiscordUserResponse = self.get_json("/users/@me").await?;
                let member: DiscordMemberResponse = self
                    .get_json(&format!("/guilds/{}/members/{}", self.guild_id, me.id))
                    .await?;
                tracing::debug!(
                    guild_id = self.guild_id.as_str(),
                    bot_user_id = me.id.as_str(),
                    "Resolved bot member"
                );
                Ok::<_, PlatformError>(BotMember {
                    user_id: me.id,
                    role_ids: member.roles,
                })
            })
            .await
    }
}

#[async_trait]
impl GuildReader for DiscordGuild {
    async fn guild_info(&self) -> CallResult<GuildInfo> {
        let guild = self.fetch_guild().await?;
        Ok(GuildInfo {
            icon_url: guild.icon.as_deref().map(|hash| icon_url(&guild.id, hash)),
            default_role_id: guild.id.clone(),
            id: guild.id,
            name: guild.name,
            description: guild.description,
        })
    }

    async fn list_roles(&self) -> CallResult<Vec<Role>> {
        let roles = self.fetch_roles().await?;
        let bot = self.bot_member().await?;
        let top = bot_top_position(&roles, &bot.role_ids);

        Ok(roles
            .into_iter()
            .map(|r| Role {
                deletable: !r.managed && r.id != self.guild_id && r.position < top,
                permissions: Permissions::from_string(&r.permissions).bits(),
                id: r.id,
                name: r.name,
                color: r.color,
                position: r.position,
                mentionable: r.mentionable,
                hoist: r.hoist,
                managed: r.managed,
            })
            .collect())
    }

    async fn list_channels(&self) -> CallResult<Vec<Channel>> {
        let channels: Vec<DiscordChannelResponse> = self
            .get_json(&format!("/guilds/{}/channels", self.guild_id))
            .await?;
        Ok(channels.into_iter().map(channel_from_response).collect())
    }

    async fn channel_permissions(&self, channel_id: &str) -> CallResult<Permissions> {
        let guild = self.fetch_guild().await?;
        let bot = self.bot_member().await?;
        if guild.owner_id == bot.user_id {
            return Ok(Permissions::ALL);
        }

        let roles = self.fetch_roles().await?;
        let base = roles
            .iter()
            .filter(|r| r.id == self.guild_id || bot.role_ids.contains(&r.id))
            .fold(Permissions::NONE, |acc, r| {
                acc.merge(Permissions::from_string(&r.permissions))
            });

        let channel: DiscordChannelResponse =
            self.get_json(&format!("/channels/{}", channel_id)).await?;
        let bits = |ow: &DiscordOverwrite| OverwriteBits {
            allow: ow.allow.parse().unwrap_or(0),
            deny: ow.deny.parse().unwrap_or(0),
        };
        let everyone = channel
            .permission_overwrites
            .iter()
            .find(|ow| ow.overwrite_type == 0 && ow.id == self.guild_id)
            .map(bits);
        let role_overwrites: Vec<OverwriteBits> = channel
            .permission_overwrites
            .iter()
            .filter(|ow| ow.overwrite_type == 0 && bot.role_ids.contains(&ow.id))
            .map(bits)
            .collect();
        let member = channel
            .permission_overwrites
            .iter()
            .find(|ow| ow.overwrite_type == 1 && ow.id == bot.user_id)
            .map(bits);

        Ok(compute_channel_permissions(base, everyone, &role_overwrites, member))
    }

    async fn fetch_history_page(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> CallResult<Vec<Message>> {
        let mut path = format!("/channels/{}/messages?limit={}", channel_id, limit.min(100));
        if let Some(before) = before {
            path.push_str(&format!("&before={}", before));
        }
        let messages: Vec<DiscordMessageResponse> = self.get_json(&path).await?;
        Ok(messages.into_iter().map(message_from_response).collect())
    }

    async fn list_emoji(&self) -> CallResult<Vec<Emoji>> {
        let emoji: Vec<DiscordEmojiResponse> = self
            .get_json(&format!("/guilds/{}/emojis", self.guild_id))
            .await?;
        Ok(emoji
            .into_iter()
            .filter_map(|e| {
                let id = e.id?;
                Some(Emoji {
                    url: emoji_url(&id, e.animated),
                    name: e.name.unwrap_or_default(),
                    animated: e.animated,
                    role_ids: e.roles,
                    id,
                })
            })
            .collect())
    }

    async fn download_asset(&self, url: &str) -> CallResult<Asset> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlatformError::Failed(format!("Asset download failed: {}", e)))?;
        let response = check_status(response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::Failed(format!("Asset download failed: {}", e)))?;
        Ok(Asset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[async_trait]
impl GuildWriter for DiscordGuild {
    async fn create_role(&self, spec: &RoleSpec) -> CallResult<String> {
        let body = serde_json::json!({
            "name": spec.name,
            "color": spec.color,
            "permissions": spec.permissions.to_string(),
            "mentionable": spec.mentionable,
            "hoist": spec.hoist,
        });
        let created: DiscordCreatedResponse = self
            .post_json(&format!("/guilds/{}/roles", self.guild_id), &body)
            .await?;

        // Roles are created at the bottom; move it into place separately.
        let positions = serde_json::json!([{ "id": created.id, "position": spec.position }]);
        if let Err(e) = self
            .patch(&format!("/guilds/{}/roles", self.guild_id), &positions)
            .await
        {
            tracing::warn!(
                role = spec.name.as_str(),
                error = %e,
                "Failed to set role position"
            );
        }
        Ok(created.id)
    }

    async fn delete_role(&self, role_id: &str) -> CallResult<()> {
        self.delete(&format!("/guilds/{}/roles/{}", self.guild_id, role_id))
            .await
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> CallResult<String> {
        let overwrites: Vec<DiscordOverwrite> = spec
            .overwrites
            .iter()
            .map(|ow| DiscordOverwrite {
                id: ow.id.clone(),
                overwrite_type: ow.kind.as_discord_type(),
                allow: ow.allow.to_string(),
                deny: ow.deny.to_string(),
            })
            .collect();
        let mut body = serde_json::json!({
            "name": spec.name,
            "type": spec.kind.as_discord_type(),
            "position": spec.position,
            "permission_overwrites": overwrites,
        });
        if spec.kind != ChannelKind::Category {
            body["parent_id"] = serde_json::json!(spec.parent_id);
            body["nsfw"] = serde_json::json!(spec.nsfw);
        }
        if spec.kind.is_text_capable() && spec.kind != ChannelKind::Voice {
            body["topic"] = serde_json::json!(spec.topic);
            body["rate_limit_per_user"] = serde_json::json!(spec.rate_limit_per_user);
        }

        let created: DiscordCreatedResponse = self
            .post_json(&format!("/guilds/{}/channels", self.guild_id), &body)
            .await?;
        Ok(created.id)
    }

    async fn delete_channel(&self, channel_id: &str) -> CallResult<()> {
        self.delete(&format!("/channels/{}", channel_id)).await
    }

    async fn create_emoji(&self, spec: &EmojiSpec) -> CallResult<String> {
        let body = serde_json::json!({
            "name": spec.name,
            "image": data_uri(&spec.content_type, &spec.image),
            "roles": spec.role_ids,
        });
        let created: DiscordCreatedResponse = self
            .post_json(&format!("/guilds/{}/emojis", self.guild_id), &body)
            .await?;
        Ok(created.id)
    }

    async fn delete_emoji(&self, emoji_id: &str) -> CallResult<()> {
        self.delete(&format!("/guilds/{}/emojis/{}", self.guild_id, emoji_id))
            .await
    }

    async fn set_icon(&self, image: &[u8], content_type: &str) -> CallResult<()> {
        let body = serde_json::json!({ "icon": data_uri(content_type, image) });
        self.patch(&format!("/guilds/{}", self.guild_id), &body).await
    }

    async fn set_name(&self, name: &str) -> CallResult<()> {
        let body = serde_json::json!({ "name": name });
        self.patch(&format!("/guilds/{}", self.guild_id), &body).await
    }

    async fn get_or_create_relay(&self, channel_id: &str, name: &str) -> CallResult<RelayHandle> {
        let hooks: Vec<DiscordWebhookResponse> = self
            .get_json(&format!("/channels/{}/webhooks", channel_id))
            .await?;
        if let Some(handle) = hooks.into_iter().find_map(|h| match (h.name, h.token) {
            (Some(n), Some(token)) if n == name => Some(RelayHandle { id: h.id, token }),
            _ => None,
        }) {
            return Ok(handle);
        }

        let created: DiscordWebhookResponse = self
            .post_json(
                &format!("/channels/{}/webhooks", channel_id),
                &serde_json::json!({ "name": name }),
            )
            .await?;
        match created.token {
            Some(token) => {
                tracing::info!(channel_id, webhook_id = created.id.as_str(), "Created relay webhook");
                Ok(RelayHandle {
                    id: created.id,
                    token,
                })
            }
            None => Err(PlatformError::Failed(
                "Discord returned a webhook without a token".to_string(),
            )),
        }
    }

    async fn relay_send(&self, relay: &RelayHandle, payload: &RelayPayload) -> CallResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/webhooks/{}/{}", relay.id, relay.token)))
            .json(&webhook_body(payload))
            .send()
            .await
            .map_err(|e| PlatformError::Failed(format!("Webhook send failed: {}", e)))?;
        check_status(response).await.map(|_| ())
    }
}

/// Builds a [`DiscordGuild`] per request, sharing one HTTP client.
#[derive(Clone)]
pub struct DiscordConnector {
    client: Client,
    api_url: String,
    bot_token: String,
}

impl DiscordConnector {
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.to_string(),
            bot_token: bot_token.to_string(),
        }
    }
}

impl GuildConnector for DiscordConnector {
    fn connect(&self, guild_id: &str) -> Arc<dyn Guild> {
        Arc::new(DiscordGuild::new(
            self.client.clone(),
            &self.api_url,
            &self.bot_token,
            guild_id,
        ))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn check_status(response: Response) -> CallResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header_retry = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after_from(&body, header_retry);
        tracing::debug!(
            retry_after_ms = retry_after.as_millis() as u64,
            "Discord rate limit hit"
        );
        return Err(PlatformError::Throttled { retry_after });
    }
    Err(PlatformError::Failed(describe_failure(status, &body)))
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> CallResult<T> {
    response
        .json()
        .await
        .map_err(|e| PlatformError::Failed(format!("Failed to parse Discord response: {}", e)))
}

/// Retry interval from a 429: the JSON `retry_after` (seconds), else the header.
fn retry_after_from(body: &str, header_secs: Option<f64>) -> Duration {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()))
        .or(header_secs)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(FALLBACK_RETRY_AFTER)
}

/// `"<status>: <discord message>"`, falling back to the raw body or reason.
fn describe_failure(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());
    format!("{}: {}", status.as_u16(), message)
}

/// Highest position among the bot's roles (0 if it holds none).
fn bot_top_position(roles: &[DiscordRoleResponse], bot_role_ids: &[String]) -> i32 {
    roles
        .iter()
        .filter(|r| bot_role_ids.contains(&r.id))
        .map(|r| r.position)
        .max()
        .unwrap_or(0)
}

fn channel_from_response(c: DiscordChannelResponse) -> Channel {
    Channel {
        id: c.id,
        name: c.name,
        kind: ChannelKind::from(c.channel_type),
        position: c.position,
        parent_id: c.parent_id,
        overwrites: c
            .permission_overwrites
            .into_iter()
            .map(|ow| Overwrite {
                id: ow.id,
                kind: if ow.overwrite_type == 1 {
                    OverwriteKind::Member
                } else {
                    OverwriteKind::Role
                },
                allow: ow.allow.parse().unwrap_or(0),
                deny: ow.deny.parse().unwrap_or(0),
            })
            .collect(),
        topic: c.topic,
        nsfw: c.nsfw,
        rate_limit_per_user: c.rate_limit_per_user,
        deletable: true,
    }
}

fn message_from_response(m: DiscordMessageResponse) -> Message {
    let author = m.author;
    Message {
        id: m.id,
        content: m.content,
        author_avatar_url: author
            .avatar
            .as_deref()
            .map(|hash| format!("{}/avatars/{}/{}.png", CDN_URL, author.id, hash)),
        author_name: author.global_name.unwrap_or(author.username),
        timestamp_ms: chrono::DateTime::parse_from_rfc3339(&m.timestamp)
            .map(|t| t.timestamp_millis())
            .unwrap_or(0),
        embeds: m.embeds,
        attachments: m
            .attachments
            .into_iter()
            .map(|a| Attachment {
                filename: a.filename,
                url: a.url,
            })
            .collect(),
    }
}

fn webhook_body(payload: &RelayPayload) -> serde_json::Value {
    let mut body = serde_json::json!({
        "content": payload.content,
        "username": payload.username,
        "embeds": payload.embeds,
    });
    if let Some(avatar) = &payload.avatar_url {
        body["avatar_url"] = serde_json::json!(avatar);
    }
    if payload.suppress_mentions {
        body["allowed_mentions"] = serde_json::json!({ "parse": [] });
    }
    body
}

fn icon_url(guild_id: &str, hash: &str) -> String {
    let ext = if hash.starts_with("a_") { "gif" } else { "png" };
    format!("{}/icons/{}/{}.{}", CDN_URL, guild_id, hash, ext)
}

fn emoji_url(emoji_id: &str, animated: bool) -> String {
    let ext = if animated { "gif" } else { "png" };
    format!("{}/emojis/{}.{}", CDN_URL, emoji_id, ext)
}

fn data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, BASE64.encode(bytes))
}
