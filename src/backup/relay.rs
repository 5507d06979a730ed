//! Message relay: replays captured history through per-channel relay
//! endpoints.
//!
//! One task per source channel, all running concurrently. Within a channel
//! messages are sent one at a time, oldest first, so per-channel order is
//! preserved. Nothing is guaranteed about ordering across channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;

use super::remap::RemapTable;
use super::report::ErrorAccumulator;
use super::retry::RetryPolicy;
use super::ProgressFn;
use crate::config::EngineConfig;
use crate::platform::{GuildWriter, RelayPayload};
use crate::snapshot::MessageRecord;

/// Platform cap on message content length (characters).
const MAX_CONTENT_CHARS: usize = 2000;

/// Platform cap on relay display names (characters).
const MAX_USERNAME_CHARS: usize = 80;

/// Platform cap on embeds per message.
const MAX_EMBEDS: usize = 10;

/// A throttled send is retried exactly once.
const SEND_ATTEMPTS: u32 = 2;

/// What the relay managed to replay.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub restored: usize,
    pub skipped: usize,
    pub errors: ErrorAccumulator,
}

/// Shared counters for progress reporting across channel tasks.
struct Progress<'a> {
    total: usize,
    processed: AtomicUsize,
    every: usize,
    callback: Option<&'a ProgressFn>,
}

impl Progress<'_> {
    /// Count `n` more processed messages, firing the callback whenever a
    /// multiple of `every` is crossed.
    fn advance(&self, n: usize) {
        if n == 0 {
            return;
        }
        let before = self.processed.fetch_add(n, Ordering::SeqCst);
        let after = before + n;
        if self.every > 0 && after / self.every > before / self.every {
            let status = format!("Replaying messages: {}/{}", after, self.total);
            tracing::info!(processed = after, total = self.total, "[Relay] Progress");
            if let Some(cb) = self.callback {
                cb(&status);
            }
        }
    }
}

/// Replay `messages` into the channels `remap` points at.
pub async fn replay<W>(
    writer: &W,
    messages: &[MessageRecord],
    remap: &RemapTable,
    config: &EngineConfig,
    progress: Option<&ProgressFn>,
) -> ReplayOutcome
where
    W: GuildWriter + ?Sized,
{
    let mut outcome = ReplayOutcome::default();
    if messages.is_empty() {
        return outcome;
    }

    let progress = Progress {
        total: messages.len(),
        processed: AtomicUsize::new(0),
        every: config.progress_every,
        callback: progress,
    };
    let policy = RetryPolicy {
        max_attempts: SEND_ATTEMPTS,
        ..config.retry
    };

    let mut tasks = Vec::new();
    for (source_channel_id, batch) in group_by_channel(messages) {
        match remap.channel(source_channel_id) {
            Some(target_channel_id) => tasks.push(replay_channel(
                writer,
                target_channel_id,
                batch,
                config.relay_name.as_str(),
                &policy,
                &progress,
            )),
            None => {
                tracing::debug!(
                    channel_id = source_channel_id,
                    messages = batch.len(),
                    "[Relay] No target channel, skipping history"
                );
                outcome.skipped += batch.len();
                progress.advance(batch.len());
            }
        }
    }

    for channel in join_all(tasks).await {
        outcome.restored += channel.restored;
        outcome.skipped += channel.skipped;
        outcome.errors.extend(channel.errors);
    }

    if let Some(cb) = progress.callback {
        cb(&format!(
            "Message replay complete: {}/{} restored",
            outcome.restored, progress.total
        ));
    }
    tracing::info!(
        restored = outcome.restored,
        skipped = outcome.skipped,
        errors = outcome.errors.len(),
        "[Relay] Message replay complete"
    );
    outcome
}

/// Group messages by source channel, keeping their captured order.
fn group_by_channel(messages: &[MessageRecord]) -> Vec<(&str, Vec<&MessageRecord>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&MessageRecord>)> = Vec::new();
    for message in messages {
        let key = message.source_channel_id.as_str();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(message);
    }
    groups
}

async fn replay_channel<W>(
    writer: &W,
    target_channel_id: &str,
    batch: Vec<&MessageRecord>,
    relay_name: &str,
    policy: &RetryPolicy,
    progress: &Progress<'_>,
) -> ReplayOutcome
where
    W: GuildWriter + ?Sized,
{
    let mut outcome = ReplayOutcome::default();

    let relay = match policy
        .run("get_or_create_relay", || {
            writer.get_or_create_relay(target_channel_id, relay_name)
        })
        .await
    {
        Ok(relay) => relay,
        Err(e) => {
            outcome
                .errors
                .record(format!("Relay for channel {}", target_channel_id), e);
            outcome.skipped = batch.len();
            progress.advance(batch.len());
            return outcome;
        }
    };

    for message in batch {
        let Some(payload) = build_payload(message) else {
            outcome.skipped += 1;
            progress.advance(1);
            continue;
        };

        match policy
            .run("relay_send", || writer.relay_send(&relay, &payload))
            .await
        {
            Ok(()) => outcome.restored += 1,
            Err(e) => {
                outcome.errors.record(
                    format!(
                        "Message from {} at {} in channel {}",
                        message.author_name, message.timestamp_ms, target_channel_id
                    ),
                    e,
                );
                outcome.skipped += 1;
            }
        }
        progress.advance(1);
    }

    tracing::debug!(
        channel_id = target_channel_id,
        restored = outcome.restored,
        skipped = outcome.skipped,
        "[Relay] Channel replay finished"
    );
    outcome
}

/// Build the relay payload for one message. `None` when there is nothing to send.
///
/// Attachments become links appended to the content; mentions are always
/// suppressed.
pub fn build_payload(message: &MessageRecord) -> Option<RelayPayload> {
    let links: Vec<&str> = message.attachments.iter().map(|a| a.url.as_str()).collect();
    let links = links.join("\n");
    let body = if message.content.trim().is_empty() {
        ""
    } else {
        message.content.as_str()
    };

    // Links are appended whole; only the captured text gives way to the cap.
    let content = if links.is_empty() {
        truncate_chars(body, MAX_CONTENT_CHARS)
    } else if body.is_empty() {
        truncate_chars(&links, MAX_CONTENT_CHARS)
    } else {
        let room = MAX_CONTENT_CHARS.saturating_sub(links.chars().count() + 1);
        if room == 0 {
            truncate_chars(&links, MAX_CONTENT_CHARS)
        } else {
            format!("{}\n{}", truncate_chars(body, room), links)
        }
    };

    let embeds: Vec<serde_json::Value> = message.embeds.iter().take(MAX_EMBEDS).cloned().collect();

    if content.is_empty() && embeds.is_empty() {
        return None;
    }

    let username = match message.author_name.trim() {
        "" => "Unknown".to_string(),
        name => truncate_chars(name, MAX_USERNAME_CHARS),
    };

    Some(RelayPayload {
        content,
        username,
        avatar_url: message.author_avatar_url.clone(),
        embeds,
        suppress_mentions: true,
    })
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
