//! Umbra Guild Backup Server
//!
//! HTTP service that snapshots Discord guilds and restores them:
//!
//! 1. **Capture**: roles, channel tree, overwrites, emoji and optionally
//!    message history, written as one JSON file per snapshot.
//!
//! 2. **Restore**: tears down the target guild's restorable structure and
//!    rebuilds it in dependency order, replaying history through webhooks.
//!
//! Requires a bot token with Manage Roles, Manage Channels, Manage
//! Expressions, Manage Webhooks and Read Message History.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use umbra_guild_backup::api::{self, AppState};
use umbra_guild_backup::backup::{Backoff, BackupService, RetryPolicy};
use umbra_guild_backup::config::{EngineConfig, Throttle, DEFAULT_RELAY_NAME};
use umbra_guild_backup::platform::DiscordConnector;
use umbra_guild_backup::snapshot::SnapshotStore;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "umbra-guild-backup", version, about = "Discord guild snapshot and restore service")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8090, env = "RELAY_PORT")]
    port: u16,

    /// Directory for snapshot files. Snapshots are kept in memory only when unset.
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<String>,

    /// Discord bot token
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    discord_bot_token: String,

    /// Discord REST API base URL
    #[arg(long, default_value = "https://discord.com/api/v10", env = "DISCORD_API_URL")]
    discord_api_url: String,

    /// Webhook name used for message replay
    #[arg(long, default_value = DEFAULT_RELAY_NAME, env = "RELAY_WEBHOOK_NAME")]
    relay_name: String,

    /// Delay between role writes (ms)
    #[arg(long, default_value_t = 400, env = "ROLE_DELAY_MS")]
    role_delay_ms: u64,

    /// Delay between channel writes (ms)
    #[arg(long, default_value_t = 500, env = "CHANNEL_DELAY_MS")]
    channel_delay_ms: u64,

    /// Delay between emoji writes (ms)
    #[arg(long, default_value_t = 300, env = "EMOJI_DELAY_MS")]
    emoji_delay_ms: u64,

    /// Delay between channel history / emoji fetches during capture (ms)
    #[arg(long, default_value_t = 300, env = "FETCH_DELAY_MS")]
    fetch_delay_ms: u64,

    /// Attempts per throttled platform call, including the first
    #[arg(long, default_value_t = 2, env = "RETRY_ATTEMPTS")]
    retry_attempts: u32,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            throttle: Throttle {
                role_delay: Duration::from_millis(self.role_delay_ms),
                channel_delay: Duration::from_millis(self.channel_delay_ms),
                emoji_delay: Duration::from_millis(self.emoji_delay_ms),
                fetch_delay: Duration::from_millis(self.fetch_delay_ms),
            },
            retry: RetryPolicy {
                max_attempts: self.retry_attempts.max(1),
                backoff: Backoff::Exponential {
                    base: Duration::from_secs(1),
                    max: Duration::from_secs(30),
                },
            },
            relay_name: self.relay_name.clone(),
            ..EngineConfig::default()
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "umbra_guild_backup=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let store = SnapshotStore::new(args.data_dir.as_deref());
    let loaded = store.load_from_disk();
    tracing::info!(
        snapshots = loaded,
        data_dir = args.data_dir.as_deref().unwrap_or("<memory>"),
        "Snapshot store ready"
    );

    let state = AppState {
        service: BackupService::new(store, args.engine_config()),
        guilds: Arc::new(DiscordConnector::new(
            &args.discord_api_url,
            &args.discord_bot_token,
        )),
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Umbra guild backup server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server error");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
