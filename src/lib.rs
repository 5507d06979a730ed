//! # Umbra Guild Backup
//!
//! Captures a Discord guild's structure (roles, channel tree with permission
//! overwrites, custom emoji and optionally message history) into a durable
//! snapshot, and rebuilds it in the same or another guild.
//!
//! ```text
//! ┌──────────────┐ capture ┌───────────────┐  read  ┌───────────────┐
//! │ GuildReader  │────────▶│ SnapshotStore │───────▶│ restore       │
//! │ (live guild) │         │ JSON files    │        │ phases+remap  │
//! └──────────────┘         └───────────────┘        └───────┬───────┘
//!                                                           │
//!                                   GuildWriter ◀───────────┤
//!                                   (target)    ◀── relay ──┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire crate
//! - [`permissions`] - Discord permission bits and channel permission math
//! - [`platform`] - Guild accessor traits and the Discord REST adapter
//! - [`snapshot`] - Snapshot records and the file-backed store
//! - [`backup`] - Capture, restore, message relay and the backup service
//! - [`config`] - Engine delays and retry settings
//! - [`api`] - HTTP handlers

pub mod api;
pub mod backup;
pub mod config;
pub mod error;
pub mod permissions;
pub mod platform;
pub mod snapshot;

pub use backup::{BackupService, CaptureRequest, RestoreReport};
pub use error::{Error, Result};
pub use snapshot::{Snapshot, SnapshotStore, SnapshotSummary};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
