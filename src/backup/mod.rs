//! Backup engine: capture, restore and message replay.

pub mod capture;
pub mod relay;
pub mod remap;
pub mod report;
pub mod restore;
pub mod retry;
pub mod service;

pub use capture::{capture, CaptureRequest};
pub use remap::RemapTable;
pub use report::{ErrorAccumulator, RestoreReport};
pub use restore::{restore, RestorePhase};
pub use retry::{Backoff, RetryPolicy};
pub use service::BackupService;

/// Progress callback, invoked with a human-readable status at coarse milestones.
pub type ProgressFn = dyn Fn(&str) + Send + Sync;
