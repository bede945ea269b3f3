//! Export session context.
//!
//! One [`ExportSession`] is created per batch and passed by reference to
//! every component. Nothing reads process-wide state.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::config::Config;

/// Version written into the snapshot. A change forces a full export.
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cooperative cancellation signal shared between a batch and its host.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context of one export batch.
#[derive(Debug, Clone)]
pub struct ExportSession {
    pub config: Config,
    /// Destination root all export paths are relative to.
    pub destination: PathBuf,
    /// Batch start, milliseconds since the epoch.
    pub started_at: i64,
    pub cancel: CancelFlag,
}

impl ExportSession {
    /// Create a new session starting now.
    #[must_use]
    pub fn new(config: Config, destination: impl Into<PathBuf>) -> Self {
        Self {
            config,
            destination: destination.into(),
            started_at: now_millis(),
            cancel: CancelFlag::new(),
        }
    }

    /// Replace the cancellation flag with one shared by the host.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Absolute location of an export path.
    pub fn output_path(&self, target_path: &str) -> PathBuf {
        self.destination.join(target_path)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
