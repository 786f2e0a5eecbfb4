use std::time::Duration;

use tokio::time::Instant;

/// How long a finished status stays visible.
pub const STATUS_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Shown until replaced.
    Syncing,
    Success,
    Error,
    Info,
}

/// A transient message for the status line, e.g. "Synced successfully".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub kind: StatusKind,
    shown_at: Instant,
}

impl StatusMessage {
    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
            shown_at: Instant::now(),
        }
    }

    pub fn syncing() -> Self {
        Self::new(StatusKind::Syncing, "Syncing...")
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Success, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Info, text)
    }

    pub fn is_visible(&self, now: Instant) -> bool {
        self.kind == StatusKind::Syncing || now.duration_since(self.shown_at) < STATUS_TTL
    }
}
