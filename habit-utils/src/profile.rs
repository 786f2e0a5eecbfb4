use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::habit::HabitData;

#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// Tier ordering is free < premium < enterprise.
    pub fn includes(self, required: SubscriptionTier) -> bool {
        self >= required
    }
}

// Unknown tiers are treated as the lowest one rather than failing the whole profile.
impl From<String> for SubscriptionTier {
    fn from(tier: String) -> Self {
        match tier.to_ascii_lowercase().as_str() {
            "premium" => SubscriptionTier::Premium,
            "enterprise" => SubscriptionTier::Enterprise,
            _ => SubscriptionTier::Free,
        }
    }
}

impl From<SubscriptionTier> for &'static str {
    fn from(tier: SubscriptionTier) -> Self {
        tier.as_str()
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, alias = "subscription_tier")]
    pub subscription_tier: SubscriptionTier,
    #[serde(default = "active", alias = "subscription_status")]
    pub subscription_status: String,
    #[serde(default, alias = "created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn active() -> String {
    "active".to_string()
}

impl Profile {
    pub fn new_free(created_at: DateTime<Utc>) -> Self {
        Self {
            subscription_tier: SubscriptionTier::Free,
            subscription_status: active(),
            created_at: Some(created_at),
        }
    }
}

/// Body of `GET /api/profile`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProfileResponse {
    pub profile: Profile,
}

/// Body of `POST /api/sync`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub habit_data: HabitData,
    /// RFC 3339 time of the client's last successful sync, `null` if it never synced.
    #[serde(default)]
    pub last_sync: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    NoChange,
    ServerToLocal,
    LocalToServer,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<SyncAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HabitData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What the client has to do after a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NoChange,
    LocalToServer,
    /// The server copy is newer; local state must be replaced with it.
    ServerToLocal(HabitData),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncResponseError {
    #[error("{0}")]
    Rejected(String),
    #[error("server_to_local response without data")]
    MissingData,
}

impl SyncResponse {
    pub fn success(action: SyncAction, data: Option<HabitData>) -> Self {
        Self {
            status: SyncStatus::Success,
            action: Some(action),
            data,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Error,
            action: None,
            data: None,
            message: Some(message.into()),
        }
    }

    /// A successful response without an action means the server took the local copy.
    pub fn into_outcome(self) -> Result<SyncOutcome, SyncResponseError> {
        if self.status == SyncStatus::Error {
            return Err(SyncResponseError::Rejected(
                self.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        match self.action {
            Some(SyncAction::NoChange) => Ok(SyncOutcome::NoChange),
            Some(SyncAction::ServerToLocal) => self
                .data
                .map(SyncOutcome::ServerToLocal)
                .ok_or(SyncResponseError::MissingData),
            Some(SyncAction::LocalToServer) | None => Ok(SyncOutcome::LocalToServer),
        }
    }
}
