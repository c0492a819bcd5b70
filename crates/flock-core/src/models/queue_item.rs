//! Queue item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;
use crate::util::unix_timestamp_ms;

/// Opaque key/value mutation data, replayed verbatim to the remote store.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A unique identifier for a queue item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Create a new unique item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Remote entity a mutation kind writes to.
///
/// `key_fields` name the payload fields that identify the target record
/// when the server's version token is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTarget {
    /// Remote table name
    pub table: &'static str,
    /// Payload fields identifying the target record
    pub key_fields: &'static [&'static str],
}

/// Mutation types the queue can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A pastoral visit or contact recorded by a leader
    PastoralAction,
    /// A crisis report filed by a responder
    CrisisReport,
}

impl MutationKind {
    /// Remote table and identifying payload fields for this kind.
    #[must_use]
    pub const fn target(self) -> EntityTarget {
        match self {
            Self::PastoralAction => EntityTarget {
                table: "pastoral_actions",
                key_fields: &["member_id", "occurred_on"],
            },
            Self::CrisisReport => EntityTarget {
                table: "crisis_reports",
                key_fields: &["member_id"],
            },
        }
    }

    /// Stable string tag used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PastoralAction => "pastoral_action",
            Self::CrisisReport => "crisis_report",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pastoral_action" => Ok(Self::PastoralAction),
            "crisis_report" => Ok(Self::CrisisReport),
            other => Err(Error::InvalidInput(format!(
                "unknown mutation kind: {other}"
            ))),
        }
    }
}

/// Queue item lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting for the next sync pass
    #[default]
    Pending,
    /// Being replayed right now; never survives a restart
    Syncing,
    /// Last replay attempt failed
    Failed,
    /// Parked until its conflict is resolved
    Conflict,
}

impl ItemStatus {
    /// Stable string tag used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!("unknown item status: {other}"))),
        }
    }
}

/// A durably stored pending mutation awaiting replay to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier, assigned at enqueue time
    pub id: QueueItemId,
    /// Mutation type, decides the remote target
    pub kind: MutationKind,
    /// Opaque data written verbatim on successful replay
    pub payload: Payload,
    /// Creation timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Lifecycle status
    pub status: ItemStatus,
    /// Failed replay attempts so far
    pub retry_count: u32,
    /// Last replay attempt (Unix ms)
    pub last_attempt_at: Option<i64>,
    /// Next automatic retry; set only while failed below the retry cap
    pub next_retry_at: Option<i64>,
    /// Human-readable reason for the last failure
    pub last_error: Option<String>,
    /// Server version token captured at enqueue; `None` for new records,
    /// which can never conflict
    pub server_version_seen: Option<String>,
}

impl QueueItem {
    /// Create a new pending item with the given payload.
    #[must_use]
    pub fn new(kind: MutationKind, payload: Payload, server_version_seen: Option<String>) -> Self {
        Self {
            id: QueueItemId::new(),
            kind,
            payload,
            enqueued_at: unix_timestamp_ms(),
            status: ItemStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            next_retry_at: None,
            last_error: None,
            server_version_seen,
        }
    }

    /// Whether this item may be replayed at `now`: pending, or failed
    /// below the retry cap with an elapsed (or unset) backoff window.
    #[must_use]
    pub fn is_eligible(&self, now: i64, max_retries: u32) -> bool {
        match self.status {
            ItemStatus::Pending => true,
            ItemStatus::Failed => {
                self.retry_count < max_retries
                    && self.next_retry_at.map_or(true, |at| at <= now)
            }
            ItemStatus::Syncing | ItemStatus::Conflict => false,
        }
    }
}
