//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::util::unix_timestamp_ms;

use super::{MutationKind, Payload, QueueItem, QueueItemId};

/// How a resolved conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// The queued client payload was replayed
    Client,
    /// The queued mutation was dropped; the server copy stands
    Server,
    /// A reconciled payload was replayed
    Merged,
}

impl Resolution {
    /// Stable string tag used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Merged => "merged",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            "merged" => Ok(Self::Merged),
            other => Err(Error::InvalidInput(format!("unknown resolution: {other}"))),
        }
    }
}

/// Process-wide conflict resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Replay the queued payload over the server copy
    #[default]
    ClientWins,
    /// Drop the queued mutation; the server copy is authoritative
    ServerWins,
    /// Shallow-merge server and client fields, client fields winning
    Merge,
    /// Park conflicted items for a human decision
    Manual,
}

impl ConflictStrategy {
    /// Stable string tag used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientWins => "client_wins",
            Self::ServerWins => "server_wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_wins" => Ok(Self::ClientWins),
            "server_wins" => Ok(Self::ServerWins),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict strategy: {other}"
            ))),
        }
    }
}

/// A detected divergence between a queued mutation and the server copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict row identifier (0 until persisted)
    pub id: i64,
    /// Queue item that produced the divergent write
    pub queue_item_id: QueueItemId,
    /// Mutation type of that item
    pub kind: MutationKind,
    /// Payload the client queued
    pub client_payload: Payload,
    /// Record currently on the server
    pub server_payload: Payload,
    /// Field whose values diverged (e.g. `updated_at`)
    pub divergent_field: String,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    /// Whether a resolution has been applied
    pub resolved: bool,
    /// How it was settled, once resolved
    pub resolution: Option<Resolution>,
}

impl Conflict {
    /// Record a divergence detected for `item`.
    #[must_use]
    pub fn new(
        item: &QueueItem,
        server_payload: Payload,
        divergent_field: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            queue_item_id: item.id,
            kind: item.kind,
            client_payload: item.payload.clone(),
            server_payload,
            divergent_field: divergent_field.into(),
            detected_at: unix_timestamp_ms(),
            resolved: false,
            resolution: None,
        }
    }

    /// Shallow merge of server-then-client fields; client values win.
    #[must_use]
    pub fn merged_payload(&self) -> Payload {
        let mut merged = self.server_payload.clone();
        for (key, value) in &self.client_payload {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with_payload(pairs: &[(&str, &str)]) -> QueueItem {
        let mut payload = Payload::new();
        for (key, value) in pairs {
            payload.insert((*key).to_string(), (*value).into());
        }
        QueueItem::new(MutationKind::PastoralAction, payload, Some("v1".to_string()))
    }

    #[test]
    fn test_strategy_round_trip() {
        for strategy in [
            ConflictStrategy::ClientWins,
            ConflictStrategy::ServerWins,
            ConflictStrategy::Merge,
            ConflictStrategy::Manual,
        ] {
            let parsed: ConflictStrategy = strategy.as_str().parse().unwrap();
            assert_eq!(strategy, parsed);
        }
        assert!("newest_wins".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn test_resolution_round_trip() {
        for resolution in [Resolution::Client, Resolution::Server, Resolution::Merged] {
            let parsed: Resolution = resolution.as_str().parse().unwrap();
            assert_eq!(resolution, parsed);
        }
    }

    #[test]
    fn test_new_conflict_references_item() {
        let item = item_with_payload(&[("member_id", "m-001")]);
        let conflict = Conflict::new(&item, Payload::new(), "updated_at");

        assert_eq!(conflict.queue_item_id, item.id);
        assert_eq!(conflict.kind, item.kind);
        assert_eq!(conflict.client_payload, item.payload);
        assert_eq!(conflict.divergent_field, "updated_at");
        assert!(!conflict.resolved);
        assert!(conflict.resolution.is_none());
    }

    #[test]
    fn test_merged_payload_prefers_client_fields() {
        let item = item_with_payload(&[("member_id", "m-001"), ("note", "client note")]);

        let mut server = Payload::new();
        server.insert("note".to_string(), "server note".into());
        server.insert("updated_at".to_string(), "2026-02-01T00:00:00Z".into());

        let conflict = Conflict::new(&item, server, "updated_at");
        let merged = conflict.merged_payload();

        assert_eq!(merged["note"], "client note");
        assert_eq!(merged["member_id"], "m-001");
        assert_eq!(merged["updated_at"], "2026-02-01T00:00:00Z");
    }
}
