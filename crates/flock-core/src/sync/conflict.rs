//! Conflict detection and resolution.

use serde_json::Value;
use tracing::debug;

use crate::models::{Conflict, ConflictStrategy, Payload, QueueItem, Resolution};
use crate::remote::{RemoteStore, VERSION_FIELD};

/// What a resolution decided to do with a conflicted item
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Replay the client payload unmodified
    Client,
    /// Drop the queued mutation; the server copy stands
    Server,
    /// Replay the reconciled payload
    Merged(Payload),
}

/// Compare a queued item against the server's current version token.
///
/// Best-effort and read-only: items without a captured token cannot
/// conflict, and missing key fields, lookup failures, and absent records
/// all report "no conflict" so replay is never blocked.
pub(crate) async fn detect(item: &QueueItem, remote: &dyn RemoteStore) -> Option<Conflict> {
    let seen = item.server_version_seen.as_deref()?;

    let target = item.kind.target();
    let mut key = Vec::with_capacity(target.key_fields.len());
    for field in target.key_fields {
        match item.payload.get(*field).and_then(value_as_key) {
            Some(value) => key.push(((*field).to_string(), value)),
            None => {
                debug!(item = %item.id, field, "Payload lacks a key field; skipping conflict check");
                return None;
            }
        }
    }

    let record = match remote.fetch_record(&target, &key).await {
        Ok(record) => record?,
        Err(error) => {
            debug!(item = %item.id, %error, "Version lookup failed; replaying without conflict check");
            return None;
        }
    };

    let token = record.get(VERSION_FIELD).and_then(Value::as_str)?;
    if token == seen {
        return None;
    }

    Some(Conflict::new(item, record, VERSION_FIELD))
}

/// Resolution outcome for an automatic strategy; `None` when the strategy
/// requires a human decision.
pub(crate) fn auto_resolve(conflict: &Conflict, strategy: ConflictStrategy) -> Option<ResolutionOutcome> {
    match strategy {
        ConflictStrategy::Manual => None,
        ConflictStrategy::ClientWins => Some(ResolutionOutcome::Client),
        ConflictStrategy::ServerWins => Some(ResolutionOutcome::Server),
        ConflictStrategy::Merge => Some(ResolutionOutcome::Merged(conflict.merged_payload())),
    }
}

/// Resolution outcome for an explicit user decision. A caller-supplied
/// payload overrides the shallow merge.
pub(crate) fn manual_resolve(
    conflict: &Conflict,
    resolution: Resolution,
    merged_payload: Option<Payload>,
) -> ResolutionOutcome {
    match resolution {
        Resolution::Client => ResolutionOutcome::Client,
        Resolution::Server => ResolutionOutcome::Server,
        Resolution::Merged => ResolutionOutcome::Merged(
            merged_payload.unwrap_or_else(|| conflict.merged_payload()),
        ),
    }
}

fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::models::{EntityTarget, MutationKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubRemote {
        record: Mutex<Option<Payload>>,
        fail_lookup: bool,
    }

    impl StubRemote {
        fn with_record(record: Option<Payload>) -> Self {
            Self {
                record: Mutex::new(record),
                fail_lookup: false,
            }
        }
    }

    #[async_trait]
    impl RemoteStore for StubRemote {
        async fn insert(&self, _target: &EntityTarget, _payload: &Payload) -> Result<()> {
            Ok(())
        }

        async fn fetch_record(
            &self,
            _target: &EntityTarget,
            _key: &[(String, String)],
        ) -> Result<Option<Payload>> {
            if self.fail_lookup {
                return Err(Error::Remote("lookup unavailable".to_string()));
            }
            Ok(self.record.lock().unwrap().clone())
        }
    }

    fn keyed_item(token: Option<&str>) -> QueueItem {
        let mut payload = Payload::new();
        payload.insert("member_id".to_string(), "m-001".into());
        payload.insert("occurred_on".to_string(), "2026-03-01".into());
        payload.insert("note".to_string(), "visited after service".into());
        QueueItem::new(
            MutationKind::PastoralAction,
            payload,
            token.map(ToString::to_string),
        )
    }

    fn server_record(token: &str) -> Payload {
        let mut record = Payload::new();
        record.insert("updated_at".to_string(), token.into());
        record.insert("note".to_string(), "earlier note".into());
        record
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_item_without_token_never_conflicts() {
        let remote = StubRemote::with_record(Some(server_record("v2")));
        let item = keyed_item(None);

        assert!(detect(&item, &remote).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_matching_token_is_no_conflict() {
        let remote = StubRemote::with_record(Some(server_record("v1")));
        let item = keyed_item(Some("v1"));

        assert!(detect(&item, &remote).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_diverged_token_yields_conflict() {
        let remote = StubRemote::with_record(Some(server_record("v2")));
        let item = keyed_item(Some("v1"));

        let conflict = detect(&item, &remote).await.unwrap();
        assert_eq!(conflict.queue_item_id, item.id);
        assert_eq!(conflict.divergent_field, "updated_at");
        assert_eq!(conflict.server_payload["note"], "earlier note");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lookup_failure_degrades_to_no_conflict() {
        let remote = StubRemote {
            record: Mutex::new(Some(server_record("v2"))),
            fail_lookup: true,
        };
        let item = keyed_item(Some("v1"));

        assert!(detect(&item, &remote).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_record_is_no_conflict() {
        let remote = StubRemote::with_record(None);
        let item = keyed_item(Some("v1"));

        assert!(detect(&item, &remote).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_key_field_skips_check() {
        let remote = StubRemote::with_record(Some(server_record("v2")));
        let mut payload = Payload::new();
        payload.insert("note".to_string(), "no identifying fields".into());
        let item = QueueItem::new(MutationKind::PastoralAction, payload, Some("v1".to_string()));

        assert!(detect(&item, &remote).await.is_none());
    }

    #[test]
    fn test_auto_resolve_maps_strategies() {
        let item = keyed_item(Some("v1"));
        let conflict = Conflict::new(&item, server_record("v2"), "updated_at");

        assert_eq!(
            auto_resolve(&conflict, ConflictStrategy::ClientWins),
            Some(ResolutionOutcome::Client)
        );
        assert_eq!(
            auto_resolve(&conflict, ConflictStrategy::ServerWins),
            Some(ResolutionOutcome::Server)
        );
        assert_eq!(auto_resolve(&conflict, ConflictStrategy::Manual), None);

        let Some(ResolutionOutcome::Merged(merged)) =
            auto_resolve(&conflict, ConflictStrategy::Merge)
        else {
            panic!("merge strategy must produce a merged payload");
        };
        assert_eq!(merged["note"], "visited after service");
        assert_eq!(merged["updated_at"], "v2");
    }

    #[test]
    fn test_manual_resolve_honors_supplied_payload() {
        let item = keyed_item(Some("v1"));
        let conflict = Conflict::new(&item, server_record("v2"), "updated_at");

        let mut supplied = Payload::new();
        supplied.insert("note".to_string(), "hand-merged".into());

        let outcome = manual_resolve(&conflict, Resolution::Merged, Some(supplied.clone()));
        assert_eq!(outcome, ResolutionOutcome::Merged(supplied));

        assert_eq!(
            manual_resolve(&conflict, Resolution::Server, None),
            ResolutionOutcome::Server
        );
    }
}
