//! Sync engine orchestrating queue replay.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::{
    ConflictRepository, Database, QueueCounts, QueueRepository, SettingsRepository,
    SqliteConflictRepository, SqliteQueueRepository, SqliteSettingsRepository,
    SqliteStatsRepository, StatsRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    Conflict, ConflictStrategy, ItemStatus, MutationKind, Payload, QueueItem, QueueItemId,
    Resolution, SyncStats,
};
use crate::remote::RemoteStore;
use crate::util::unix_timestamp_ms;

use super::backoff::BackoffPolicy;
use super::conflict::{self, ResolutionOutcome};
use super::connectivity::{ConnectivityMonitor, Transition};
use super::scheduler::RetryScheduler;
use super::status::{StatusReporter, SyncStatus};

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry policy for failed replays
    pub backoff: BackoffPolicy,
    /// Delay between a reconnect and the catch-up pass, to avoid racing
    /// a flapping connection
    pub settle_delay: Duration,
    /// Whether the process starts with the network considered reachable
    pub initially_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            settle_delay: Duration::from_secs(2),
            initially_online: true,
        }
    }
}

impl SyncConfig {
    /// Set the retry policy
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the reconnect settle delay
    #[must_use]
    pub const fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Set the initial reachability assumption
    #[must_use]
    pub const fn initially_offline(mut self) -> Self {
        self.initially_online = false;
        self
    }
}

/// Outcome of a single sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Items selected for this pass
    pub attempted: usize,
    /// Items successfully replayed and removed
    pub synced: usize,
    /// Items that failed and were scheduled for retry (or fail-stopped)
    pub failed: usize,
    /// Conflicts parked for manual resolution
    pub conflicts: usize,
    /// Wall-clock duration of the pass
    pub duration_ms: i64,
}

/// What happened to one item during a pass
enum ItemOutcome {
    Synced,
    Failed,
    ParkedConflict,
    /// Removed without a write (server-wins resolution)
    Discarded,
}

struct SyncInner {
    db: Mutex<Database>,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    strategy: StdMutex<ConflictStrategy>,
    connectivity: ConnectivityMonitor,
    scheduler: RetryScheduler,
    reporter: Arc<StatusReporter>,
    pass_active: AtomicBool,
}

/// Offline mutation queue and synchronization engine.
///
/// Owns the durable queue and replays queued mutations to the remote
/// store, detecting and resolving conflicts along the way. Cheap to
/// clone; clones share state. Sync passes are single-flight: concurrent
/// triggers coalesce into one pass and the rest are no-ops.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<SyncInner>,
}

impl SyncService {
    /// Open the service over a database file, creating parent directories
    /// as needed.
    pub fn open(
        db_path: impl AsRef<Path>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_database(Database::open(db_path)?, remote, config)
    }

    /// Open the service over an in-memory database (primarily for tests).
    pub fn open_in_memory(remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Result<Self> {
        Self::with_database(Database::open_in_memory()?, remote, config)
    }

    fn with_database(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        let strategy = SqliteSettingsRepository::new(db.connection()).conflict_strategy()?;

        Ok(Self {
            inner: Arc::new(SyncInner {
                db: Mutex::new(db),
                remote,
                connectivity: ConnectivityMonitor::new(config.initially_online),
                config,
                strategy: StdMutex::new(strategy),
                scheduler: RetryScheduler::new(),
                reporter: Arc::new(StatusReporter::new()),
                pass_active: AtomicBool::new(false),
            }),
        })
    }

    // ----- queue operations -----

    /// Persist a new mutation; replays immediately when online.
    ///
    /// `server_version_seen` must carry the version token captured when
    /// the target record was read; leave it `None` for brand-new records.
    pub async fn enqueue(
        &self,
        kind: MutationKind,
        payload: Payload,
        server_version_seen: Option<String>,
    ) -> Result<QueueItem> {
        let item = {
            let db = self.inner.db.lock().await;
            SqliteQueueRepository::new(db.connection()).enqueue(
                kind,
                payload,
                server_version_seen,
            )?
        };
        debug!(item = %item.id, kind = %item.kind, "Enqueued mutation");

        if self.is_online() {
            self.trigger();
        }
        Ok(item)
    }

    /// Remove an item and any unresolved conflicts referencing it.
    pub async fn remove(&self, id: &QueueItemId) -> Result<()> {
        {
            let db = self.inner.db.lock().await;
            SqliteQueueRepository::new(db.connection()).remove(id)?;
        }
        self.rearm_retry_timer().await;
        Ok(())
    }

    /// Queue a failed or conflicted item for another replay attempt.
    ///
    /// The retry counter is preserved; the status, error, and backoff
    /// window are reset.
    pub async fn retry_item(&self, id: &QueueItemId) -> Result<()> {
        {
            let db = self.inner.db.lock().await;
            let repo = SqliteQueueRepository::new(db.connection());
            let mut item = repo
                .get(id)?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            item.status = ItemStatus::Pending;
            item.last_error = None;
            item.next_retry_at = None;
            repo.update(&item)?;
        }
        self.trigger();
        Ok(())
    }

    /// Delete every queued item and all recorded conflicts.
    pub async fn clear_queue(&self) -> Result<()> {
        {
            let db = self.inner.db.lock().await;
            SqliteQueueRepository::new(db.connection()).clear()?;
        }
        self.inner.scheduler.disarm();
        Ok(())
    }

    /// Delete failed items only.
    pub async fn clear_failed(&self) -> Result<()> {
        {
            let db = self.inner.db.lock().await;
            SqliteQueueRepository::new(db.connection()).clear_failed()?;
        }
        self.rearm_retry_timer().await;
        Ok(())
    }

    /// All queued items in enqueue order.
    pub async fn list_queue(&self) -> Result<Vec<QueueItem>> {
        let db = self.inner.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list()
    }

    /// Per-status tallies.
    pub async fn counts(&self) -> Result<QueueCounts> {
        let db = self.inner.db.lock().await;
        SqliteQueueRepository::new(db.connection()).counts()
    }

    // ----- conflicts -----

    /// Unresolved conflicts, oldest first.
    pub async fn conflicts(&self) -> Result<Vec<Conflict>> {
        let db = self.inner.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_unresolved()
    }

    /// Apply a user's decision to a parked conflict.
    ///
    /// Resolving to the server copy drops the queued item; the other
    /// resolutions return it to pending and trigger a replay.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
        merged_payload: Option<Payload>,
    ) -> Result<()> {
        let kept_item = {
            let db = self.inner.db.lock().await;
            let conflicts = SqliteConflictRepository::new(db.connection());
            let found = conflicts
                .get(conflict_id)?
                .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
            if found.resolved {
                return Err(Error::InvalidInput(format!(
                    "conflict {conflict_id} is already resolved"
                )));
            }

            let queue = SqliteQueueRepository::new(db.connection());
            let mut item = queue
                .get(&found.queue_item_id)?
                .ok_or_else(|| Error::NotFound(found.queue_item_id.to_string()))?;

            match conflict::manual_resolve(&found, resolution, merged_payload) {
                ResolutionOutcome::Server => {
                    conflicts.mark_resolved(conflict_id, resolution)?;
                    queue.remove(&found.queue_item_id)?;
                    false
                }
                ResolutionOutcome::Client => {
                    item.status = ItemStatus::Pending;
                    item.last_error = None;
                    item.next_retry_at = None;
                    queue.update(&item)?;
                    conflicts.mark_resolved(conflict_id, resolution)?;
                    true
                }
                ResolutionOutcome::Merged(merged) => {
                    item.payload = merged;
                    item.status = ItemStatus::Pending;
                    item.last_error = None;
                    item.next_retry_at = None;
                    queue.update(&item)?;
                    conflicts.mark_resolved(conflict_id, resolution)?;
                    true
                }
            }
        };

        info!(conflict = conflict_id, resolution = %resolution, "Conflict resolved");
        if kept_item {
            self.trigger();
        } else {
            self.rearm_retry_timer().await;
        }
        Ok(())
    }

    // ----- strategy, connectivity, status, stats -----

    /// Currently configured conflict strategy.
    pub fn strategy(&self) -> ConflictStrategy {
        *self
            .inner
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Set and persist the process-wide conflict strategy.
    pub async fn set_strategy(&self, strategy: ConflictStrategy) -> Result<()> {
        {
            let db = self.inner.db.lock().await;
            SqliteSettingsRepository::new(db.connection()).set_conflict_strategy(strategy)?;
        }
        *self
            .inner
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = strategy;
        Ok(())
    }

    /// Whether the network is currently considered reachable.
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Record a reachability report from the embedding shell.
    ///
    /// Coming back online with work queued schedules a catch-up pass
    /// after the settle delay.
    pub async fn set_connectivity(&self, reachable: bool) -> Result<()> {
        match self.inner.connectivity.observe(reachable) {
            Some(Transition::CameOnline) => {
                let counts = self.counts().await?;
                info!(
                    pending = counts.pending,
                    failed = counts.failed,
                    "Connection restored"
                );
                if counts.pending + counts.failed > 0 {
                    let service = self.clone();
                    let settle = self.inner.config.settle_delay;
                    tokio::spawn(async move {
                        tokio::time::sleep(settle).await;
                        if let Err(error) = service.sync_now().await {
                            warn!(%error, "Catch-up sync after reconnect failed");
                        }
                    });
                }
                self.rearm_retry_timer().await;
            }
            Some(Transition::WentOffline) => {
                info!("Connection lost; mutations will queue until it returns");
            }
            None => {}
        }
        Ok(())
    }

    /// Current engine status.
    pub fn status(&self) -> SyncStatus {
        self.inner.reporter.status()
    }

    /// Progress through the current pass, 0-100.
    pub fn progress(&self) -> u8 {
        self.inner.reporter.progress()
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> Result<SyncStats> {
        let db = self.inner.db.lock().await;
        SqliteStatsRepository::new(db.connection()).load()
    }

    /// Explicitly reset aggregate statistics.
    pub async fn reset_stats(&self) -> Result<()> {
        let db = self.inner.db.lock().await;
        SqliteStatsRepository::new(db.connection()).reset()
    }

    // ----- the pass -----

    /// Run one synchronization pass over all currently eligible items.
    ///
    /// A no-op returning an empty summary while offline or while another
    /// pass is in flight.
    pub async fn sync_now(&self) -> Result<PassSummary> {
        if !self.is_online() {
            debug!("Sync requested while offline; skipping");
            return Ok(PassSummary::default());
        }
        if self
            .inner
            .pass_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync pass already in progress; skipping");
            return Ok(PassSummary::default());
        }

        let result = self.run_pass().await;
        self.inner.pass_active.store(false, Ordering::SeqCst);
        self.rearm_retry_timer().await;
        result
    }

    async fn run_pass(&self) -> Result<PassSummary> {
        let now = unix_timestamp_ms();
        let eligible = {
            let db = self.inner.db.lock().await;
            SqliteQueueRepository::new(db.connection())
                .eligible(now, self.inner.config.backoff.max_retries)?
        };
        if eligible.is_empty() {
            return Ok(PassSummary::default());
        }

        info!(items = eligible.len(), "Starting sync pass");
        self.inner.reporter.begin_pass();
        let started = Instant::now();
        let strategy = self.strategy();

        let mut summary = PassSummary {
            attempted: eligible.len(),
            ..PassSummary::default()
        };

        for (index, mut item) in eligible.into_iter().enumerate() {
            item.status = ItemStatus::Syncing;
            self.update_item(&item).await?;

            match self.replay_item(&mut item, strategy).await? {
                ItemOutcome::Synced => summary.synced += 1,
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::ParkedConflict => summary.conflicts += 1,
                ItemOutcome::Discarded => {}
            }

            self.inner.reporter.set_progress(index + 1, summary.attempted);
        }

        summary.duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.record_pass(&summary).await?;

        let status = if summary.conflicts > 0 {
            SyncStatus::Conflict
        } else if summary.failed > 0 && summary.synced == 0 {
            SyncStatus::Error
        } else if summary.synced > 0 {
            SyncStatus::Success
        } else {
            SyncStatus::Idle
        };
        Arc::clone(&self.inner.reporter).finish_pass(status);

        info!(
            synced = summary.synced,
            failed = summary.failed,
            conflicts = summary.conflicts,
            duration_ms = summary.duration_ms,
            "Sync pass finished"
        );
        Ok(summary)
    }

    /// Replay one item: conflict check, resolution, remote write.
    ///
    /// Remote failures are captured on the item and never propagate; only
    /// local database failures abort the pass.
    async fn replay_item(
        &self,
        item: &mut QueueItem,
        strategy: ConflictStrategy,
    ) -> Result<ItemOutcome> {
        let detected = conflict::detect(item, self.inner.remote.as_ref()).await;

        let payload = match detected {
            Some(found) => {
                if strategy == ConflictStrategy::Manual {
                    self.park_conflict(item, &found).await?;
                    return Ok(ItemOutcome::ParkedConflict);
                }
                match conflict::auto_resolve(&found, strategy) {
                    Some(ResolutionOutcome::Server) => {
                        info!(item = %item.id, "Conflict resolved server-wins; dropping queued mutation");
                        self.remove_item(&item.id).await?;
                        return Ok(ItemOutcome::Discarded);
                    }
                    Some(ResolutionOutcome::Merged(merged)) => merged,
                    Some(ResolutionOutcome::Client) | None => item.payload.clone(),
                }
            }
            None => item.payload.clone(),
        };

        match self.inner.remote.insert(&item.kind.target(), &payload).await {
            Ok(()) => {
                self.remove_item(&item.id).await?;
                debug!(item = %item.id, "Replayed mutation");
                Ok(ItemOutcome::Synced)
            }
            Err(replay_error) => {
                self.mark_failed(item, &replay_error).await?;
                Ok(ItemOutcome::Failed)
            }
        }
    }

    async fn park_conflict(&self, item: &mut QueueItem, found: &Conflict) -> Result<()> {
        let db = self.inner.db.lock().await;
        let persisted = SqliteConflictRepository::new(db.connection()).insert(found)?;
        item.status = ItemStatus::Conflict;
        SqliteQueueRepository::new(db.connection()).update(item)?;
        warn!(
            item = %item.id,
            conflict = persisted.id,
            field = %persisted.divergent_field,
            "Conflict parked for manual resolution"
        );
        Ok(())
    }

    async fn mark_failed(&self, item: &mut QueueItem, replay_error: &Error) -> Result<()> {
        let now = unix_timestamp_ms();
        item.retry_count += 1;
        item.status = ItemStatus::Failed;
        item.last_attempt_at = Some(now);
        item.last_error = Some(replay_error.to_string());

        let policy = &self.inner.config.backoff;
        if item.retry_count < policy.max_retries {
            let delay = policy.delay(item.retry_count);
            item.next_retry_at =
                Some(now + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
            warn!(
                item = %item.id,
                retries = item.retry_count,
                error = %replay_error,
                "Replay failed; will retry"
            );
        } else {
            // Fail-stop: only an explicit user retry revives the item
            item.next_retry_at = None;
            error!(
                item = %item.id,
                retries = item.retry_count,
                error = %replay_error,
                "Replay failed; retries exhausted, awaiting user action"
            );
        }
        self.update_item(item).await
    }

    async fn update_item(&self, item: &QueueItem) -> Result<()> {
        let db = self.inner.db.lock().await;
        SqliteQueueRepository::new(db.connection()).update(item)
    }

    async fn remove_item(&self, id: &QueueItemId) -> Result<()> {
        let db = self.inner.db.lock().await;
        SqliteQueueRepository::new(db.connection()).remove(id)
    }

    async fn record_pass(&self, summary: &PassSummary) -> Result<()> {
        let db = self.inner.db.lock().await;
        let repo = SqliteStatsRepository::new(db.connection());
        let mut stats = repo.load()?;
        stats.record_pass(
            summary.synced as u64,
            summary.failed as u64,
            summary.duration_ms,
            unix_timestamp_ms(),
        );
        repo.save(&stats)
    }

    /// Spawn a sync pass without waiting for it.
    fn trigger(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(trigger_error) = service.sync_now().await {
                warn!(error = %trigger_error, "Triggered sync pass failed");
            }
        });
    }

    /// Recompute the earliest pending retry and re-arm the single timer.
    async fn rearm_retry_timer(&self) {
        let next = {
            let db = self.inner.db.lock().await;
            SqliteQueueRepository::new(db.connection())
                .earliest_retry_at(self.inner.config.backoff.max_retries)
        };

        let next = match next {
            Ok(next) => next,
            Err(timer_error) => {
                warn!(error = %timer_error, "Failed to compute next retry time");
                None
            }
        };

        match next {
            Some(at) => {
                let delay_ms = u64::try_from(at - unix_timestamp_ms()).unwrap_or(0);
                let service = self.clone();
                // The fired task only spawns the pass, so re-arming from the
                // end of that pass never aborts the task running it.
                self.inner
                    .scheduler
                    .rearm(Duration::from_millis(delay_ms), async move {
                        service.trigger();
                    });
            }
            None => self.inner.scheduler.disarm(),
        }
    }
}
