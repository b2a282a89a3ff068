//! Queue state and transitions.
//!
//! All state sits behind one mutex that is never held across an await point.
//! Claiming is the only cross-worker contention point: a worker pops the best
//! ready key and flips the entry to `processing` in the same critical section.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::{
    AcquisitionQueueEntry, AcquisitionTarget, Claim, Claimed, EntryId, EntryMetrics, EntryStatus,
    FailureKind, NewEntry,
};
use super::error::QueueError;
use super::policy::{Priority, RetryPolicy};
use crate::ids::LandId;
use crate::time::{to_std_duration, Clock};

/// Default time a claim may go without a heartbeat before it is reaped.
pub const DEFAULT_CLAIM_TIMEOUT_SECS: i64 = 300;

/// Upper bound on how long `claim_next_wait` sleeps between checks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

type ReadyKey = (Reverse<Priority>, DateTime<Utc>, u64, EntryId);
type DelayedKey = (DateTime<Utc>, u64, EntryId);

fn ready_key(entry: &AcquisitionQueueEntry) -> ReadyKey {
    (
        Reverse(entry.priority),
        entry.scheduled_for,
        entry.seq,
        entry.id,
    )
}

fn delayed_key(entry: &AcquisitionQueueEntry) -> DelayedKey {
    (entry.scheduled_for, entry.seq, entry.id)
}

#[derive(Default)]
pub(super) struct Inner {
    pub(super) entries: HashMap<EntryId, AcquisitionQueueEntry>,
    ready: BTreeSet<ReadyKey>,
    delayed: BTreeSet<DelayedKey>,
    active_targets: HashMap<AcquisitionTarget, EntryId>,
    pub(super) next_id: u64,
    pub(super) next_seq: u64,
}

impl Inner {
    fn schedule(&mut self, id: EntryId, now: DateTime<Utc>) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if entry.scheduled_for <= now {
            self.ready.insert(ready_key(entry));
        } else {
            self.delayed.insert(delayed_key(entry));
        }
    }

    fn unschedule(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.get(&id) {
            self.ready.remove(&ready_key(entry));
            self.delayed.remove(&delayed_key(entry));
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(&(due, _, id)) = self.delayed.first() {
            if due > now {
                break;
            }
            self.delayed.pop_first();
            if let Some(entry) = self.entries.get(&id) {
                self.ready.insert(ready_key(entry));
            }
        }
    }

    fn set_priority(&mut self, id: EntryId, priority: Priority, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get(&id) else {
            return false;
        };
        if priority <= entry.priority {
            return false;
        }
        let queued = matches!(entry.status, EntryStatus::Queued);
        if queued {
            self.unschedule(id);
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.priority = priority;
            entry.updated_at = now;
        }
        if queued {
            self.schedule(id, now);
        }
        true
    }

    /// Resolves a claim to its entry, rejecting stale leases.
    fn owned(&mut self, claim: &Claim) -> Result<&mut AcquisitionQueueEntry, QueueError> {
        let entry = self
            .entries
            .get_mut(&claim.id)
            .ok_or(QueueError::NotFound(claim.id))?;
        let live = matches!(
            entry.status,
            EntryStatus::Processing { lease, .. } if lease == claim.lease
        );
        if live {
            Ok(entry)
        } else {
            Err(QueueError::LeaseLost {
                id: claim.id,
                lease: claim.lease,
            })
        }
    }

    fn finish(&mut self, id: EntryId, status: EntryStatus, now: DateTime<Utc>) {
        let target = match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.status = status;
                entry.finished_at = Some(now);
                entry.updated_at = now;
                entry.target.clone()
            }
            None => return,
        };
        if self.active_targets.get(&target) == Some(&id) {
            self.active_targets.remove(&target);
        }
    }

    pub(super) fn rebuild_indices(&mut self, now: DateTime<Utc>) {
        self.ready.clear();
        self.delayed.clear();
        self.active_targets.clear();
        let ids: Vec<EntryId> = self.entries.keys().copied().collect();
        for id in ids {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            if entry.status.is_terminal() {
                continue;
            }
            self.active_targets.insert(entry.target.clone(), id);
            if matches!(entry.status, EntryStatus::Queued) {
                self.schedule(id, now);
            }
        }
    }
}

/// Result of [`AcquisitionQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub id: EntryId,
    /// `false` when an active entry for the same target already existed.
    pub created: bool,
    pub priority: Priority,
}

/// Result of [`AcquisitionQueue::fail`].
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Back in `queued`, eligible again at `entry.scheduled_for`.
    Requeued(AcquisitionQueueEntry),
    /// Marked `failed`; will never be retried.
    Terminal(AcquisitionQueueEntry),
}

/// Result of [`AcquisitionQueue::cancel`].
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// Entry was queued and is now `canceled`.
    Canceled(AcquisitionQueueEntry),
    /// Entry is processing; the worker will stop at its next step boundary.
    Requested,
    /// Entry had already reached a terminal state.
    AlreadyFinished(&'static str),
}

/// Result of [`AcquisitionQueue::reap_stale`].
#[derive(Debug, Clone, Default)]
pub struct ReapReport {
    /// Entries returned to `queued`.
    pub requeued: Vec<EntryId>,
    /// Entries that had a pending cancellation and are now `canceled`.
    pub canceled: Vec<AcquisitionQueueEntry>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.canceled.is_empty()
    }
}

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Queued and due now.
    pub ready: usize,
    /// Queued with `scheduled_for` in the future.
    pub delayed: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl QueueStats {
    pub fn active(&self) -> usize {
        self.ready + self.delayed + self.processing
    }
}

/// Priority-ordered acquisition queue.
pub struct AcquisitionQueue {
    pub(super) inner: Mutex<Inner>,
    notify: Notify,
    retry: RetryPolicy,
    claim_timeout: Duration,
    poll_interval: StdDuration,
    pub(super) clock: Arc<dyn Clock>,
}

impl AcquisitionQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            retry: RetryPolicy::default(),
            claim_timeout: Duration::seconds(DEFAULT_CLAIM_TIMEOUT_SECS),
            poll_interval: StdDuration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            clock,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how long a claim may go without a heartbeat.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: StdDuration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    /// Adds an entry, or returns the active entry for the same target.
    ///
    /// An existing entry's priority is raised when the new one is higher.
    pub fn enqueue(&self, new: NewEntry) -> EnqueueOutcome {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if let Some(&id) = inner.active_targets.get(&new.target) {
            let bumped = inner.set_priority(id, new.priority, now);
            let priority = inner
                .entries
                .get(&id)
                .map_or(new.priority, |e| e.priority);
            debug!(entry = %id, target = %new.target, bumped, "Target already queued");
            return EnqueueOutcome {
                id,
                created: false,
                priority,
            };
        }

        inner.next_id += 1;
        inner.next_seq += 1;
        let id = EntryId(inner.next_id);
        let entry = AcquisitionQueueEntry {
            id,
            target: new.target.clone(),
            tenant_id: new.tenant_id,
            bbox: new.bbox,
            land_ids: new.land_ids,
            land_revisions: new.land_revisions,
            priority: new.priority,
            status: EntryStatus::Queued,
            retry_count: 0,
            scheduled_for: now,
            created_at: now,
            updated_at: now,
            finished_at: None,
            metrics: EntryMetrics::default(),
            last_error: None,
            cancel_requested: false,
            lease: 0,
            seq: inner.next_seq,
        };
        info!(
            entry = %id,
            target = %entry.target,
            tenant = %entry.tenant_id,
            lands = entry.land_ids.len(),
            priority = %entry.priority,
            "Acquisition enqueued"
        );
        inner.entries.insert(id, entry);
        inner.active_targets.insert(new.target, id);
        inner.schedule(id, now);
        drop(inner);

        self.notify.notify_waiters();
        EnqueueOutcome {
            id,
            created: true,
            priority: new.priority,
        }
    }

    /// Atomically claims the best due entry for `worker`.
    pub fn claim_next(&self, worker: &str) -> Option<Claimed> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.promote_due(now);

        loop {
            let (_, _, _, id) = inner.ready.pop_first()?;
            let Some(entry) = inner.entries.get_mut(&id) else {
                continue;
            };
            if !matches!(entry.status, EntryStatus::Queued) {
                continue;
            }
            entry.lease += 1;
            entry.status = EntryStatus::Processing {
                worker: worker.to_string(),
                lease: entry.lease,
                claimed_at: now,
                heartbeat_at: now,
            };
            entry.updated_at = now;
            debug!(entry = %id, worker, lease = entry.lease, "Entry claimed");
            return Some(Claimed {
                claim: Claim {
                    id,
                    lease: entry.lease,
                    worker: worker.to_string(),
                },
                entry: entry.clone(),
            });
        }
    }

    /// Claims the next entry, waiting until one is due or `cancel` fires.
    pub async fn claim_next_wait(
        &self,
        worker: &str,
        cancel: &CancellationToken,
    ) -> Option<Claimed> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            // Register interest before checking so an enqueue in between is
            // not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(claimed) = self.claim_next(worker) {
                return Some(claimed);
            }

            let wait = self
                .next_due_in()
                .map(to_std_duration)
                .map_or(self.poll_interval, |d| d.min(self.poll_interval));

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Refreshes the claim's heartbeat.
    pub fn heartbeat(&self, claim: &Claim) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let entry = inner.owned(claim)?;
        if let EntryStatus::Processing { heartbeat_at, .. } = &mut entry.status {
            *heartbeat_at = now;
        }
        Ok(())
    }

    /// Whether cancellation was requested for the claimed entry.
    pub fn is_cancel_requested(&self, claim: &Claim) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock();
        Ok(inner.owned(claim)?.cancel_requested)
    }

    /// Marks the claimed entry `completed`.
    pub fn complete(
        &self,
        claim: &Claim,
        metrics: EntryMetrics,
    ) -> Result<AcquisitionQueueEntry, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let entry = inner.owned(claim)?;
        entry.metrics = metrics;
        entry.last_error = None;
        inner.finish(claim.id, EntryStatus::Completed, now);
        let entry = inner
            .entries
            .get(&claim.id)
            .cloned()
            .ok_or(QueueError::NotFound(claim.id))?;
        info!(
            entry = %entry.id,
            duration_ms = entry.metrics.duration_ms,
            processed = entry.metrics.processed_count,
            failed = entry.metrics.failed_count,
            "Acquisition completed"
        );
        Ok(entry)
    }

    /// Records a failure.
    ///
    /// Retryable failures re-queue with backoff while retries remain;
    /// everything else is terminal.
    pub fn fail(
        &self,
        claim: &Claim,
        error: impl Into<String>,
        kind: FailureKind,
        metrics: EntryMetrics,
    ) -> Result<FailOutcome, QueueError> {
        let error = error.into();
        let now = self.clock.now();
        let retry = self.retry;
        let mut inner = self.inner.lock();
        let entry = inner.owned(claim)?;
        entry.last_error = Some(error.clone());
        entry.metrics = metrics;
        entry.updated_at = now;

        let retry_allowed = kind == FailureKind::Retryable
            && retry.can_retry(entry.retry_count)
            && !entry.cancel_requested;

        if retry_allowed {
            let delay = retry.delay(entry.retry_count);
            entry.retry_count += 1;
            entry.scheduled_for = now + delay;
            entry.status = EntryStatus::Queued;
            warn!(
                entry = %entry.id,
                retry = entry.retry_count,
                max_retries = retry.max_retries,
                delay_secs = delay.num_seconds(),
                error = %error,
                "Acquisition failed, re-queued with backoff"
            );
            let snapshot = entry.clone();
            inner.schedule(claim.id, now);
            drop(inner);
            self.notify.notify_waiters();
            return Ok(FailOutcome::Requeued(snapshot));
        }

        inner.finish(claim.id, EntryStatus::Failed, now);
        let entry = inner
            .entries
            .get(&claim.id)
            .cloned()
            .ok_or(QueueError::NotFound(claim.id))?;
        warn!(
            entry = %entry.id,
            retries = entry.retry_count,
            error = %error,
            "Acquisition failed terminally"
        );
        Ok(FailOutcome::Terminal(entry))
    }

    /// Marks a claimed entry `canceled` after the worker honoured an
    /// advisory cancellation.
    pub fn finish_canceled(&self, claim: &Claim) -> Result<AcquisitionQueueEntry, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.owned(claim)?;
        inner.finish(claim.id, EntryStatus::Canceled, now);
        info!(entry = %claim.id, "Acquisition canceled while processing");
        inner
            .entries
            .get(&claim.id)
            .cloned()
            .ok_or(QueueError::NotFound(claim.id))
    }

    /// Returns a claimed entry to `queued` without counting a retry.
    pub fn abandon(&self, claim: &Claim) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let entry = inner.owned(claim)?;
        entry.status = EntryStatus::Queued;
        entry.updated_at = now;
        inner.schedule(claim.id, now);
        drop(inner);
        debug!(entry = %claim.id, "Claim abandoned");
        self.notify.notify_waiters();
        Ok(())
    }

    /// Cancels an entry: immediately while queued, advisory while processing.
    pub fn cancel(&self, id: EntryId) -> Result<CancelOutcome, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let status = inner
            .entries
            .get(&id)
            .map(|e| e.status.clone())
            .ok_or(QueueError::NotFound(id))?;

        match status {
            EntryStatus::Queued => {
                inner.unschedule(id);
                inner.finish(id, EntryStatus::Canceled, now);
                info!(entry = %id, "Acquisition canceled");
                let entry = inner.entries.get(&id).cloned().ok_or(QueueError::NotFound(id))?;
                Ok(CancelOutcome::Canceled(entry))
            }
            EntryStatus::Processing { .. } => {
                if let Some(entry) = inner.entries.get_mut(&id) {
                    entry.cancel_requested = true;
                    entry.updated_at = now;
                }
                info!(entry = %id, "Cancellation requested for processing entry");
                Ok(CancelOutcome::Requested)
            }
            other => Ok(CancelOutcome::AlreadyFinished(other.name())),
        }
    }

    /// Sweeps `processing` entries whose heartbeat is older than the claim
    /// timeout back to `queued`, invalidating their claims.
    ///
    /// Entries with a pending cancellation are canceled instead; nothing
    /// else will finish them, so the caller must release what they held.
    pub fn reap_stale(&self) -> ReapReport {
        let now = self.clock.now();
        let cutoff = now - self.claim_timeout;
        let mut inner = self.inner.lock();

        let stale: Vec<(EntryId, bool)> = inner
            .entries
            .values()
            .filter_map(|e| match &e.status {
                EntryStatus::Processing { heartbeat_at, .. } if *heartbeat_at < cutoff => {
                    Some((e.id, e.cancel_requested))
                }
                _ => None,
            })
            .collect();

        let mut report = ReapReport::default();
        for (id, cancel_requested) in stale {
            if cancel_requested {
                inner.finish(id, EntryStatus::Canceled, now);
                warn!(entry = %id, "Stale claim with pending cancellation, entry canceled");
                if let Some(entry) = inner.entries.get(&id) {
                    report.canceled.push(entry.clone());
                }
                continue;
            }
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.status = EntryStatus::Queued;
                entry.updated_at = now;
            }
            inner.schedule(id, now);
            warn!(entry = %id, "Stale claim reaped, entry re-queued");
            report.requeued.push(id);
        }
        drop(inner);

        if !report.requeued.is_empty() {
            self.notify.notify_waiters();
        }
        report
    }

    /// Raises the priority of the queued entry covering `land`.
    ///
    /// Returns the entry ID when an active entry contains the land.
    pub fn bump_priority_for_land(&self, land: &LandId, priority: Priority) -> Option<EntryId> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let id = inner
            .entries
            .values()
            .filter(|e| !e.status.is_terminal() && e.land_ids.contains(land))
            .map(|e| e.id)
            .min()?;
        if inner.set_priority(id, priority, now) {
            debug!(entry = %id, land = %land, priority = %priority, "Entry priority bumped");
        }
        Some(id)
    }

    /// Active entry for `target`, if any.
    pub fn active_entry_for(&self, target: &AcquisitionTarget) -> Option<EntryId> {
        self.inner.lock().active_targets.get(target).copied()
    }

    pub fn get(&self, id: EntryId) -> Option<AcquisitionQueueEntry> {
        self.inner.lock().entries.get(&id).cloned()
    }

    /// All entries ordered by ID.
    pub fn entries(&self) -> Vec<AcquisitionQueueEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn stats(&self) -> QueueStats {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for entry in inner.entries.values() {
            match entry.status {
                EntryStatus::Queued if entry.scheduled_for <= now => stats.ready += 1,
                EntryStatus::Queued => stats.delayed += 1,
                EntryStatus::Processing { .. } => stats.processing += 1,
                EntryStatus::Completed => stats.completed += 1,
                EntryStatus::Failed => stats.failed += 1,
                EntryStatus::Canceled => stats.canceled += 1,
            }
        }
        stats
    }

    /// Time until the earliest delayed entry becomes due.
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner
            .delayed
            .first()
            .map(|(due, _, _)| (*due - now).max(Duration::zero()))
    }

    /// Drops terminal entries that finished before `cutoff`.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| !(e.status.is_terminal() && e.finished_at.is_some_and(|t| t < cutoff)));
        before - inner.entries.len()
    }
}
