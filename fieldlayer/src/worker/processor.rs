//! Processing of one claimed queue entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{WorkOutcome, WorkerSettings};
use crate::cache::{CacheEntry, NdviCache};
use crate::cluster::ClusterBuilder;
use crate::compute::{IndexPipeline, PipelineError, PipelineInput};
use crate::ledger::ProcessingLedger;
use crate::ids::LandId;
use crate::mapper::{LandTileMapping, MappingStore};
use crate::provider::{AcquisitionOrchestrator, DateRange, ImageryRequest};
use crate::queue::{
    AcquisitionQueue, AcquisitionQueueEntry, AcquisitionTarget, Claim, Claimed, EntryMetrics,
    EntryRelease, EntryStatus, FailOutcome, FailureKind, QueueError,
};
use crate::time::Clock;

/// Ledger step names owned by the worker. Pipeline steps log themselves.
const STEP_LANDS: &str = "lands";
const STEP_ACQUIRE: &str = "acquire";
const STEP_COMPUTE: &str = "compute";
const STEP_CACHE: &str = "cache";

/// Drives claimed entries through acquisition, computation and caching.
///
/// Cheap to clone; every worker in a pool shares one.
#[derive(Clone)]
pub struct AcquisitionWorker {
    queue: Arc<AcquisitionQueue>,
    mappings: Arc<MappingStore>,
    clusters: Arc<ClusterBuilder>,
    orchestrator: Arc<AcquisitionOrchestrator>,
    pipeline: Arc<IndexPipeline>,
    cache: Arc<NdviCache>,
    ledger: Arc<ProcessingLedger>,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
}

/// Where a run stopped and why.
struct Failure {
    step: String,
    error: String,
    kind: FailureKind,
}

impl Failure {
    fn terminal(step: &str, error: impl ToString) -> Self {
        Self {
            step: step.to_string(),
            error: error.to_string(),
            kind: FailureKind::Terminal,
        }
    }
}

enum Stop {
    Failed(Failure, EntryMetrics),
    Canceled,
    LeaseLost,
}

impl From<QueueError> for Stop {
    fn from(_: QueueError) -> Self {
        Stop::LeaseLost
    }
}

impl AcquisitionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<AcquisitionQueue>,
        mappings: Arc<MappingStore>,
        clusters: Arc<ClusterBuilder>,
        orchestrator: Arc<AcquisitionOrchestrator>,
        pipeline: Arc<IndexPipeline>,
        cache: Arc<NdviCache>,
        ledger: Arc<ProcessingLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            mappings,
            clusters,
            orchestrator,
            pipeline,
            cache,
            ledger,
            clock,
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn queue(&self) -> &Arc<AcquisitionQueue> {
        &self.queue
    }

    /// Processes one claimed entry to a final queue transition.
    ///
    /// The claim is heartbeated from a side task for as long as this runs.
    pub async fn process(&self, claimed: Claimed) -> WorkOutcome {
        let Claimed { claim, entry } = claimed;
        let started = Instant::now();
        info!(
            entry = %entry.id,
            target = %entry.target,
            tenant = %entry.tenant_id,
            lands = entry.land_ids.len(),
            worker = claim.worker(),
            retry = entry.retry_count,
            "Processing acquisition"
        );

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.queue),
            claim.clone(),
            self.settings.heartbeat_interval,
            heartbeat_stop.clone(),
        ));

        let outcome = match self.drive(&claim, &entry, started).await {
            Ok(outcome) => outcome,
            Err(Stop::Failed(failure, metrics)) => self.fail(&claim, &entry, failure, metrics),
            Err(Stop::Canceled) => self.cancel(&claim, &entry),
            Err(Stop::LeaseLost) => {
                // The reaper cancels stale claims that had a cancel pending.
                if let Some(current) = self.queue.get(entry.id) {
                    if matches!(current.status, EntryStatus::Canceled) {
                        self.release(&current);
                    }
                }
                warn!(entry = %entry.id, "Claim lease lost, leaving entry to its new owner");
                WorkOutcome::LeaseLost
            }
        };

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        debug!(
            entry = %entry.id,
            outcome = outcome.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Acquisition finished"
        );
        outcome
    }

    async fn drive(
        &self,
        claim: &Claim,
        entry: &AcquisitionQueueEntry,
        started: Instant,
    ) -> Result<WorkOutcome, Stop> {
        let subject = entry.id.to_string();
        let mut metrics = EntryMetrics::default();

        self.check_cancel(claim)?;
        let step = self.ledger.start(subject.as_str(), STEP_LANDS);
        let lands = self.lands_for(entry);
        if lands.is_empty() {
            step.fail("no mapped lands");
            return Err(Stop::Failed(
                Failure::terminal(STEP_LANDS, "no mapped lands"),
                metrics,
            ));
        }
        step.complete();
        // Revisions the entry was planned against win over the ones read now.
        let revisions: HashMap<LandId, u64> = lands
            .iter()
            .map(|m| {
                let planned = entry.land_revisions.get(&m.land_id).copied();
                (m.land_id.clone(), planned.unwrap_or(m.revision))
            })
            .collect();

        self.check_cancel(claim)?;
        let today = self.clock.today();
        let dates = DateRange::new(
            today - ChronoDuration::days(self.settings.search_window_days.max(0)),
            today,
        );
        let request = ImageryRequest::for_bbox(
            entry.bbox,
            dates,
            self.settings.resolution_m,
            self.settings.max_pixels,
        );

        let step = self.ledger.start(subject.as_str(), STEP_ACQUIRE);
        let acquisition = match self.orchestrator.acquire(&entry.tenant_id, &request).await {
            Ok(acquisition) => {
                step.complete();
                acquisition
            }
            Err(err) => {
                step.fail(&err);
                let kind = if err.is_retryable() {
                    FailureKind::Retryable
                } else {
                    FailureKind::Terminal
                };
                metrics.duration_ms = started.elapsed().as_millis() as u64;
                return Err(Stop::Failed(
                    Failure {
                        step: STEP_ACQUIRE.to_string(),
                        error: err.to_string(),
                        kind,
                    },
                    metrics,
                ));
            }
        };
        metrics.processing_units = acquisition.fetched.cost.processing_units;
        metrics.bytes = acquisition.fetched.cost.bytes;
        debug!(
            entry = %entry.id,
            provider = %acquisition.provider,
            attempts = acquisition.attempts,
            units = metrics.processing_units,
            "Imagery acquired"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let queue = Arc::clone(&self.queue);
        let cancel_claim = claim.clone();
        let target = entry.target.clone();
        let tenant = entry.tenant_id.clone();
        let bands = request.bands.clone();
        let imagery = acquisition.fetched.imagery;
        let run_subject = subject.clone();
        let computed = tokio::task::spawn_blocking(move || {
            let canceled = || queue.is_cancel_requested(&cancel_claim).unwrap_or(true);
            pipeline.run(
                PipelineInput {
                    subject: &run_subject,
                    target: &target,
                    tenant_id: &tenant,
                    imagery: &imagery,
                    bands: &bands,
                    lands: &lands,
                },
                &canceled,
            )
        })
        .await;

        let outcome = match computed {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(PipelineError::Canceled { step })) => {
                debug!(entry = %entry.id, step = %step, "Pipeline stopped on cancellation");
                return Err(Stop::Canceled);
            }
            Ok(Err(PipelineError::StepFailed { step, reason })) => {
                metrics.duration_ms = started.elapsed().as_millis() as u64;
                return Err(Stop::Failed(
                    Failure::terminal(step.as_str(), reason),
                    metrics,
                ));
            }
            Ok(Err(err)) => {
                metrics.duration_ms = started.elapsed().as_millis() as u64;
                return Err(Stop::Failed(Failure::terminal(STEP_COMPUTE, err), metrics));
            }
            Err(join_err) => {
                let step = self.ledger.start(subject.as_str(), STEP_COMPUTE);
                step.fail(&join_err);
                metrics.duration_ms = started.elapsed().as_millis() as u64;
                return Err(Stop::Failed(
                    Failure::terminal(STEP_COMPUTE, join_err),
                    metrics,
                ));
            }
        };

        let step = self.ledger.start(subject.as_str(), STEP_CACHE);
        let now = self.clock.now();
        let mut processed = 0u32;
        let mut superseded = 0u32;
        for record in &outcome.records {
            let revision = revisions.get(&record.land_id).copied().unwrap_or_default();
            let ttl = self.cache.ttl().ttl_for(record.cloud_cover_pct);
            let value = CacheEntry::from_record(record, record.computed_at + ttl);
            let expires_at = value.expires_at;
            let cached = self.mappings.record_cached(
                &record.land_id,
                revision,
                record.stats.mean,
                expires_at,
                now,
                || self.cache.insert(value),
            );
            if cached {
                processed += 1;
            } else {
                // Boundary changed mid-flight; the value describes the old geometry.
                debug!(entry = %entry.id, land = %record.land_id, revision, "Skipping superseded land");
                self.cache.clear_pending(&record.land_id);
                superseded += 1;
            }
        }
        for (land, _) in &outcome.failed_lands {
            self.cache.clear_pending(land);
        }
        step.complete();

        let failed = outcome.failed_count() + superseded;
        metrics.processed_count = processed;
        metrics.failed_count = failed;
        metrics.duration_ms = started.elapsed().as_millis() as u64;

        self.queue.complete(claim, metrics)?;
        self.clusters.release_for_entry(entry);

        Ok(WorkOutcome::Completed { processed, failed })
    }

    fn check_cancel(&self, claim: &Claim) -> Result<(), Stop> {
        if self.queue.is_cancel_requested(claim)? {
            return Err(Stop::Canceled);
        }
        Ok(())
    }

    /// Mappings of the lands an entry covers.
    ///
    /// Tile entries without an explicit land list cover every land whose
    /// boundary touches the tile.
    fn lands_for(&self, entry: &AcquisitionQueueEntry) -> Vec<LandTileMapping> {
        let listed: Vec<_> = entry
            .land_ids
            .iter()
            .filter_map(|id| self.mappings.get(id))
            .filter(|m| m.tenant_id == entry.tenant_id)
            .collect();
        if !listed.is_empty() {
            return listed;
        }
        match &entry.target {
            AcquisitionTarget::Tile { coord } => self
                .mappings
                .all()
                .into_iter()
                .filter(|m| m.tenant_id == entry.tenant_id && m.tiles.contains(coord))
                .collect(),
            AcquisitionTarget::Cluster { .. } => Vec::new(),
        }
    }

    fn fail(
        &self,
        claim: &Claim,
        entry: &AcquisitionQueueEntry,
        failure: Failure,
        metrics: EntryMetrics,
    ) -> WorkOutcome {
        match self
            .queue
            .fail(claim, failure.error.as_str(), failure.kind, metrics)
        {
            Ok(FailOutcome::Requeued(requeued)) => WorkOutcome::Requeued {
                retry: requeued.retry_count,
            },
            Ok(FailOutcome::Terminal(_)) => {
                self.ledger
                    .raise(&entry.id.to_string(), &failure.step, &failure.error);
                self.release(entry);
                WorkOutcome::Failed { step: failure.step }
            }
            Err(err) => {
                warn!(entry = %entry.id, error = %err, "Could not record failure");
                WorkOutcome::LeaseLost
            }
        }
    }

    fn cancel(&self, claim: &Claim, entry: &AcquisitionQueueEntry) -> WorkOutcome {
        match self.queue.finish_canceled(claim) {
            Ok(_) => {
                self.release(entry);
                WorkOutcome::Canceled
            }
            Err(err) => {
                warn!(entry = %entry.id, error = %err, "Could not record cancellation");
                WorkOutcome::LeaseLost
            }
        }
    }

    /// Frees the entry's cluster and lets its lands be requested again.
    ///
    /// Called for every entry that ends without caching its lands.
    pub fn release(&self, entry: &AcquisitionQueueEntry) {
        self.clusters.release_for_entry(entry);
        for land in &entry.land_ids {
            self.cache.clear_pending(land);
        }
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &Arc<NdviCache> {
        &self.cache
    }
}

impl EntryRelease for AcquisitionWorker {
    fn release(&self, entry: &AcquisitionQueueEntry) {
        AcquisitionWorker::release(self, entry);
    }
}

async fn heartbeat_loop(
    queue: Arc<AcquisitionQueue>,
    claim: Claim,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The claim was stamped when taken; skip the immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            _ = ticker.tick() => {
                if let Err(err) = queue.heartbeat(&claim) {
                    debug!(entry = %claim.id(), error = %err, "Heartbeat rejected, stopping");
                    break;
                }
            }
        }
    }
}
