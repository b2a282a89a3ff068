//! Pool of acquisition workers.

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::processor::AcquisitionWorker;

/// N workers claiming from one queue.
///
/// Each worker loops on [`AcquisitionQueue::claim_next_wait`], so idle
/// workers park until work is due. Shutdown stops new claims; an entry being
/// processed runs to its final transition first.
///
/// [`AcquisitionQueue::claim_next_wait`]: crate::queue::AcquisitionQueue::claim_next_wait
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawns `worker.settings().count` workers on `runtime_handle`.
    pub fn start(
        worker: AcquisitionWorker,
        runtime_handle: &Handle,
        shutdown: CancellationToken,
    ) -> Self {
        let count = worker.settings().count.max(1);
        let handles = (0..count)
            .map(|n| {
                let worker = worker.clone();
                let shutdown = shutdown.clone();
                runtime_handle.spawn(worker_loop(format!("worker-{}", n), worker, shutdown))
            })
            .collect();

        info!(workers = count, "Worker pool started");
        Self { handles, shutdown }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stops claiming and waits for every worker to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(name: String, worker: AcquisitionWorker, shutdown: CancellationToken) {
    debug!(worker = %name, "Worker starting");
    while let Some(claimed) = worker.queue().claim_next_wait(&name, &shutdown).await {
        worker.process(claimed).await;
    }
    debug!(worker = %name, "Worker stopping");
}
