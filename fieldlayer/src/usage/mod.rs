//! Per-tenant provider usage and quota accounting.
//!
//! Usage counters live inside a single daemon task. Callers reserve the
//! processing units a provider call is expected to cost before making it,
//! then settle the reservation with what the call actually cost:
//!
//! ```text
//! orchestrator ──reserve──▶ UsageDaemon ──ok / QuotaExceeded──▶ orchestrator
//!      │                        ▲
//!      └──── provider call ─────┴── settle(success | failure)
//! ```
//!
//! Because reservations are counted against the budget until settled,
//! concurrent workers for the same tenant cannot jointly overrun it.

mod client;
mod daemon;
mod event;
mod state;

pub use client::UsageClient;
pub use daemon::UsageDaemon;
pub use event::UsageEvent;
pub use state::{ApiUsageRecord, Reservation, UsageDelta, UsageError, UsageState};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The usage daemon together with its client and shutdown handle.
pub struct UsageSystem {
    client: UsageClient,
    daemon_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl UsageSystem {
    /// Creates the daemon and spawns it on `runtime_handle`.
    pub fn new(runtime_handle: &tokio::runtime::Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = UsageClient::new(tx);
        let daemon = UsageDaemon::new(rx);
        let shutdown = CancellationToken::new();

        let daemon_shutdown = shutdown.clone();
        let daemon_handle = Some(runtime_handle.spawn(async move {
            daemon.run(daemon_shutdown).await;
        }));

        Self {
            client,
            daemon_handle,
            shutdown,
        }
    }

    pub fn client(&self) -> UsageClient {
        self.client.clone()
    }

    /// Stops the daemon and waits for it to exit.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.daemon_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for UsageSystem {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
