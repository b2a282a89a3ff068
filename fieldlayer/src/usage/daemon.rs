//! Usage accounting daemon.
//!
//! The [`UsageDaemon`] is the single writer of every tenant's usage
//! counters. Workers reach it only through a [`UsageClient`], so budget
//! checks and counter updates are serialized without a shared lock.
//!
//! [`UsageClient`]: super::UsageClient

use super::event::UsageEvent;
use super::state::UsageState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The usage accounting daemon.
pub struct UsageDaemon {
    /// Channel receiver for incoming events.
    rx: mpsc::UnboundedReceiver<UsageEvent>,

    /// Counters and outstanding reservations.
    state: UsageState,
}

impl UsageDaemon {
    pub fn new(rx: mpsc::UnboundedReceiver<UsageEvent>) -> Self {
        Self {
            rx,
            state: UsageState::new(),
        }
    }

    /// Runs the daemon until shutdown is signaled or every client is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Usage daemon starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Usage daemon shutting down");
                    break;
                }

                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => {
                            debug!("All usage clients dropped");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle(&mut self, event: UsageEvent) {
        match event {
            UsageEvent::Reserve {
                tenant,
                date,
                units,
                budget,
                reply,
            } => {
                let result = self.state.reserve(&tenant, date, units, budget);
                if let Err(err) = &result {
                    warn!(tenant = %tenant, %date, error = %err, "Provider call refused");
                }
                // Caller may have given up; the reservation then leaks until
                // settled, so release it.
                if let Err(Ok(reservation)) = reply.send(result) {
                    self.state.release(&reservation);
                }
            }
            UsageEvent::Settle { reservation, delta } => {
                self.state.settle(&reservation, &delta);
            }
            UsageEvent::Release { reservation } => {
                self.state.release(&reservation);
            }
            UsageEvent::Record {
                tenant,
                date,
                delta,
            } => {
                self.state.record(&tenant, date, &delta);
            }
            UsageEvent::Get {
                tenant,
                date,
                reply,
            } => {
                let _ = reply.send(self.state.get(&tenant, date));
            }
            UsageEvent::All { reply } => {
                let _ = reply.send(self.state.all());
            }
        }
    }
}
