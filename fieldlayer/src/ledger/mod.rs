//! Step-level processing audit log.
//!
//! Every acquisition and computation step writes a `started` row and then
//! a `completed` or `failed` row with its duration. Failures that will not
//! be retried also raise an alert, which is how exhausted retries and
//! terminal provider errors are surfaced.

mod journal;
mod types;

pub use journal::{ProcessingLedger, StepHandle};
pub use types::{Alert, ProcessingLogEntry, StepStatus};
