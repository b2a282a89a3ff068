//! The processing ledger.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace, warn};

use super::types::{Alert, ProcessingLogEntry, StepStatus};
use crate::time::Clock;

/// Append-only, step-level audit log.
///
/// Rows are kept in memory and, when a path is configured, appended to a
/// JSON-lines file as they are written. Terminal failures additionally
/// raise an [`Alert`].
pub struct ProcessingLedger {
    rows: RwLock<Vec<ProcessingLogEntry>>,
    alerts: RwLock<Vec<Alert>>,
    next_seq: AtomicU64,
    sink: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl ProcessingLedger {
    /// In-memory ledger.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            sink: None,
            path: None,
            clock,
        }
    }

    /// Ledger that also appends every row to `path`.
    ///
    /// Rows already in the file are loaded first so sequence numbers keep
    /// increasing across restarts.
    pub fn with_file(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existing = if path.exists() {
            Self::read_rows(&path)?
        } else {
            Vec::new()
        };
        let next_seq = existing.last().map_or(1, |r| r.seq + 1);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            rows: RwLock::new(existing),
            alerts: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(next_seq),
            sink: Some(Mutex::new(BufWriter::new(file))),
            path: Some(path),
            clock,
        })
    }

    /// Reads rows from a JSON-lines ledger file.
    pub fn read_rows(path: &Path) -> io::Result<Vec<ProcessingLogEntry>> {
        let reader = BufReader::new(File::open(path)?);
        let mut rows = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "Skipping corrupt ledger row"),
            }
        }
        Ok(rows)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens a step and writes its `started` row.
    pub fn start(&self, subject: impl Into<String>, step: impl Into<String>) -> StepHandle<'_> {
        let subject = subject.into();
        let step = step.into();
        let started_at = self.clock.now();
        self.append(ProcessingLogEntry {
            seq: 0,
            subject: subject.clone(),
            step: step.clone(),
            status: StepStatus::Started,
            started_at,
            finished_at: None,
            duration_ms: None,
            error: None,
        });
        StepHandle {
            ledger: self,
            subject,
            step,
            started_at,
            finished: false,
        }
    }

    /// Records a terminal failure that has no open step, and raises an alert.
    pub fn record_terminal_failure(&self, subject: &str, step: &str, error: &str) {
        let now = self.clock.now();
        self.append(ProcessingLogEntry {
            seq: 0,
            subject: subject.to_string(),
            step: step.to_string(),
            status: StepStatus::Failed,
            started_at: now,
            finished_at: Some(now),
            duration_ms: Some(0),
            error: Some(error.to_string()),
        });
        self.raise(subject, step, error);
    }

    /// Raises an alert for a failure that will not be retried.
    pub fn raise(&self, subject: &str, step: &str, error: &str) {
        error!(subject = subject, step = step, error = error, "Terminal processing failure");
        self.alerts.write().push(Alert {
            subject: subject.to_string(),
            step: step.to_string(),
            error: error.to_string(),
            raised_at: self.clock.now(),
        });
    }

    fn finish(
        &self,
        subject: &str,
        step: &str,
        started_at: DateTime<Utc>,
        status: StepStatus,
        error: Option<String>,
    ) -> ProcessingLogEntry {
        let finished_at = self.clock.now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        self.append(ProcessingLogEntry {
            seq: 0,
            subject: subject.to_string(),
            step: step.to_string(),
            status,
            started_at,
            finished_at: Some(finished_at),
            duration_ms: Some(duration_ms),
            error,
        })
    }

    fn append(&self, mut row: ProcessingLogEntry) -> ProcessingLogEntry {
        let mut rows = self.rows.write();
        row.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if let Some(sink) = &self.sink {
            let mut sink = sink.lock();
            let written = serde_json::to_string(&row)
                .map_err(io::Error::from)
                .and_then(|json| writeln!(sink, "{}", json))
                .and_then(|_| sink.flush());
            if let Err(e) = written {
                warn!(error = %e, "Failed to persist ledger row");
            }
        }
        trace!(subject = %row.subject, step = %row.step, status = %row.status, "Ledger row");
        rows.push(row.clone());
        row
    }

    /// Every row, in append order.
    pub fn entries(&self) -> Vec<ProcessingLogEntry> {
        self.rows.read().clone()
    }

    /// Rows for one subject, in append order.
    pub fn entries_for(&self, subject: &str) -> Vec<ProcessingLogEntry> {
        self.rows
            .read()
            .iter()
            .filter(|r| r.subject == subject)
            .cloned()
            .collect()
    }

    /// Failed rows, in append order.
    pub fn failures(&self) -> Vec<ProcessingLogEntry> {
        self.rows
            .read()
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .cloned()
            .collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

/// An open ledger step.
///
/// Dropping a handle without finishing it records the step as failed, so
/// a step abandoned by an early return still shows up in the ledger.
pub struct StepHandle<'a> {
    ledger: &'a ProcessingLedger,
    subject: String,
    step: String,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl StepHandle<'_> {
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn complete(mut self) -> ProcessingLogEntry {
        self.finished = true;
        self.ledger.finish(
            &self.subject,
            &self.step,
            self.started_at,
            StepStatus::Completed,
            None,
        )
    }

    pub fn fail(mut self, error: impl ToString) -> ProcessingLogEntry {
        self.finished = true;
        self.ledger.finish(
            &self.subject,
            &self.step,
            self.started_at,
            StepStatus::Failed,
            Some(error.to_string()),
        )
    }
}

impl Drop for StepHandle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.ledger.finish(
                &self.subject,
                &self.step,
                self.started_at,
                StepStatus::Failed,
                Some("step abandoned".to_string()),
            );
        }
    }
}
