//! Observable execution progress.
//!
//! The engine updates the handle after each batch; any number of clones can
//! read a consistent-enough snapshot mid-run without locking.

use crate::models::ExecutionStatus;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const STATUS_RUNNING: u8 = 0;
const STATUS_SUCCESS: u8 = 1;
const STATUS_PARTIAL: u8 = 2;
const STATUS_FAILED: u8 = 3;

#[derive(Debug, Default)]
struct ProgressInner {
    total: AtomicUsize,
    processed: AtomicUsize,
    failed: AtomicUsize,
    status: AtomicU8,
}

/// Cloneable view onto a running execution's counters.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<ProgressInner>,
}

/// Point-in-time copy of the progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub status: ExecutionStatus,
}

impl ProgressHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.inner.total.load(Ordering::Acquire),
            processed: self.inner.processed.load(Ordering::Acquire),
            failed: self.inner.failed.load(Ordering::Acquire),
            status: decode_status(self.inner.status.load(Ordering::Acquire)),
        }
    }

    /// Starts a new run: stores the total and clears the counters left over
    /// from any previous run on the same handle.
    pub(crate) fn begin_run(&self, total: usize) {
        self.inner.total.store(total, Ordering::Release);
        self.inner.processed.store(0, Ordering::Release);
        self.inner.failed.store(0, Ordering::Release);
        self.inner.status.store(STATUS_RUNNING, Ordering::Release);
    }

    pub(crate) fn add_processed(&self, n: usize) {
        self.inner.processed.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn add_failed(&self, n: usize) {
        self.inner.failed.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn set_status(&self, status: ExecutionStatus) {
        self.inner.status.store(encode_status(status), Ordering::Release);
    }
}

fn encode_status(status: ExecutionStatus) -> u8 {
    match status {
        ExecutionStatus::Running => STATUS_RUNNING,
        ExecutionStatus::Success => STATUS_SUCCESS,
        ExecutionStatus::Partial => STATUS_PARTIAL,
        ExecutionStatus::Failed => STATUS_FAILED,
    }
}

fn decode_status(raw: u8) -> ExecutionStatus {
    match raw {
        STATUS_SUCCESS => ExecutionStatus::Success,
        STATUS_PARTIAL => ExecutionStatus::Partial,
        STATUS_FAILED => ExecutionStatus::Failed,
        _ => ExecutionStatus::Running,
    }
}
