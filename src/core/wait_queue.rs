//! Priority wait queue with FIFO tie-break.
//!
//! Entries are kept sorted by (priority desc, submitted_at asc) at all times so
//! the head is always the next job to admit and an entry's index is its
//! queue position.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::core::job::Job;
use crate::core::SchedulerError;
use crate::util::serde::{JobId, Priority};

/// Sort key; `Less` means "dequeues earlier".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: Priority,
    submitted_at_ms: u64,
    /// Insertion counter; keeps equal timestamps in arrival order.
    seq: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.submitted_at_ms.cmp(&other.submitted_at_ms))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Entry<P> {
    key: QueueKey,
    job: Job<P>,
}

/// Sorted in-memory queue of jobs waiting for a slot.
pub struct WaitQueue<P> {
    max_depth: Option<usize>,
    next_seq: u64,
    entries: VecDeque<Entry<P>>,
}

impl<P> WaitQueue<P> {
    /// Create a queue, optionally bounded.
    #[must_use]
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            max_depth,
            next_seq: 0,
            entries: VecDeque::with_capacity(max_depth.unwrap_or(16).min(1024)),
        }
    }

    /// Insert preserving order and return the zero-based index it landed at.
    pub fn push(&mut self, job: Job<P>) -> Result<usize, SchedulerError> {
        if let Some(max) = self.max_depth {
            if self.entries.len() >= max {
                return Err(SchedulerError::QueueFull(format!(
                    "max queue depth {max} reached"
                )));
            }
        }
        let key = QueueKey {
            priority: job.meta.priority,
            submitted_at_ms: job.meta.submitted_at_ms,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let index = self.entries.partition_point(|e| e.key <= key);
        self.entries.insert(index, Entry { key, job });
        Ok(index)
    }

    /// Next job to admit, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Job<P>> {
        self.entries.front().map(|e| &e.job)
    }

    /// Remove and return the head.
    pub fn pop_front(&mut self) -> Option<Job<P>> {
        self.entries.pop_front().map(|e| e.job)
    }

    /// Withdraw a job by id.
    pub fn remove(&mut self, id: JobId) -> Option<Job<P>> {
        let index = self.entries.iter().position(|e| e.job.meta.id == id)?;
        self.entries.remove(index).map(|e| e.job)
    }

    /// Whether a job with this id is waiting.
    #[must_use]
    pub fn contains(&self, id: JobId) -> bool {
        self.entries.iter().any(|e| e.job.meta.id == id)
    }

    /// Jobs in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = &Job<P>> {
        self.entries.iter().map(|e| &e.job)
    }

    /// Current depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured bound.
    #[must_use]
    pub const fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Check the (priority desc, submitted_at asc) ordering.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(a, b)| {
                a.job.meta.priority > b.job.meta.priority
                    || (a.job.meta.priority == b.job.meta.priority
                        && a.job.meta.submitted_at_ms <= b.job.meta.submitted_at_ms)
            })
    }
}
