// Durable list queue
//
// Each queue name owns two lists in the backing store:
//   <prefix>:queue_<name>  pending jobs; new jobs go on the head, workers take from the tail
//   <prefix>:work_<name>   the job currently being processed (at most one per worker)
//
// The pending -> work move is a single store primitive, so a job is never in
// neither list and never in both. A worker that dies mid-job leaves the job in
// the work list; the next worker for that queue moves it back on start.

pub mod envelope;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{PENDING_LIST_PREFIX, WORK_LIST_PREFIX};
use crate::error::{Result, XBakeError};

pub use envelope::{Envelope, EnvelopeError};

/// Queue names known to the pipeline. Every name has exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueName {
    Transfer,
    Transcode,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Transfer, QueueName::Transcode];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Transfer => "transfer",
            QueueName::Transcode => "transcode",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = XBakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "transfer" | "xfer" => Ok(QueueName::Transfer),
            "transcode" | "xcode" => Ok(QueueName::Transcode),
            other => Err(XBakeError::Queue(format!("Unknown queue name: {}", other))),
        }
    }
}

/// List primitives the backing key-value store must provide.
/// Head is the left end, tail the right end (Redis orientation).
pub trait ListStore: Send + Sync {
    /// RPUSH
    fn push_tail(&self, key: &str, value: &str) -> Result<()>;
    /// LPUSH
    fn push_head(&self, key: &str, value: &str) -> Result<()>;
    /// LPOP
    fn pop_head(&self, key: &str) -> Result<Option<String>>;
    /// RPOP
    fn pop_tail(&self, key: &str) -> Result<Option<String>>;
    /// LLEN
    fn len(&self, key: &str) -> Result<usize>;
    /// BRPOPLPUSH: atomically pop the tail of `src` and push it on the head
    /// of `dst`, waiting up to `timeout` for `src` to become non-empty.
    fn move_tail_to_head_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<String>>;
}

/// Result of one blocking dequeue
#[derive(Debug)]
pub enum Dequeued {
    /// A job, now sitting in the work list until acknowledged
    Job(Envelope),
    /// An entry that could not be parsed; already removed from the work list
    Malformed { raw: String, error: EnvelopeError },
    /// Timed out with nothing pending
    Empty,
}

/// Outcome of a crash-recovery sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub discarded: usize,
}

/// Queue operations over a [`ListStore`]
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn ListStore>,
    prefix: String,
}

impl JobQueue {
    pub fn new(store: Arc<dyn ListStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn pending_key(&self, queue: QueueName) -> String {
        format!("{}:{}{}", self.prefix, PENDING_LIST_PREFIX, queue)
    }

    pub fn work_key(&self, queue: QueueName) -> String {
        format!("{}:{}{}", self.prefix, WORK_LIST_PREFIX, queue)
    }

    pub fn enqueue(&self, queue: QueueName, envelope: &Envelope) -> Result<()> {
        let raw = envelope.to_json()?;
        self.store.push_head(&self.pending_key(queue), &raw)?;
        log::info!("Enqueued job {} (file {}) in queue {}", envelope.id, envelope.fid, queue);
        Ok(())
    }

    /// Move the oldest pending job into the work list, waiting up to `timeout`.
    /// Malformed entries are dropped from the work list and reported.
    pub fn dequeue_blocking(&self, queue: QueueName, timeout: Duration) -> Result<Dequeued> {
        let raw = self.store.move_tail_to_head_blocking(
            &self.pending_key(queue),
            &self.work_key(queue),
            timeout,
        )?;

        let Some(raw) = raw else {
            return Ok(Dequeued::Empty);
        };

        match Envelope::parse(&raw) {
            Ok(envelope) => Ok(Dequeued::Job(envelope)),
            Err(error) => {
                self.store.pop_head(&self.work_key(queue))?;
                Ok(Dequeued::Malformed { raw, error })
            }
        }
    }

    /// Remove the most recently moved entry from the work list.
    /// Returns false if the work list was already empty.
    pub fn acknowledge(&self, queue: QueueName) -> Result<bool> {
        Ok(self.store.pop_head(&self.work_key(queue))?.is_some())
    }

    /// Drain the work list back onto the dequeue end of the pending list.
    /// Assumes no other live worker is bound to `queue`.
    pub fn recover_abandoned(&self, queue: QueueName) -> Result<RecoveryReport> {
        let work = self.work_key(queue);
        let pending = self.pending_key(queue);
        let mut report = RecoveryReport::default();

        while let Some(raw) = self.store.pop_head(&work)? {
            match Envelope::parse(&raw) {
                Ok(envelope) => {
                    log::warn!("[{}] Requeued abandoned job {}", queue, envelope.id);
                    self.store.push_tail(&pending, &raw)?;
                    report.requeued += 1;
                }
                Err(e) => {
                    log::error!(
                        "[{}] Crash recovery: bad queue entry, job discarded ({}): {}",
                        queue, e, raw
                    );
                    report.discarded += 1;
                }
            }
        }

        Ok(report)
    }

    pub fn pending_len(&self, queue: QueueName) -> Result<usize> {
        self.store.len(&self.pending_key(queue))
    }

    pub fn work_len(&self, queue: QueueName) -> Result<usize> {
        self.store.len(&self.work_key(queue))
    }
}
