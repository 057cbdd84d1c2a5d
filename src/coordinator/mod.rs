// Master coordinator
//
// Starts exactly one worker per queue name, then accepts scan submissions.

pub mod scan;

use std::sync::Arc;

use crate::error::Result;
use crate::queue::{JobQueue, QueueName};
use crate::store::MetadataStore;
use crate::supervisor::Supervisor;

pub use scan::{submit_scan_result, CollectionStats, ScanStats, SubmitResult, SubmitStatus};

pub struct Coordinator<S: Supervisor> {
    supervisor: S,
    queue: JobQueue,
    store: Arc<dyn MetadataStore>,
    started: bool,
}

impl<S: Supervisor> Coordinator<S> {
    pub fn new(supervisor: S, queue: JobQueue, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            supervisor,
            queue,
            store,
            started: false,
        }
    }

    /// Spawn one worker per queue name. Calling it again is a no-op.
    pub fn start_workers(&mut self) -> Result<()> {
        if self.started {
            log::warn!("Queue runners already started");
            return Ok(());
        }
        for queue in QueueName::ALL {
            self.supervisor.spawn(queue)?;
        }
        self.started = true;
        Ok(())
    }

    pub fn workers_started(&self) -> bool {
        self.started
    }

    /// Persist a scan payload and queue transfers for new or changed files
    pub fn submit_scan_result(&self, payload: &serde_json::Value) -> SubmitResult {
        if !self.started {
            log::warn!("Scan submitted before queue runners were started");
        }
        scan::submit_scan_result(&self.queue, self.store.as_ref(), payload)
    }

    pub fn supervisor_mut(&mut self) -> &mut S {
        &mut self.supervisor
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.started = false;
        self.supervisor.shutdown()
    }
}
