// Queue worker -- one per queue name, single job in flight.
//
// STARTING -> RECOVERING -> IDLE <-> PROCESSING -> TERMINATING
//
// After every poll the worker checks that the process that started it is still
// alive and exits when it is not, so workers never outlive their master.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{runner, JobOutcome, WorkerContext};
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::queue::{Dequeued, QueueName, RecoveryReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Recovering,
    Idle,
    Processing,
    Terminating,
}

/// Liveness check for the parent (master) process
pub trait ParentProbe: Send {
    fn is_alive(&self) -> bool;
}

/// Signal-0 probe of a process id
pub struct PidProbe {
    pid: i32,
}

impl PidProbe {
    pub fn new(pid: u32) -> Self {
        // Out-of-range pids probe as 0, which reads as not alive
        Self {
            pid: i32::try_from(pid).unwrap_or(0),
        }
    }
}

impl ParentProbe for PidProbe {
    fn is_alive(&self) -> bool {
        if self.pid <= 0 {
            return false;
        }
        // SAFETY: kill with signal 0 performs only the existence/permission check
        let rc = unsafe { libc::kill(self.pid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

/// Liveness driven by a shared flag; used for in-process workers
#[derive(Clone)]
pub struct FlagProbe(pub Arc<AtomicBool>);

impl ParentProbe for FlagProbe {
    fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub warnings: u64,
    pub failed: u64,
    pub malformed: u64,
    pub requeued: u64,
    pub discarded: u64,
}

pub struct Worker {
    queue: QueueName,
    ctx: WorkerContext,
    probe: Box<dyn ParentProbe>,
    state: WorkerState,
    stats: WorkerStats,
    /// A finished job is still at the head of the work list
    unacked: bool,
}

impl Worker {
    pub fn new(queue: QueueName, ctx: WorkerContext, probe: Box<dyn ParentProbe>) -> Self {
        Self {
            queue,
            ctx,
            probe,
            state: WorkerState::Starting,
            stats: WorkerStats::default(),
            unacked: false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Move jobs abandoned by a previous run back onto the pending list
    pub fn recover(&mut self) -> Result<RecoveryReport> {
        self.state = WorkerState::Recovering;
        log::debug!("[{}] Crash recovery: checking for abandoned jobs", self.queue);

        let report = self.ctx.queue.recover_abandoned(self.queue)?;
        self.stats.requeued += report.requeued as u64;
        self.stats.discarded += report.discarded as u64;
        if report.requeued > 0 || report.discarded > 0 {
            log::info!(
                "[{}] Crash recovery: {} job(s) requeued, {} discarded",
                self.queue,
                report.requeued,
                report.discarded
            );
        }

        log::debug!(
            "[{}] Queue sizes: pending = {} / work = {}",
            self.queue,
            self.ctx.queue.pending_len(self.queue)?,
            self.ctx.queue.work_len(self.queue)?
        );
        self.state = WorkerState::Idle;
        Ok(report)
    }

    /// Wait up to the poll timeout for one job and run it.
    /// Returns true if an entry was taken off the pending list.
    pub fn poll_once(&mut self) -> Result<bool> {
        self.state = WorkerState::Idle;
        // Never dequeue on top of an entry that was not acknowledged
        if self.unacked {
            self.acknowledge()?;
        }
        let timeout = self.ctx.settings.poll_timeout;

        match self.ctx.queue.dequeue_blocking(self.queue, timeout)? {
            Dequeued::Empty => Ok(false),
            Dequeued::Malformed { raw, error } => {
                log::error!("[{}] Bad queue entry, job discarded ({}): {}", self.queue, error, raw);
                self.stats.malformed += 1;
                Ok(true)
            }
            Dequeued::Job(job) => {
                log::info!("[{}] Discovered job {} (file {})", self.queue, job.id, job.fid);
                self.state = WorkerState::Processing;

                let outcome = runner::run_job(&self.ctx, self.queue, &job);
                self.stats.processed += 1;
                match outcome {
                    JobOutcome::Success => self.stats.succeeded += 1,
                    JobOutcome::Warning(_) => self.stats.warnings += 1,
                    JobOutcome::Failed { .. } => self.stats.failed += 1,
                }

                self.state = WorkerState::Idle;
                self.unacked = true;
                self.acknowledge()?;
                Ok(true)
            }
        }
    }

    fn acknowledge(&mut self) -> Result<()> {
        match self.ctx.queue.acknowledge(self.queue) {
            Ok(true) => {}
            Ok(false) => log::warn!("[{}] Work list was empty when acknowledging", self.queue),
            Err(e) => {
                log::error!(
                    "[{}] Acknowledge failed, retrying before the next dequeue (work = {}): {}",
                    self.queue,
                    self.ctx.queue.work_len(self.queue).map_or_else(|_| "?".to_string(), |n| n.to_string()),
                    e
                );
                return Err(e);
            }
        }
        self.unacked = false;
        Ok(())
    }

    /// Recover, then process jobs until the parent goes away
    pub fn run(mut self) -> Result<WorkerStats> {
        self.recover()?;
        log::info!("[{}] Waiting for jobs", self.queue);

        loop {
            match self.poll_once() {
                Ok(true) => log::debug!("[{}] Waiting for jobs", self.queue),
                Ok(false) => {}
                Err(e) => {
                    log::error!("[{}] Queue store error: {}", self.queue, e);
                    std::thread::sleep(Duration::from_secs(1));
                }
            }

            if !self.probe.is_alive() {
                log::warn!("[{}] Master has terminated", self.queue);
                self.state = WorkerState::Terminating;
                break;
            }
        }

        log::info!("[{}] Queue runner terminating ({:?})", self.queue, self.stats);
        Ok(self.stats)
    }
}

/// Entry point of a worker process started by the supervisor
pub fn run_worker_process(config: &Config, queue: QueueName, parent_pid: u32) -> Result<WorkerStats> {
    log::info!("[{}] Queue runner started, pid = {}, ppid = {}", queue, std::process::id(), parent_pid);

    let conn = db::open_shared(&crate::config::expand_tilde(&config.database.path))?;
    let ctx = WorkerContext::from_config(config, conn);
    Worker::new(queue, ctx, Box::new(PidProbe::new(parent_pid))).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_probe_self_and_bogus() {
        assert!(PidProbe::new(std::process::id()).is_alive());
        assert!(!PidProbe::new(0).is_alive());
        assert!(!PidProbe::new(u32::MAX).is_alive());
        assert!(!PidProbe::new(i32::MAX as u32 + 1).is_alive());
    }

    #[test]
    fn test_flag_probe() {
        let flag = Arc::new(AtomicBool::new(true));
        let probe = FlagProbe(flag.clone());
        assert!(probe.is_alive());
        flag.store(false, Ordering::SeqCst);
        assert!(!probe.is_alive());
    }
}
