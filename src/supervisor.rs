// Worker supervision
//
// The master runs one worker per queue name. `ProcessSupervisor` re-executes
// the current binary as `worker --queue <q> --parent-pid <pid>`; the worker
// exits on its own once the master is gone. `ThreadSupervisor` runs the same
// worker loop on threads for in-process use.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::constants::WORKER_TITLE_PREFIX;
use crate::error::{Result, XBakeError};
use crate::jobs::worker::{FlagProbe, Worker, WorkerStats};
use crate::jobs::WorkerContext;
use crate::queue::QueueName;

pub trait Supervisor {
    /// Start a worker bound to `queue`
    fn spawn(&mut self, queue: QueueName) -> Result<()>;

    /// Queues with a worker that has not exited
    fn running(&mut self) -> Vec<QueueName>;

    /// Stop every worker and wait for it
    fn shutdown(&mut self) -> Result<()>;
}

/// Visible name a worker carries (`queue-runner:<queue>`)
pub fn worker_title(queue: QueueName) -> String {
    format!("{}:{}", WORKER_TITLE_PREFIX, queue)
}

pub struct ProcessSupervisor {
    exe: PathBuf,
    config_path: Option<PathBuf>,
    verbosity: u8,
    children: Vec<(QueueName, Child)>,
}

impl ProcessSupervisor {
    pub fn new(config_path: Option<PathBuf>, verbosity: u8) -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self {
            exe,
            config_path,
            verbosity,
            children: Vec::new(),
        })
    }

    fn command(&self, queue: QueueName) -> Command {
        let mut cmd = Command::new(&self.exe);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.arg0(worker_title(queue));
        }

        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        for _ in 0..self.verbosity {
            cmd.arg("-v");
        }
        cmd.arg("worker")
            .arg("--queue")
            .arg(queue.as_str())
            .arg("--parent-pid")
            .arg(std::process::id().to_string())
            .stdin(Stdio::null());
        cmd
    }
}

impl Supervisor for ProcessSupervisor {
    fn spawn(&mut self, queue: QueueName) -> Result<()> {
        let child = self
            .command(queue)
            .spawn()
            .map_err(|e| XBakeError::Process(format!("Failed to start {} worker: {}", queue, e)))?;
        log::info!("Started queue runner {} (pid {})", worker_title(queue), child.id());
        self.children.push((queue, child));
        Ok(())
    }

    fn running(&mut self) -> Vec<QueueName> {
        let mut alive = Vec::new();
        self.children.retain_mut(|(queue, child)| match child.try_wait() {
            Ok(None) => {
                alive.push(*queue);
                true
            }
            Ok(Some(status)) => {
                log::warn!("Queue runner {} exited with {}", worker_title(*queue), status);
                false
            }
            Err(e) => {
                log::error!("Failed to poll queue runner {}: {}", worker_title(*queue), e);
                true
            }
        });
        alive
    }

    fn shutdown(&mut self) -> Result<()> {
        for (queue, mut child) in self.children.drain(..) {
            log::info!("Stopping queue runner {} (pid {})", worker_title(queue), child.id());
            if let Err(e) = child.kill() {
                log::debug!("kill {}: {}", child.id(), e);
            }
            child.wait()?;
        }
        Ok(())
    }
}

type ContextFactory = Box<dyn Fn(QueueName) -> Result<WorkerContext> + Send>;

pub struct ThreadSupervisor {
    factory: ContextFactory,
    alive: Arc<AtomicBool>,
    handles: Vec<(QueueName, JoinHandle<Result<WorkerStats>>)>,
}

impl ThreadSupervisor {
    pub fn new(factory: impl Fn(QueueName) -> Result<WorkerContext> + Send + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            alive: Arc::new(AtomicBool::new(true)),
            handles: Vec::new(),
        }
    }

    /// Stop every worker and collect its statistics
    pub fn join_all(&mut self) -> Vec<(QueueName, Result<WorkerStats>)> {
        self.alive.store(false, Ordering::SeqCst);
        self.handles
            .drain(..)
            .map(|(queue, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(XBakeError::Process(format!("{} worker panicked", queue))));
                (queue, result)
            })
            .collect()
    }
}

impl Supervisor for ThreadSupervisor {
    fn spawn(&mut self, queue: QueueName) -> Result<()> {
        let ctx = (self.factory)(queue)?;
        let probe = FlagProbe(self.alive.clone());

        let handle = std::thread::Builder::new()
            .name(worker_title(queue))
            .spawn(move || Worker::new(queue, ctx, Box::new(probe)).run())
            .map_err(|e| XBakeError::Process(format!("Failed to start {} worker: {}", queue, e)))?;

        log::info!("Started queue runner {} (thread)", worker_title(queue));
        self.handles.push((queue, handle));
        Ok(())
    }

    fn running(&mut self) -> Vec<QueueName> {
        self.handles
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(q, _)| *q)
            .collect()
    }

    fn shutdown(&mut self) -> Result<()> {
        for (queue, result) in self.join_all() {
            match result {
                Ok(stats) => log::info!("Queue runner {} stopped: {:?}", worker_title(queue), stats),
                Err(e) => log::error!("Queue runner {} failed: {}", worker_title(queue), e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_title() {
        assert_eq!(worker_title(QueueName::Transfer), "queue-runner:transfer");
        assert_eq!(worker_title(QueueName::Transcode), "queue-runner:transcode");
    }

    #[test]
    fn test_worker_command_line() {
        let sup = ProcessSupervisor {
            exe: PathBuf::from("/usr/bin/xbake"),
            config_path: Some(PathBuf::from("/etc/xbake.toml")),
            verbosity: 1,
            children: Vec::new(),
        };
        let cmd = sup.command(QueueName::Transcode);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        let pid = std::process::id().to_string();
        assert_eq!(
            args,
            vec!["--config", "/etc/xbake.toml", "-v", "worker", "--queue", "transcode", "--parent-pid", pid.as_str()]
        );
    }
}
