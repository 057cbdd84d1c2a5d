// Job system module
//
// One handler per queue name. A worker builds a `WorkerContext` once at start
// and passes it to every job; handlers report a `JobOutcome` and never
// propagate errors past the runner.

pub mod runner;
pub mod transcode;
pub mod transfer;
pub mod worker;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, Config, Profile};
use crate::constants::{RC_OK, RC_WARNING};
use crate::db::SharedConnection;
use crate::metrics::HostMetrics;
use crate::queue::envelope::Envelope;
use crate::queue::sqlite::SqliteListStore;
use crate::queue::{JobQueue, QueueName};
use crate::store::sqlite::SqliteMetadataStore;
use crate::store::{MetadataStore, StatusUpdater};
use crate::transfer::{RemoteCopier, ScpCopier};
use crate::xcode::{FfmpegTranscoder, Transcoder};

/// Result of one handler run. Every outcome is acknowledged; none is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Warning(String),
    Failed { code: i32, reason: String },
}

impl JobOutcome {
    pub fn failed(code: i32, reason: impl Into<String>) -> Self {
        JobOutcome::Failed {
            code,
            reason: reason.into(),
        }
    }

    /// Numeric result code: 0 success, 1 warning, anything else failure
    pub fn code(&self) -> i32 {
        match self {
            JobOutcome::Success => RC_OK,
            JobOutcome::Warning(_) => RC_WARNING,
            JobOutcome::Failed { code, .. } => *code,
        }
    }
}

pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &WorkerContext, job: &Envelope) -> JobOutcome;
}

/// Handler bound to a queue name
pub fn handler_for(queue: QueueName) -> &'static dyn Handler {
    match queue {
        QueueName::Transfer => &transfer::TransferHandler,
        QueueName::Transcode => &transcode::TranscodeHandler,
    }
}

/// Settings the handlers read, resolved from config once per worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub xfer_path: PathBuf,
    pub xfer_hostonly: bool,
    pub xcode_outpath: PathBuf,
    pub default_profile: Option<String>,
    pub scale_allowance: u32,
    pub show_ffmpeg: bool,
    pub crf: u32,
    pub abr: u32,
    pub preset: String,
    pub poll_timeout: Duration,
}

impl WorkerSettings {
    /// Settings at the effective log level of this process, which `-v` or
    /// `RUST_LOG` may have raised above the configured one
    pub fn from_config(config: &Config) -> Self {
        Self::at_log_level(config, config.log_level().max(log::max_level()))
    }

    pub fn at_log_level(config: &Config, level: log::LevelFilter) -> Self {
        Self {
            xfer_path: config::expand_tilde(&config.srv.xfer_path),
            xfer_hostonly: config.srv.xfer_hostonly,
            xcode_outpath: config::expand_tilde(&config.srv.xcode_outpath),
            default_profile: config.srv.xcode_default_profile.clone(),
            scale_allowance: config.srv.xcode_scale_allowance,
            show_ffmpeg: config.srv.xcode_show_ffmpeg || level >= log::LevelFilter::Debug,
            crf: config.xcode.crf,
            abr: config.xcode.abr,
            preset: config.xcode.libx264_preset.clone(),
            poll_timeout: Duration::from_secs(config.srv.poll_timeout_secs.max(1)),
        }
    }
}

/// Everything a handler needs, built once when a worker starts
pub struct WorkerContext {
    pub queue: JobQueue,
    pub store: Arc<dyn MetadataStore>,
    pub status: StatusUpdater,
    pub metrics: HostMetrics,
    pub profiles: BTreeMap<String, Profile>,
    pub settings: WorkerSettings,
    pub copier: Arc<dyn RemoteCopier>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl WorkerContext {
    pub fn new(
        config: &Config,
        queue: JobQueue,
        store: Arc<dyn MetadataStore>,
        copier: Arc<dyn RemoteCopier>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let metrics = HostMetrics::from_config(&config.hosts);
        let profiles = config.profile_table();
        log::debug!("Loaded {} host metrics, {} encoding profiles", metrics.len(), profiles.len());

        Self {
            queue,
            status: StatusUpdater::new(store.clone()),
            store,
            metrics,
            profiles,
            settings: WorkerSettings::from_config(config),
            copier,
            transcoder,
        }
    }

    /// Production context: SQLite stores on `conn`, scp and ffmpeg
    pub fn from_config(config: &Config, conn: SharedConnection) -> Self {
        let lists = Arc::new(SqliteListStore::new(conn.clone()));
        let queue = JobQueue::new(lists, config.database.prefix.clone());
        let store = Arc::new(SqliteMetadataStore::new(conn));

        Self::new(
            config,
            queue,
            store,
            Arc::new(ScpCopier),
            Arc::new(FfmpegTranscoder::new(&config.vscap)),
        )
    }
}
