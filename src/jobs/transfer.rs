// Transfer stage: stage a replica locally, then queue it for transcoding

use std::path::Path;

use serde_json::{Map, Value};

use super::{Handler, JobOutcome, WorkerContext};
use crate::constants::{RC_XFER_FAILED, RC_XFER_LOOKUP_FAILED};
use crate::error::{Result, XBakeError};
use crate::hash;
use crate::queue::{Envelope, QueueName};
use crate::store::{FileRecord, FileStatus, ReplicaLocation};
use crate::transfer::connect_host;

pub struct TransferHandler;

impl Handler for TransferHandler {
    fn handle(&self, ctx: &WorkerContext, job: &Envelope) -> JobOutcome {
        match run(ctx, job) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("[transfer] Job {} failed: {}", job.id, e);
                let code = match e {
                    XBakeError::FileNotFound(_) => RC_XFER_LOOKUP_FAILED,
                    _ => RC_XFER_FAILED,
                };
                if let Err(se) = ctx.status.update(&job.fid, FileStatus::New, Some(e.to_string().as_str())) {
                    log::error!("[transfer] Failed to reset status of {}: {}", job.fid, se);
                }
                JobOutcome::failed(code, e.to_string())
            }
        }
    }
}

fn run(ctx: &WorkerContext, job: &Envelope) -> Result<JobOutcome> {
    let record = FileRecord::load(ctx.store.as_ref(), &job.fid)?;
    let Some((first_key, first)) = record.primary_location() else {
        return Err(XBakeError::Transfer(format!("File {} has no replica locations", job.fid)));
    };

    log::info!(
        "[transfer] Job {} / file {}: {} ({} location(s))",
        job.id,
        job.fid,
        first.fpath.file,
        record.location.len()
    );

    let xfer_path = &ctx.settings.xfer_path;
    let existing = xfer_path.join(&first.fpath.file);
    if already_staged(&existing, &record) {
        log::warn!(
            "[transfer] {} already exists in staging path with matching checksum",
            existing.display()
        );
        let opts = next_opts(job, first_key, first, &existing);
        return forward(ctx, job, opts);
    }

    let Some((best_key, metric)) = ctx.metrics.select_best(&record.location) else {
        return Err(XBakeError::Transfer(format!("File {} has no replica locations", job.fid)));
    };
    let best = &record.location[best_key];
    log::info!("[transfer] Chose location {}, metric {}", best_key, metric);

    let host = connect_host(best_key, ctx.settings.xfer_hostonly);
    let staged = xfer_path.join(&best.fpath.file);

    std::fs::create_dir_all(xfer_path)?;
    log::info!(
        "[transfer] Starting transfer: {}:{} -> {} ({} bytes)",
        host,
        best.fpath.real,
        staged.display(),
        best.stat.size
    );
    ctx.status.update(&job.fid, FileStatus::Downloading, None)?;

    // A copy error is not final; the size check below decides
    if let Err(e) = ctx.copier.copy(&host, &best.fpath.real, xfer_path) {
        log::error!("[transfer] {}", e);
    }

    if !size_matches(&staged, best.stat.size) {
        log::error!("[transfer] File transfer failed for {}", job.fid);
        ctx.status.update(&job.fid, FileStatus::New, Some("transfer failed"))?;
        return Ok(JobOutcome::failed(RC_XFER_FAILED, "transfer failed"));
    }

    log::info!("[transfer] File transfer successful: {}", staged.display());
    let opts = next_opts(job, best_key, best, &staged);
    forward(ctx, job, opts)
}

fn already_staged(path: &Path, record: &FileRecord) -> bool {
    match hash::file_matches_checksum(path, &record.checksum) {
        Ok(matched) => matched,
        Err(e) => {
            log::warn!("[transfer] Could not checksum {}: {}", path.display(), e);
            false
        }
    }
}

fn size_matches(path: &Path, expected: u64) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if meta.len() != expected {
        log::error!(
            "[transfer] {} - size mismatch: expected {} bytes, got {}",
            path.display(),
            expected,
            meta.len()
        );
        return false;
    }
    true
}

/// Job options for the transcode stage
fn next_opts(job: &Envelope, key: &str, loc: &ReplicaLocation, staged: &Path) -> Map<String, Value> {
    let base = if loc.fpath.base.is_empty() {
        Path::new(&loc.fpath.file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        loc.fpath.base.clone()
    };

    let mut opts = job.opts.clone();
    opts.insert("infile".into(), Value::String(loc.fpath.file.clone()));
    opts.insert("basefile".into(), Value::String(base));
    opts.insert("location".into(), Value::String(key.to_string()));
    opts.insert("realpath".into(), Value::String(staged.to_string_lossy().into_owned()));
    opts
}

/// Mark the file queued for transcoding and hand the job to the next stage
fn forward(ctx: &WorkerContext, job: &Envelope, opts: Map<String, Value>) -> Result<JobOutcome> {
    ctx.status.update(&job.fid, FileStatus::QueuedXcode, None)?;
    ctx.queue.enqueue(QueueName::Transcode, &job.follow_on(opts))?;
    Ok(JobOutcome::Success)
}
