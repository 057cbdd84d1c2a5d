// Transcode stage: resolve encoding parameters, run the transcoder, then judge
// the result by whether the output file exists.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use super::{Handler, JobOutcome, WorkerContext};
use crate::config::Profile;
use crate::constants::{RC_XCODE_FAILED, RC_XCODE_SETUP_FAILED, VIDEOS_COLLECTION};
use crate::error::{Result, XBakeError};
use crate::queue::Envelope;
use crate::store::{FileRecord, FileStatus};
use crate::xcode::{plan, TranscodeReport, TranscodeRequest};

pub struct TranscodeHandler;

impl Handler for TranscodeHandler {
    fn handle(&self, ctx: &WorkerContext, job: &Envelope) -> JobOutcome {
        match run(ctx, job) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("[transcode] Job {} failed: {}", job.id, e);
                if let Err(se) = ctx.status.update(&job.fid, FileStatus::New, Some(e.to_string().as_str())) {
                    log::error!("[transcode] Failed to reset status of {}: {}", job.fid, se);
                }
                JobOutcome::failed(RC_XCODE_SETUP_FAILED, e.to_string())
            }
        }
    }
}

/// Build the transcoder request for `job`
pub fn build_request(ctx: &WorkerContext, job: &Envelope, record: &FileRecord) -> Result<TranscodeRequest> {
    let profile_name = job
        .opt_str("profile")
        .map(str::to_string)
        .or_else(|| ctx.settings.default_profile.clone())
        .unwrap_or_default()
        .to_lowercase();
    let version = job
        .opt_str("version")
        .map(str::to_string)
        .or_else(|| (!profile_name.is_empty()).then(|| profile_name.clone()));

    let profile = match ctx.profiles.get(&profile_name) {
        Some(p) => p.clone(),
        None => {
            if !profile_name.is_empty() {
                log::warn!("[transcode] Unknown profile '{}', using defaults", profile_name);
            }
            Profile::default()
        }
    };

    let input = job
        .opt_str("realpath")
        .map(PathBuf::from)
        .ok_or_else(|| XBakeError::Transcode(format!("Job {} has no realpath", job.id)))?;
    let basefile = match job.opt_str("basefile") {
        Some(b) if !b.is_empty() => b.to_string(),
        _ => input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| XBakeError::Transcode(format!("Job {} has no basefile", job.id)))?,
    };
    let output = plan::output_path(&ctx.settings.xcode_outpath, version.as_deref(), &basefile);

    let scale = match record.video_track() {
        Some(video) => plan::compute_scale(video, &profile, ctx.settings.scale_allowance),
        None => None,
    };

    let bake_subs = if job.opt_flag("no_subs") {
        false
    } else if !record.has_subtitle_track() {
        log::info!("[transcode] Source has no subtitle track, not burning in subs");
        false
    } else {
        true
    };

    Ok(TranscodeRequest {
        input,
        output,
        file_id: job.fid.clone(),
        location: job
            .opt_str("location")
            .map(str::to_string)
            .or_else(|| record.primary_location().map(|(k, _)| k.to_string()))
            .unwrap_or_default(),
        version,
        profile: profile_name,
        crf: profile.crf.unwrap_or(ctx.settings.crf),
        audio_bitrate: profile.abr.unwrap_or(ctx.settings.abr),
        scale,
        bake_subs,
        screenshot_offset: plan::screenshot_offset(job.opt_i64("vscap"), record),
        fansub: job.opt_str("fansub").filter(|s| !s.is_empty()).map(str::to_string),
        preset: ctx.settings.preset.clone(),
        show_output: ctx.settings.show_ffmpeg,
    })
}

fn run(ctx: &WorkerContext, job: &Envelope) -> Result<JobOutcome> {
    let record = FileRecord::load(ctx.store.as_ref(), &job.fid)?;
    let request = build_request(ctx, job, &record)?;

    log::info!("[transcode] Job {} / file {}", job.id, job.fid);
    log::info!("[transcode] Input file: {}", request.input.display());
    log::info!("[transcode] Output file: {}", request.output.display());
    log::info!(
        "[transcode] Profile: {} / version: {}",
        request.profile,
        request.version.as_deref().unwrap_or("-")
    );
    log::debug!("[transcode] Request: {:?}", request);

    // A stale output from an earlier run must not count as success
    if request.output.exists() {
        log::debug!("[transcode] Removing previous output {}", request.output.display());
        std::fs::remove_file(&request.output)?;
    }

    ctx.status.update(&job.fid, FileStatus::Transcoding, None)?;
    let report = match ctx.transcoder.transcode(&request) {
        Ok(report) => Some(report),
        Err(e) => {
            log::error!("[transcode] {}", e);
            None
        }
    };

    if !request.output.is_file() {
        log::error!("[transcode] Output file not found. Transcoding failed.");
        ctx.status.update(&job.fid, FileStatus::New, Some("transcoding failed"))?;
        return Ok(JobOutcome::failed(RC_XCODE_FAILED, "transcoding failed"));
    }

    let outcome = match report {
        Some(report) => match record_version(ctx, &record, &request, &report) {
            Ok(()) => JobOutcome::Success,
            Err(e) => {
                log::warn!("[transcode] Failed to record version metadata: {}", e);
                JobOutcome::Warning(format!("version metadata not recorded: {}", e))
            }
        },
        None => JobOutcome::Warning("transcoder reported an error but produced output".into()),
    };

    log::info!("[transcode] Transcoding completed: {}", request.output.display());
    ctx.status.update(&job.fid, FileStatus::Complete, None)?;
    Ok(outcome)
}

/// Write `versions.<version>` (and screenshot info) onto the `videos`
/// document, creating it from the file record on first use
fn record_version(
    ctx: &WorkerContext,
    record: &FileRecord,
    request: &TranscodeRequest,
    report: &TranscodeReport,
) -> Result<()> {
    let Some(version) = request.version.as_deref() else {
        return Ok(());
    };

    let outfile = request
        .output
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let version_doc = json!({
        "encoder": {"encode": report.args.join(" ")},
        "profile": request.profile,
        "location": {
            "uri": format!("{}/{}", version, outfile),
            "realpath": path_string(&request.output),
        },
    });

    let mut fields = Map::new();
    fields.insert(format!("versions.{}", version), version_doc);
    if let Some(shot) = &report.screenshot {
        fields.insert("vscap".into(), serde_json::to_value(shot)?);
    }

    if ctx.store.update_set(VIDEOS_COLLECTION, &record.id, &fields)? {
        return Ok(());
    }

    let source = record.location.get(&request.location);
    let mut doc = json!({
        "source": {
            "filename": source.map(|l| l.fpath.file.clone()),
            "location": {
                "hostname": request.location,
                "path": source.map(|l| l.fpath.real.clone()),
            },
            "mediainfo": record.mediainfo,
            "checksum": {"md5": record.checksum.md5, "blake3": record.checksum.blake3},
            "stat": {"size": source.map(|l| l.stat.size)},
        },
        "subs": {"enabled": request.bake_subs, "fansub": request.fansub},
        "versions": {},
    });
    crate::store::apply_set(&mut doc, &fields);
    ctx.store.upsert(VIDEOS_COLLECTION, &record.id, &doc)
}

fn path_string(p: &Path) -> Value {
    Value::String(p.to_string_lossy().into_owned())
}
