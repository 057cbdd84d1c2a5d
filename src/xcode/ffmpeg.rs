// FFmpeg transcoder
//
// x264 + AAC into an MP4 with faststart, optional scale and burned-in
// subtitles. Screenshot capture runs after the encode and never fails the job.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{Screenshot, TranscodeReport, TranscodeRequest, Transcoder};
use crate::config::VscapConfig;
use crate::constants::VSCAP_THUMB_HEIGHTS;
use crate::error::{Result, XBakeError};
use crate::tools;

pub struct FfmpegTranscoder {
    vscap_basedir: PathBuf,
    nothumbs: bool,
}

impl FfmpegTranscoder {
    pub fn new(vscap: &VscapConfig) -> Self {
        Self {
            vscap_basedir: vscap.basedir.clone(),
            nothumbs: vscap.nothumbs,
        }
    }

    fn run(&self, args: &[String], show_output: bool) -> Result<()> {
        let mut cmd = Command::new(tools::ffmpeg_path());
        if !show_output {
            cmd.args(["-hide_banner", "-loglevel", "error"]);
        }
        cmd.args(args).stdin(Stdio::null());

        if show_output {
            let status = cmd
                .status()
                .map_err(|e| XBakeError::Transcode(format!("Failed to run ffmpeg: {}", e)))?;
            if !status.success() {
                return Err(XBakeError::Transcode(format!("ffmpeg exited with {}", status)));
            }
            return Ok(());
        }

        let output = cmd
            .output()
            .map_err(|e| XBakeError::Transcode(format!("Failed to run ffmpeg: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(XBakeError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn capture(&self, input: &Path, offset: u64) -> Result<Screenshot> {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshot".to_string());
        let filename = format!("{}.png", stem);

        let full_dir = self.vscap_basedir.join("full");
        std::fs::create_dir_all(&full_dir)?;
        let full = full_dir.join(&filename);

        log::info!("Capturing frame at offset {}s -> {}", offset, full.display());
        self.run(&screenshot_args(input, offset, &full), false)?;

        let mut thumbs = Vec::new();
        if !self.nothumbs {
            for height in VSCAP_THUMB_HEIGHTS {
                let dir = self.vscap_basedir.join(height.to_string());
                std::fs::create_dir_all(&dir)?;
                let thumb = dir.join(&filename);
                self.run(&thumbnail_args(&full, &thumb, height), false)?;
                thumbs.push((height, thumb));
            }
        } else {
            log::debug!("Skipping scaled screenshot copies");
        }

        Ok(Screenshot { offset, full, thumbs })
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeReport> {
        if !request.input.is_file() {
            return Err(XBakeError::Transcode(format!(
                "Input {} is not a regular file",
                request.input.display()
            )));
        }
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let args = build_args(request);
        log::debug!("ffmpeg {}", args.join(" "));
        self.run(&args, request.show_output)?;

        let screenshot = match request.screenshot_offset {
            Some(offset) => match self.capture(&request.input, offset) {
                Ok(shot) => Some(shot),
                Err(e) => {
                    log::error!("Screenshot capture failed: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(TranscodeReport { args, screenshot })
    }
}

/// Escape a path for use inside an ffmpeg filtergraph argument
fn filter_escape(path: &Path) -> String {
    let mut out = String::new();
    for c in path.to_string_lossy().chars() {
        if matches!(c, '\\' | ':' | '\'' | ',' | '[' | ']' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Full argument list for one encode, excluding the binary itself
pub fn build_args(request: &TranscodeRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), request.input.to_string_lossy().into_owned()];

    let mut filters = Vec::new();
    if let Some(scale) = request.scale {
        filters.push(format!("scale={}", scale));
    }
    if request.bake_subs {
        filters.push(format!("subtitles={}", filter_escape(&request.input)));
    }
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        request.crf.to_string(),
        "-preset:v".to_string(),
        request.preset.clone(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", request.audio_bitrate),
        "-ac".to_string(),
        "2".to_string(),
    ]);

    if let Some(fansub) = request.fansub.as_deref() {
        args.push("-metadata".into());
        args.push(format!("comment=Subtitles by {}", fansub));
    }

    args.push("-movflags".into());
    args.push("+faststart".into());
    args.push(request.output.to_string_lossy().into_owned());
    args
}

fn screenshot_args(input: &Path, offset: u64, out: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-ss".into(),
        offset.to_string(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-frames:v".into(),
        "1".into(),
        out.to_string_lossy().into_owned(),
    ]
}

fn thumbnail_args(full: &Path, out: &Path, height: u32) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        full.to_string_lossy().into_owned(),
        "-vf".into(),
        format!("scale=-2:{}", height),
        out.to_string_lossy().into_owned(),
    ]
}
