// Transcoding
//
// The queue layer resolves every encoding parameter up front (see `plan`) and
// hands a `TranscodeRequest` to a `Transcoder`. Success is judged afterwards
// by the presence of the output file, not by the transcoder's return value.

pub mod ffmpeg;
pub mod plan;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;

pub use ffmpeg::FfmpegTranscoder;

/// Output frame size passed to the scaler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleTarget {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for ScaleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub file_id: String,
    /// Replica-location key the input was staged from
    pub location: String,
    pub version: Option<String>,
    pub profile: String,
    pub crf: u32,
    /// Audio bitrate in kbps
    pub audio_bitrate: u32,
    pub scale: Option<ScaleTarget>,
    pub bake_subs: bool,
    /// Seconds into the input to grab a screenshot; `None` disables capture
    pub screenshot_offset: Option<u64>,
    pub fansub: Option<String>,
    pub preset: String,
    /// Let the encoder write to the terminal instead of capturing it
    pub show_output: bool,
}

/// Screenshot files written for one input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Screenshot {
    pub offset: u64,
    pub full: PathBuf,
    /// Scaled copies keyed by height
    pub thumbs: Vec<(u32, PathBuf)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscodeReport {
    /// Encoder argument list, recorded in the version metadata
    pub args: Vec<String>,
    pub screenshot: Option<Screenshot>,
}

pub trait Transcoder: Send + Sync {
    fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeReport>;
}
