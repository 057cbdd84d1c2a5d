// Encoding parameter resolution
//
// Pure functions over mediainfo and profile data: aspect ratio, scale target,
// screenshot offset and output path.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::ScaleTarget;
use crate::config::Profile;
use crate::constants::{
    OUTPUT_EXTENSION, VSCAP_CHAPTER_INDEX, VSCAP_CHAPTER_PAD_SECS, VSCAP_FALLBACK_OFFSET_SECS,
};
use crate::store::records::{value_as_u64, FileRecord};

/// Source aspect ratio
#[derive(Debug, Clone, PartialEq)]
pub struct Aspect {
    /// Common name ("16:9") or the rounded ratio as text
    pub label: String,
    pub ratio: f64,
    /// Ratio rounded to two decimals
    pub rounded: f64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn aspect_label(rounded: f64) -> String {
    const NAMED: [(f64, &str); 4] = [(1.78, "16:9"), (1.5, "3:2"), (1.33, "4:3"), (1.25, "5:4")];
    NAMED
        .iter()
        .find(|(r, _)| (r - rounded).abs() < 0.001)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| rounded.to_string())
}

fn parse_ratio(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.split_once(':') {
            Some((w, h)) => {
                let w: f64 = w.trim().parse().ok()?;
                let h: f64 = h.trim().parse().ok()?;
                (h != 0.0).then(|| w / h)
            }
            None => s.trim().parse().ok(),
        },
        _ => None,
    }
    .filter(|r| r.is_finite() && *r > 0.0)
}

/// Aspect ratio of a mediainfo video track: `display_aspect_ratio`, then
/// `aspect`, then width / height.
pub fn get_aspect(video: &Value) -> Option<Aspect> {
    let ratio = video
        .get("display_aspect_ratio")
        .and_then(parse_ratio)
        .or_else(|| video.get("aspect").and_then(parse_ratio))
        .or_else(|| {
            let w = value_as_u64(video.get("width")?)? as f64;
            let h = value_as_u64(video.get("height")?)? as f64;
            (h > 0.0 && w > 0.0).then(|| w / h)
        })?;

    let rounded = round2(ratio);
    Some(Aspect {
        label: aspect_label(rounded),
        ratio,
        rounded,
    })
}

fn outside(actual: u32, target: u32, allowance: u32) -> bool {
    actual < target.saturating_sub(allowance) || actual > target.saturating_add(allowance)
}

/// Scale target for `video` under `profile`, or `None` when the source is
/// already close enough. Only profiles with a height ever scale. Sources
/// with an odd dimension always scale, and both output dimensions are even.
pub fn compute_scale(video: &Value, profile: &Profile, allowance: u32) -> Option<ScaleTarget> {
    let target_height = profile.height?;

    let Some(aspect) = get_aspect(video) else {
        log::warn!("Cannot determine source aspect ratio, not scaling");
        return None;
    };

    let src_width = video.get("width").and_then(value_as_u64).unwrap_or(0) as u32;
    let src_height = video.get("height").and_then(value_as_u64).unwrap_or(0) as u32;
    let target_width = (target_height as f64 * aspect.ratio) as u32;

    let needs_scale = outside(src_height, target_height, allowance)
        || outside(src_width, target_width, allowance)
        || src_height % 2 != 0
        || src_width % 2 != 0;

    if !needs_scale {
        return None;
    }

    let width = match (profile.aspect.as_deref(), profile.width) {
        (Some(label), Some(w)) if label == aspect.label => w,
        _ => target_width,
    };

    Some(ScaleTarget {
        width: width + width % 2,
        height: target_height + target_height % 2,
    })
}

/// Screenshot offset for a transcode job. A positive explicit offset wins,
/// a negative one disables capture, otherwise the third chapter marker plus
/// a few seconds, or a fixed fallback when there are not enough chapters.
pub fn screenshot_offset(explicit: Option<i64>, record: &FileRecord) -> Option<u64> {
    match explicit {
        Some(v) if v > 0 => Some(v as u64),
        Some(v) if v < 0 => None,
        _ => Some(
            record
                .chapter_offset(VSCAP_CHAPTER_INDEX)
                .map(|o| o + VSCAP_CHAPTER_PAD_SECS)
                .unwrap_or(VSCAP_FALLBACK_OFFSET_SECS),
        ),
    }
}

/// `<outbase>/<version>/<basefile>.mp4`, or `<outbase>/<basefile>.mp4`
/// without a version
pub fn output_path(outbase: &Path, version: Option<&str>, basefile: &str) -> PathBuf {
    let filename = format!("{}.{}", basefile, OUTPUT_EXTENSION);
    match version.filter(|v| !v.is_empty()) {
        Some(v) => outbase.join(v).join(filename),
        None => outbase.join(filename),
    }
}
