// External tool resolver for ffmpeg and scp
//
// Resolution order:
// 1) Environment variable override (XBAKE_FFMPEG_PATH, XBAKE_SCP_PATH)
// 2) Sidecar next to the executable, or in its bin/ subdirectory
// 3) PATH fallback

use std::env;
use std::path::PathBuf;

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
        log::warn!("{} points at missing file {}, ignoring", env_key, v);
    }

    if let Some(dir) = exe_dir() {
        for candidate in [dir.join(default_name), dir.join("bin").join(default_name)] {
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    PathBuf::from(default_name)
}

/// Get path to ffmpeg binary
pub fn ffmpeg_path() -> PathBuf {
    resolve_tool("XBAKE_FFMPEG_PATH", "ffmpeg")
}

/// Get path to scp binary
pub fn scp_path() -> PathBuf {
    resolve_tool("XBAKE_SCP_PATH", "scp")
}

/// Check if a tool can be run from its resolved path
pub fn is_tool_available(tool: &str) -> bool {
    let (path, probe_arg) = match tool {
        "ffmpeg" => (ffmpeg_path(), "-version"),
        // scp has no version flag; usage output on stderr still proves it runs
        "scp" => (scp_path(), "-h"),
        _ => return false,
    };

    if path.is_file() {
        return true;
    }

    std::process::Command::new(&path)
        .arg(probe_arg)
        .output()
        .map(|o| o.status.success() || tool == "scp")
        .unwrap_or(false)
}
