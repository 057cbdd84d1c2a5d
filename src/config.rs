// Configuration loading
//
// A single TOML rc file, searched in order: --config path, ./xbake.toml,
// ~/.xbake/xbake.toml, /etc/xbake.toml. Only the first match is parsed.
// Every key has a default so an empty file (or no file) is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::*;
use crate::error::{Result, XBakeError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub database: DatabaseConfig,
    pub srv: SrvConfig,
    pub xcode: XcodeConfig,
    pub vscap: VscapConfig,
    /// Host metric table. Values are kept raw so bad lines can be reported
    /// and skipped instead of failing the whole file.
    pub hosts: BTreeMap<String, toml::Value>,
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub loglevel: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding both the queue lists and the metadata documents.
    pub path: PathBuf,
    /// Prefix for list keys (`<prefix>:queue_<name>`).
    pub prefix: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DB_FILENAME),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SrvConfig {
    pub pidfile: PathBuf,
    pub xfer_path: PathBuf,
    pub xfer_hostonly: bool,
    pub xcode_outpath: PathBuf,
    pub xcode_default_profile: Option<String>,
    pub xcode_scale_allowance: u32,
    pub xcode_show_ffmpeg: bool,
    pub poll_timeout_secs: u64,
}

impl Default for SrvConfig {
    fn default() -> Self {
        Self {
            pidfile: PathBuf::from(DEFAULT_PIDFILE),
            xfer_path: PathBuf::from("."),
            xfer_hostonly: false,
            xcode_outpath: PathBuf::from("."),
            xcode_default_profile: None,
            xcode_scale_allowance: DEFAULT_SCALE_ALLOWANCE,
            xcode_show_ffmpeg: false,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XcodeConfig {
    pub crf: u32,
    pub abr: u32,
    pub libx264_preset: String,
}

impl Default for XcodeConfig {
    fn default() -> Self {
        Self {
            crf: DEFAULT_CRF,
            abr: DEFAULT_AUDIO_BITRATE,
            libx264_preset: DEFAULT_X264_PRESET.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VscapConfig {
    pub basedir: PathBuf,
    pub nothumbs: bool,
}

impl Default for VscapConfig {
    fn default() -> Self {
        Self {
            basedir: PathBuf::from("."),
            nothumbs: false,
        }
    }
}

/// Encoding profile. Unset fields fall back to the global `[xcode]` values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub crf: Option<u32>,
    pub abr: Option<u32>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    /// Aspect label such as "16:9"; paired with `width` to pin the output width.
    pub aspect: Option<String>,
}

impl Config {
    /// Parse config from a TOML string
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Profiles keyed by lowercase name
    pub fn profile_table(&self) -> BTreeMap<String, Profile> {
        self.profiles
            .iter()
            .map(|(name, p)| (name.to_lowercase(), p.clone()))
            .collect()
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.core.loglevel.to_lowercase().as_str() {
            "error" => log::LevelFilter::Error,
            "warn" | "warning" => log::LevelFilter::Warn,
            "debug" => log::LevelFilter::Debug,
            "trace" | "debug2" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Info,
        }
    }
}

/// Build the list of rc files that exist, in priority order
pub fn rc_candidates(explicit: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    if let Some(path) = explicit {
        let path = expand_tilde(path);
        if !path.exists() {
            return Err(XBakeError::Config(format!(
                "Specified config file does not exist: {}",
                path.display()
            )));
        }
        found.push(path);
    }

    for candidate in RC_FILES {
        let path = expand_tilde(Path::new(candidate));
        if path.is_file() {
            found.push(path);
        }
    }

    Ok(found)
}

/// Load the first rc file found. Returns the path used (if any) and the config.
/// Runs before logging is set up; report the result with [`source_description`].
pub fn load(explicit: Option<&Path>) -> Result<(Option<PathBuf>, Config)> {
    let candidates = rc_candidates(explicit)?;
    let Some(path) = candidates.into_iter().next() else {
        return Ok((None, Config::default()));
    };

    let raw = std::fs::read_to_string(&path)?;
    let config = Config::from_toml_str(&raw)
        .map_err(|e| XBakeError::Config(format!("{}: {}", path.display(), e)))?;
    let path = path.canonicalize().unwrap_or(path);
    Ok((Some(path), config))
}

/// Where the loaded config came from, for the startup log
pub fn source_description(path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("config file {}", path.display()),
        None => "built-in defaults (no rc file found)".to_string(),
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
