// XBake Constants
// Defaults for every config key live here; config.rs only wires them up.

// Queue keys
pub const DEFAULT_KEY_PREFIX: &str = "xbake";
pub const PENDING_LIST_PREFIX: &str = "queue_";
pub const WORK_LIST_PREFIX: &str = "work_";

// Polling
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 5;
pub const SQLITE_POLL_INTERVAL_MS: u64 = 200;
pub const SQLITE_BUSY_TIMEOUT_MS: u64 = 5000;

// Database
pub const DB_FILENAME: &str = "xbake.db";
pub const FILES_COLLECTION: &str = "files";
pub const SERIES_COLLECTION: &str = "series";
pub const EPISODES_COLLECTION: &str = "episodes";
pub const VIDEOS_COLLECTION: &str = "videos";

// Host selection
pub const DEFAULT_HOST_METRIC: i64 = 100;

// Encoding defaults
pub const DEFAULT_AUDIO_BITRATE: u32 = 128;
pub const DEFAULT_CRF: u32 = 20;
pub const DEFAULT_X264_PRESET: &str = "medium";
pub const DEFAULT_SCALE_ALLOWANCE: u32 = 10;
pub const OUTPUT_EXTENSION: &str = "mp4";

// Screenshot offset: third chapter marker + 5s, else a fixed fallback
pub const VSCAP_CHAPTER_INDEX: usize = 2;
pub const VSCAP_CHAPTER_PAD_SECS: u64 = 5;
pub const VSCAP_FALLBACK_OFFSET_SECS: u64 = 440;
pub const VSCAP_THUMB_HEIGHTS: [u32; 2] = [480, 240];

// Hashing
pub const HASH_CHUNK_SIZE: usize = 1_048_576; // 1MB

// Handler result codes
pub const RC_OK: i32 = 0;
pub const RC_WARNING: i32 = 1;
pub const RC_XFER_FAILED: i32 = 101;
pub const RC_XFER_LOOKUP_FAILED: i32 = 102;
pub const RC_XCODE_FAILED: i32 = 121;
pub const RC_XCODE_SETUP_FAILED: i32 = 122;

// Process naming
pub const WORKER_TITLE_PREFIX: &str = "queue-runner";

// Config search order (first match wins)
pub const RC_FILES: [&str; 3] = ["./xbake.toml", "~/.xbake/xbake.toml", "/etc/xbake.toml"];
pub const DEFAULT_PIDFILE: &str = "xbake.pid";
