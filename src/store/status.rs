// File processing status
//
// The only writer of a file's `status` / `last-error` fields. Writes are plain
// last-writer-wins `$set`s; one worker owns a file's progression at a time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::MetadataStore;
use crate::constants::FILES_COLLECTION;
use crate::error::{Result, XBakeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
    New,
    Downloading,
    QueuedXcode,
    Transcoding,
    Complete,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Downloading => "downloading",
            FileStatus::QueuedXcode => "queued-xcode",
            FileStatus::Transcoding => "transcoding",
            FileStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = XBakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(FileStatus::New),
            "downloading" => Ok(FileStatus::Downloading),
            "queued-xcode" => Ok(FileStatus::QueuedXcode),
            "transcoding" => Ok(FileStatus::Transcoding),
            "complete" => Ok(FileStatus::Complete),
            other => Err(XBakeError::Store(format!("Unknown file status: {}", other))),
        }
    }
}

#[derive(Clone)]
pub struct StatusUpdater {
    store: Arc<dyn MetadataStore>,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Set `status` (and `last-error` when given) on file `fid`.
    /// Setting the same value twice is harmless.
    pub fn update(&self, fid: &str, status: FileStatus, last_error: Option<&str>) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::String(status.as_str().to_string()));
        if let Some(err) = last_error {
            fields.insert("last-error".to_string(), Value::String(err.to_string()));
        }

        if !self.store.update_set(FILES_COLLECTION, fid, &fields)? {
            log::warn!("Status update for unknown file {} ({}) ignored", fid, status);
        } else {
            log::debug!("File {} status -> {}", fid, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryMetadataStore;
    use serde_json::json;

    #[test]
    fn test_status_strings_round_trip_through_serde() {
        let s = serde_json::to_string(&FileStatus::QueuedXcode).unwrap();
        assert_eq!(s, "\"queued-xcode\"");
        assert_eq!("queued-xcode".parse::<FileStatus>().unwrap(), FileStatus::QueuedXcode);
    }

    #[test]
    fn test_update_sets_status_and_error() {
        let store = Arc::new(MemoryMetadataStore::new());
        store.upsert(FILES_COLLECTION, "f1", &json!({"status": "new"})).unwrap();
        let updater = StatusUpdater::new(store.clone());

        updater.update("f1", FileStatus::Downloading, None).unwrap();
        assert_eq!(store.get(FILES_COLLECTION, "f1").unwrap()["status"], "downloading");

        updater.update("f1", FileStatus::New, Some("transcoding failed")).unwrap();
        let doc = store.get(FILES_COLLECTION, "f1").unwrap();
        assert_eq!(doc["status"], "new");
        assert_eq!(doc["last-error"], "transcoding failed");

        // Idempotent, and last-error survives status-only writes
        updater.update("f1", FileStatus::New, None).unwrap();
        updater.update("f1", FileStatus::New, None).unwrap();
        let doc = store.get(FILES_COLLECTION, "f1").unwrap();
        assert_eq!(doc["status"], "new");
        assert_eq!(doc["last-error"], "transcoding failed");
    }

    #[test]
    fn test_update_unknown_file_is_noop() {
        let store = Arc::new(MemoryMetadataStore::new());
        let updater = StatusUpdater::new(store.clone());
        updater.update("ghost", FileStatus::Complete, None).unwrap();
        assert_eq!(store.count(FILES_COLLECTION), 0);
    }
}
