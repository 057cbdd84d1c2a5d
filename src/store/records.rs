// Typed views over `files` documents
//
// Only the fields the queue layer reads are modelled; everything else in the
// document is left alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::MetadataStore;
use crate::constants::FILES_COLLECTION;
use crate::error::{Result, XBakeError};

#[derive(Debug, Clone, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub checksum: Checksum,
    /// Replica-location map, keyed by hostname with `.` replaced by `_`
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: BTreeMap<String, ReplicaLocation>,
    #[serde(default)]
    pub default_location: Option<String>,
    #[serde(default)]
    pub mediainfo: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Checksum {
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub blake3: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaLocation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub fpath: FilePath,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stat: FileStat,
    #[serde(default)]
    pub tstamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilePath {
    /// File name with extension
    #[serde(default)]
    pub file: String,
    /// File name without extension
    #[serde(default)]
    pub base: String,
    /// Absolute path on the owning host
    #[serde(default)]
    pub real: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileStat {
    #[serde(default)]
    pub size: u64,
}

impl FileRecord {
    pub fn load(store: &dyn MetadataStore, fid: &str) -> Result<Self> {
        let doc = store
            .find_one(FILES_COLLECTION, &serde_json::json!({ "_id": fid }))?
            .ok_or_else(|| XBakeError::FileNotFound(fid.to_string()))?;
        Ok(serde_json::from_value(doc)?)
    }

    /// The location used when no host choice is made: `default_location`
    /// if it is present in the map, else the first host by name.
    pub fn primary_location(&self) -> Option<(&str, &ReplicaLocation)> {
        if let Some(name) = self.default_location.as_deref() {
            if let Some((key, loc)) = self.location.get_key_value(name) {
                return Some((key.as_str(), loc));
            }
        }
        self.location.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    /// First video track from mediainfo
    pub fn video_track(&self) -> Option<&Value> {
        self.mediainfo.get("video")?.get(0)
    }

    /// True if mediainfo lists at least one text (subtitle) track
    pub fn has_subtitle_track(&self) -> bool {
        self.mediainfo
            .get("text")
            .and_then(Value::as_array)
            .map_or(false, |tracks| !tracks.is_empty())
    }

    /// Offset in seconds of chapter marker `index` (zero-based)
    pub fn chapter_offset(&self, index: usize) -> Option<u64> {
        let offset = self.mediainfo.get("menu")?.get(index)?.get("offset")?;
        value_as_u64(offset)
    }
}

/// Scanners send `null` for sections they could not fill
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Mediainfo numbers arrive as numbers or numeric strings
pub fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryMetadataStore;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "_id": "f1",
            "status": "new",
            "checksum": {"md5": "d41d8cd98f00b204e9800998ecf8427e", "crc32": "00000000"},
            "default_location": "sol_example_com",
            "location": {
                "mira_example_com": {
                    "fpath": {"file": "a.mkv", "base": "a", "real": "/media/a.mkv"},
                    "stat": {"size": 1024}
                },
                "sol_example_com": {
                    "fpath": {"file": "a.mkv", "base": "a", "real": "/data/a.mkv"},
                    "stat": {"size": 1024},
                    "tstamp": 1478800000
                }
            },
            "mediainfo": {
                "video": [{"width": "1920", "height": 1080}],
                "menu": [{"offset": 0}, {"offset": 90}, {"offset": "312.5"}]
            }
        })
    }

    #[test]
    fn test_load_file_record() {
        let store = MemoryMetadataStore::new();
        store.upsert(FILES_COLLECTION, "f1", &sample()).unwrap();
        let rec = FileRecord::load(&store, "f1").unwrap();
        assert_eq!(rec.id, "f1");
        assert_eq!(rec.checksum.md5.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(rec.location.len(), 2);
        assert_eq!(rec.location["mira_example_com"].stat.size, 1024);
    }

    #[test]
    fn test_missing_record() {
        let store = MemoryMetadataStore::new();
        assert!(matches!(
            FileRecord::load(&store, "nope"),
            Err(XBakeError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_primary_location_prefers_default() {
        let rec: FileRecord = serde_json::from_value(sample()).unwrap();
        assert_eq!(rec.primary_location().unwrap().0, "sol_example_com");

        let mut raw = sample();
        raw["default_location"] = json!("gone_example_com");
        let rec: FileRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(rec.primary_location().unwrap().0, "mira_example_com");
    }

    #[test]
    fn test_mediainfo_helpers() {
        let rec: FileRecord = serde_json::from_value(sample()).unwrap();
        assert_eq!(rec.video_track().unwrap()["height"], 1080);
        assert_eq!(rec.chapter_offset(2), Some(312));
        assert_eq!(rec.chapter_offset(5), None);
        assert!(!rec.has_subtitle_track());

        let mut raw = sample();
        raw["mediainfo"]["text"] = json!([{"format": "ASS"}]);
        let rec: FileRecord = serde_json::from_value(raw).unwrap();
        assert!(rec.has_subtitle_track());
    }

    #[test]
    fn test_null_sections_use_defaults() {
        let raw = json!({
            "_id": "f2",
            "checksum": null,
            "location": {"mira": {"fpath": null, "stat": null}}
        });
        let rec: FileRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(rec.checksum, Checksum::default());
        assert_eq!(rec.location["mira"].stat.size, 0);
        assert!(rec.location["mira"].fpath.file.is_empty());
    }
}
