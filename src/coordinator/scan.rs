// Scan result ingestion
//
// A scanner run reports series, episodes and files seen on one host. Series
// and episodes are stored when newer than what is on record; every new or
// changed file gains a location entry for the host and a transfer job.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::constants::{EPISODES_COLLECTION, FILES_COLLECTION, SERIES_COLLECTION};
use crate::error::{Result, XBakeError};
use crate::metrics::normalize_host;
use crate::queue::{Envelope, JobQueue, QueueName};
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub new: u64,
    pub updated: u64,
    /// Present but unchanged
    pub nc: u64,
    pub total: u64,
    pub upserted: u64,
    pub errors: u64,
    /// Transfer jobs enqueued (files only)
    pub queued: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub series: CollectionStats,
    pub episodes: CollectionStats,
    pub files: CollectionStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitResult {
    pub status: SubmitStatus,
    pub http_status: u16,
    pub message: String,
    pub stats: ScanStats,
}

impl SubmitResult {
    fn error(http_status: u16, message: impl Into<String>, stats: ScanStats) -> Self {
        Self {
            status: SubmitStatus::Error,
            http_status,
            message: message.into(),
            stats,
        }
    }

    /// Status line for HTTP-facing callers
    pub fn http_line(&self) -> String {
        let reason = match self.http_status {
            201 => "Content Added",
            216 => "Nothing Added",
            400 => "Bad Request",
            _ => "Internal Server Error",
        };
        format!("{} {}", self.http_status, reason)
    }
}

/// Persist a scan payload and enqueue transfer jobs for new or changed files.
/// Never fails: problems are reported through the result.
pub fn submit_scan_result(queue: &JobQueue, store: &dyn MetadataStore, payload: &Value) -> SubmitResult {
    let mut stats = ScanStats::default();

    let hostname = match validate(payload) {
        Ok(h) => h,
        Err(e) => {
            log::warn!("Rejected scan payload: {}", e);
            return SubmitResult::error(400, e.to_string(), stats);
        }
    };
    log::info!("Received scan result from {}", hostname);

    if let Err(e) = ingest(queue, store, payload, &hostname, &mut stats) {
        log::error!("Scan ingestion aborted: {}", e);
        return SubmitResult::error(500, e.to_string(), stats);
    }

    let result = if stats.files.upserted == 0 {
        SubmitResult {
            status: SubmitStatus::Warning,
            http_status: 216,
            message: "No files were added".to_string(),
            stats,
        }
    } else if stats.series.errors + stats.episodes.errors + stats.files.errors > 0 {
        SubmitResult {
            status: SubmitStatus::Warning,
            http_status: 201,
            message: "Completed with errors".to_string(),
            stats,
        }
    } else {
        SubmitResult {
            status: SubmitStatus::Ok,
            http_status: 201,
            message: "Completed without errors or warnings".to_string(),
            stats,
        }
    };

    log::info!(
        "Scan from {}: {} file(s) upserted, {} queued, {} unchanged",
        hostname,
        stats.files.upserted,
        stats.files.queued,
        stats.files.nc
    );
    result
}

/// Location-key form of the scanning host
fn validate(payload: &Value) -> Result<String> {
    if !payload.is_object() {
        return Err(XBakeError::Other("payload must be a JSON object".into()));
    }
    let hostname = payload
        .pointer("/scan/hostname")
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| XBakeError::Other("scan.hostname is required".into()))?;

    for section in ["series", "files"] {
        match payload.get(section) {
            None | Some(Value::Object(_)) => {}
            Some(_) => return Err(XBakeError::Other(format!("{} must be an object", section))),
        }
    }
    Ok(normalize_host(hostname))
}

fn as_int(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn merge_top_level(base: &mut Value, update: &Map<String, Value>) {
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    if let Value::Object(obj) = base {
        for (k, v) in update {
            obj.insert(k.clone(), v.clone());
        }
    }
}

/// Store `doc` if its `lastupdated` is newer than the stored copy
fn upsert_if_newer(
    store: &dyn MetadataStore,
    collection: &str,
    doc: &Map<String, Value>,
    stats: &mut CollectionStats,
) -> Result<()> {
    stats.total += 1;
    let Some(id) = doc.get("_id").and_then(Value::as_str) else {
        log::error!("{} entry without _id skipped", collection);
        stats.errors += 1;
        return Ok(());
    };

    let this_update = as_int(doc.get("lastupdated")).unwrap_or(0);
    let existing = store.find_one(collection, &json!({ "_id": id }))?;
    let last_update = match &existing {
        Some(e) => as_int(e.get("lastupdated")).unwrap_or(0),
        None => -1,
    };

    if this_update <= last_update {
        log::debug!("[{}] Existing {} entry up-to-date", id, collection);
        stats.nc += 1;
        return Ok(());
    }

    let mut merged = existing.unwrap_or_else(|| json!({}));
    merge_top_level(&mut merged, doc);
    match store.upsert(collection, id, &merged) {
        Ok(()) => {
            stats.upserted += 1;
            if last_update > 0 {
                stats.updated += 1;
            } else {
                stats.new += 1;
            }
        }
        Err(e) => {
            log::error!("[{}] {} upsert failed: {}", id, collection, e);
            stats.errors += 1;
        }
    }
    Ok(())
}

fn ingest(
    queue: &JobQueue,
    store: &dyn MetadataStore,
    payload: &Value,
    hostname: &str,
    stats: &mut ScanStats,
) -> Result<()> {
    let empty = Map::new();
    let series = payload.get("series").and_then(Value::as_object).unwrap_or(&empty);

    let mut episodes = Vec::new();
    for (norm_id, sdata) in series {
        let Some(sdata) = sdata.as_object() else {
            continue;
        };
        // Series without a canonical title are not stored
        if !sdata.get("ctitle").map_or(false, truthy) {
            log::debug!("Skipping series {} without ctitle", norm_id);
            continue;
        }

        let mut doc = sdata.clone();
        let eps = doc.remove("episodes");
        doc.insert("norm_id".into(), Value::String(norm_id.clone()));
        upsert_if_newer(store, SERIES_COLLECTION, &doc, &mut stats.series)?;

        if let Some(Value::Array(eps)) = eps {
            episodes.extend(eps.into_iter().filter_map(|e| match e {
                Value::Object(m) => Some(m),
                _ => None,
            }));
        }
    }

    for ep in &episodes {
        upsert_if_newer(store, EPISODES_COLLECTION, ep, &mut stats.episodes)?;
    }

    let tstamp = as_int(payload.pointer("/scan/tstamp")).unwrap_or_else(|| chrono::Utc::now().timestamp());
    let files = payload.get("files").and_then(Value::as_object).unwrap_or(&empty);
    for (fname, fdata) in files {
        let Some(fdata) = fdata.as_object() else {
            log::debug!("Skipping file {}", fname);
            continue;
        };
        ingest_file(queue, store, hostname, tstamp, fname, fdata, &mut stats.files)?;
    }

    Ok(())
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn ingest_file(
    queue: &JobQueue,
    store: &dyn MetadataStore,
    hostname: &str,
    tstamp: i64,
    fname: &str,
    fdata: &Map<String, Value>,
    stats: &mut CollectionStats,
) -> Result<()> {
    stats.total += 1;

    let Some(fid) = fdata
        .get("checksum")
        .and_then(|c| c.get("md5"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    else {
        log::error!("File {} has no checksum, skipped", fname);
        stats.errors += 1;
        return Ok(());
    };

    if fdata.get("status").and_then(Value::as_str) == Some("unchanged") {
        log::debug!("File {} unchanged, skipping", fname);
        stats.nc += 1;
        return Ok(());
    }

    let existing = store.find_one(FILES_COLLECTION, &json!({ "_id": fid }))?;
    let is_new = existing.as_ref().map_or(true, |e| e.get("location").is_none());
    let mut doc = existing.unwrap_or_else(|| json!({}));

    let mut fields = Map::new();
    for key in ["status", "last_updated", "checksum", "mediainfo", "tdex_id"] {
        fields.insert(key.to_string(), fdata.get(key).cloned().unwrap_or(Value::Null));
    }
    let fparse = fdata.get("fparse").cloned().unwrap_or_else(|| json!({}));
    fields.insert(
        "fparse".into(),
        json!({
            "series": fparse.get("series"),
            "season": as_int(fparse.get("season")),
            "episode": as_int(fparse.get("episode")),
            "special": fparse.get("special"),
        }),
    );
    merge_top_level(&mut doc, &fields);

    if doc.get("series_id").map_or(true, Value::is_null) || doc.get("episode_id").map_or(true, Value::is_null) {
        let (series_id, episode_id) = link_episode(store, fdata, &fparse)?;
        doc["series_id"] = series_id;
        doc["episode_id"] = episode_id;
    }

    if !doc.get("location").map_or(false, Value::is_object) {
        doc["location"] = json!({});
    }
    doc["default_location"] = Value::String(hostname.to_string());
    doc["location"][hostname] = json!({
        "tstamp": tstamp,
        "dpath": fdata.get("dpath"),
        "fpath": fdata.get("fpath"),
        "stat": fdata.get("stat"),
        "mkey_id": fdata.get("mkey_id"),
    });

    if let Err(e) = store.upsert(FILES_COLLECTION, fid, &doc) {
        log::error!("File {} ({}) upsert failed: {}", fname, fid, e);
        stats.errors += 1;
        return Ok(());
    }
    stats.upserted += 1;
    if is_new {
        stats.new += 1;
    } else {
        stats.updated += 1;
    }

    match queue.enqueue(QueueName::Transfer, &Envelope::new(fid)) {
        Ok(()) => stats.queued += 1,
        Err(e) => {
            log::error!("Failed to enqueue transfer for {}: {}", fid, e);
            stats.errors += 1;
        }
    }
    Ok(())
}

/// Series and episode ids for a file, matched by tdex id, season and episode
fn link_episode(store: &dyn MetadataStore, fdata: &Map<String, Value>, fparse: &Value) -> Result<(Value, Value)> {
    let Some(tdex_id) = fdata.get("tdex_id").filter(|v| !v.is_null()) else {
        return Ok((Value::Null, Value::Null));
    };
    let Some(series) = store.find_one(SERIES_COLLECTION, &json!({ "norm_id": tdex_id }))? else {
        return Ok((Value::Null, Value::Null));
    };

    let filter = json!({
        "series_id": series["_id"],
        "season": as_int(fparse.get("season")),
        "episode": as_int(fparse.get("episode")),
    });
    match store.find_one(EPISODES_COLLECTION, &filter)? {
        Some(ep) => Ok((series["_id"].clone(), ep["_id"].clone())),
        None => Ok((Value::Null, Value::Null)),
    }
}
