// Pipeline tests: transfer -> transcode against in-memory stores with fake
// copy and encode steps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use super::worker::{FlagProbe, Worker, WorkerState};
use super::*;
use crate::constants::{FILES_COLLECTION, RC_XFER_LOOKUP_FAILED, VIDEOS_COLLECTION};
use crate::error::{Result, XBakeError};
use crate::queue::memory::MemoryListStore;
use crate::queue::{Dequeued, ListStore};
use crate::store::FileRecord;
use crate::store::memory::MemoryMetadataStore;
use crate::xcode::{TranscodeReport, TranscodeRequest};

const CONTENT: &[u8] = b"not really a matroska file, but it has a size";

/// Metadata store that remembers every status written to `files`
struct RecordingStore {
    inner: MemoryMetadataStore,
    statuses: Mutex<Vec<String>>,
}

impl MetadataStore for RecordingStore {
    fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Value>> {
        self.inner.find_one(collection, filter)
    }

    fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        self.inner.upsert(collection, id, doc)
    }

    fn update_set(&self, collection: &str, id: &str, fields: &Map<String, Value>) -> Result<bool> {
        if collection == FILES_COLLECTION {
            if let Some(Value::String(s)) = fields.get("status") {
                self.statuses.lock().push(s.clone());
            }
        }
        self.inner.update_set(collection, id, fields)
    }
}

/// Copies from an in-memory "remote" filesystem. With `truncate` set the
/// copy loses its last byte.
#[derive(Default)]
struct FakeCopier {
    remote: HashMap<String, Vec<u8>>,
    truncate: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl RemoteCopier for FakeCopier {
    fn copy(&self, host: &str, remote_path: &str, dest_dir: &Path) -> Result<()> {
        self.calls.lock().push((host.to_string(), remote_path.to_string()));
        let data = self
            .remote
            .get(remote_path)
            .ok_or_else(|| XBakeError::Transfer(format!("{}: no such file", remote_path)))?;
        let name = Path::new(remote_path).file_name().unwrap();
        let end = if self.truncate { data.len() - 1 } else { data.len() };
        std::fs::write(dest_dir.join(name), &data[..end])?;
        Ok(())
    }
}

/// Writes a dummy output file unless told to fail
#[derive(Default)]
struct FakeTranscoder {
    fail: bool,
    requests: Mutex<Vec<TranscodeRequest>>,
}

impl Transcoder for FakeTranscoder {
    fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeReport> {
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(XBakeError::Transcode("encoder crashed".into()));
        }
        std::fs::create_dir_all(request.output.parent().unwrap())?;
        std::fs::write(&request.output, b"mp4")?;
        Ok(TranscodeReport {
            args: vec!["-y".into(), "-i".into(), request.input.to_string_lossy().into_owned()],
            screenshot: None,
        })
    }
}

struct Harness {
    dir: TempDir,
    config: Config,
    lists: Arc<MemoryListStore>,
    store: Arc<RecordingStore>,
    copier: Arc<FakeCopier>,
    transcoder: Arc<FakeTranscoder>,
}

impl Harness {
    fn new(copier: FakeCopier, transcoder: FakeTranscoder) -> Self {
        let dir = TempDir::new().unwrap();
        let raw = format!(
            r#"
            [srv]
            xfer_path = "{stage}"
            xcode_outpath = "{out}"
            xcode_default_profile = "720p"

            [hosts]
            "mira.example.com" = 5
            "sol.example.com" = 100

            [profiles.720P]
            height = 720
            crf = 22
            abr = 96
            "#,
            stage = dir.path().join("stage").display(),
            out = dir.path().join("out").display(),
        );

        Self {
            config: Config::from_toml_str(&raw).unwrap(),
            dir,
            lists: Arc::new(MemoryListStore::new()),
            store: Arc::new(RecordingStore {
                inner: MemoryMetadataStore::new(),
                statuses: Mutex::new(Vec::new()),
            }),
            copier: Arc::new(copier),
            transcoder: Arc::new(transcoder),
        }
    }

    fn context(&self) -> WorkerContext {
        let mut ctx = WorkerContext::new(
            &self.config,
            JobQueue::new(self.lists.clone(), "test"),
            self.store.clone(),
            self.copier.clone(),
            self.transcoder.clone(),
        );
        ctx.settings.poll_timeout = Duration::from_millis(20);
        ctx
    }

    fn worker(&self, queue: QueueName) -> Worker {
        let alive = Arc::new(AtomicBool::new(true));
        Worker::new(queue, self.context(), Box::new(FlagProbe(alive)))
    }

    fn queue(&self) -> JobQueue {
        JobQueue::new(self.lists.clone(), "test")
    }

    fn stage_dir(&self) -> PathBuf {
        self.dir.path().join("stage")
    }

    fn file_doc(&self, fid: &str) -> Value {
        self.store.inner.get(FILES_COLLECTION, fid).unwrap()
    }

    fn statuses(&self) -> Vec<String> {
        self.store.statuses.lock().clone()
    }
}

fn remote_copy(paths: &[&str]) -> FakeCopier {
    FakeCopier {
        remote: paths.iter().map(|p| (p.to_string(), CONTENT.to_vec())).collect(),
        ..Default::default()
    }
}

fn insert_file(store: &RecordingStore, fid: &str, hosts: &[&str]) {
    let mut location = Map::new();
    for host in hosts {
        location.insert(
            host.to_string(),
            json!({
                "fpath": {"file": "ep01.mkv", "base": "ep01", "real": format!("/media/{}/ep01.mkv", host)},
                "stat": {"size": CONTENT.len()}
            }),
        );
    }
    let md5 = format!("{:x}", Md5::digest(CONTENT));
    store
        .inner
        .upsert(
            FILES_COLLECTION,
            fid,
            &json!({
                "status": "new",
                "checksum": {"md5": md5},
                "location": location,
                "mediainfo": {
                    "video": [{"width": 1920, "height": 1080, "display_aspect_ratio": "16:9"}],
                    "text": [{"format": "ASS"}],
                    "menu": [{"offset": 0}, {"offset": 60}, {"offset": 600}]
                }
            }),
        )
        .unwrap();
}

#[test]
fn test_full_pipeline_status_order() {
    let h = Harness::new(
        remote_copy(&["/media/mira_example_com/ep01.mkv", "/media/sol_example_com/ep01.mkv"]),
        FakeTranscoder::default(),
    );
    insert_file(&h.store, "f1", &["sol_example_com", "mira_example_com"]);
    h.queue().enqueue(QueueName::Transfer, &Envelope::new("f1")).unwrap();

    let mut xfer = h.worker(QueueName::Transfer);
    assert!(xfer.poll_once().unwrap());
    assert_eq!(xfer.stats().succeeded, 1);
    assert_eq!(xfer.state(), WorkerState::Idle);

    // Cheapest host wins and its FQDN is restored for the connection
    assert_eq!(
        h.copier.calls.lock().clone(),
        vec![("mira.example.com".to_string(), "/media/mira_example_com/ep01.mkv".to_string())]
    );
    assert_eq!(h.file_doc("f1")["status"], "queued-xcode");
    assert_eq!(h.queue().work_len(QueueName::Transfer).unwrap(), 0);
    assert_eq!(h.queue().pending_len(QueueName::Transcode).unwrap(), 1);

    let mut xcode = h.worker(QueueName::Transcode);
    assert!(xcode.poll_once().unwrap());
    assert_eq!(xcode.stats().succeeded, 1);

    assert_eq!(h.statuses(), vec!["downloading", "queued-xcode", "transcoding", "complete"]);
    assert_eq!(h.queue().work_len(QueueName::Transcode).unwrap(), 0);

    let req = h.transcoder.requests.lock()[0].clone();
    assert_eq!(req.input, h.stage_dir().join("ep01.mkv"));
    assert_eq!(req.output, h.dir.path().join("out").join("720p").join("ep01.mp4"));
    assert_eq!(req.location, "mira_example_com");
    assert_eq!(req.crf, 22);
    assert_eq!(req.audio_bitrate, 96);
    assert!(req.bake_subs);
    assert_eq!(req.screenshot_offset, Some(605));
    assert_eq!(req.scale.map(|s| (s.width, s.height)), Some((1280, 720)));

    let video = h.store.inner.get(VIDEOS_COLLECTION, "f1").unwrap();
    assert_eq!(video["versions"]["720p"]["location"]["uri"], "720p/ep01.mp4");
    assert_eq!(video["source"]["location"]["hostname"], "mira_example_com");
}

#[test]
fn test_existing_staged_file_skips_copy() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    insert_file(&h.store, "f1", &["sol_example_com"]);
    std::fs::create_dir_all(h.stage_dir()).unwrap();
    std::fs::write(h.stage_dir().join("ep01.mkv"), CONTENT).unwrap();

    h.queue().enqueue(QueueName::Transfer, &Envelope::new("f1")).unwrap();
    let mut xfer = h.worker(QueueName::Transfer);
    assert!(xfer.poll_once().unwrap());

    assert!(h.copier.calls.lock().is_empty());
    assert_eq!(h.statuses(), vec!["queued-xcode"]);
    assert_eq!(h.queue().pending_len(QueueName::Transcode).unwrap(), 1);
}

#[test]
fn test_stale_staged_file_is_copied_again() {
    let h = Harness::new(remote_copy(&["/media/sol_example_com/ep01.mkv"]), FakeTranscoder::default());
    insert_file(&h.store, "f1", &["sol_example_com"]);
    std::fs::create_dir_all(h.stage_dir()).unwrap();
    std::fs::write(h.stage_dir().join("ep01.mkv"), b"old bytes").unwrap();

    h.queue().enqueue(QueueName::Transfer, &Envelope::new("f1")).unwrap();
    h.worker(QueueName::Transfer).poll_once().unwrap();

    assert_eq!(h.copier.calls.lock().len(), 1);
    assert_eq!(std::fs::read(h.stage_dir().join("ep01.mkv")).unwrap(), CONTENT);
}

#[test]
fn test_size_mismatch_fails_transfer() {
    let mut copier = remote_copy(&["/media/sol_example_com/ep01.mkv"]);
    copier.truncate = true;
    let h = Harness::new(copier, FakeTranscoder::default());
    insert_file(&h.store, "f1", &["sol_example_com"]);

    h.queue().enqueue(QueueName::Transfer, &Envelope::new("f1")).unwrap();
    let mut xfer = h.worker(QueueName::Transfer);
    assert!(xfer.poll_once().unwrap());

    assert_eq!(xfer.stats().failed, 1);
    assert_eq!(h.statuses(), vec!["downloading", "new"]);
    assert_eq!(h.file_doc("f1")["last-error"], "transfer failed");
    assert_eq!(h.queue().pending_len(QueueName::Transcode).unwrap(), 0);
    assert_eq!(h.queue().work_len(QueueName::Transfer).unwrap(), 0);
}

#[test]
fn test_copy_error_without_file_fails_transfer() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    insert_file(&h.store, "f1", &["sol_example_com"]);

    h.queue().enqueue(QueueName::Transfer, &Envelope::new("f1")).unwrap();
    let mut xfer = h.worker(QueueName::Transfer);
    xfer.poll_once().unwrap();

    assert_eq!(xfer.stats().failed, 1);
    assert_eq!(h.file_doc("f1")["status"], "new");
}

#[test]
fn test_unknown_file_is_acknowledged_as_failure() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    h.queue().enqueue(QueueName::Transfer, &Envelope::new("ghost")).unwrap();

    let ctx = h.context();
    let job = match ctx.queue.dequeue_blocking(QueueName::Transfer, Duration::from_millis(10)).unwrap() {
        Dequeued::Job(job) => job,
        other => panic!("expected a job, got {:?}", other),
    };
    let outcome = runner::run_job(&ctx, QueueName::Transfer, &job);
    assert_eq!(outcome.code(), RC_XFER_LOOKUP_FAILED);
}

#[test]
fn test_transcode_failure_resets_status() {
    let h = Harness::new(
        remote_copy(&["/media/sol_example_com/ep01.mkv"]),
        FakeTranscoder {
            fail: true,
            ..Default::default()
        },
    );
    insert_file(&h.store, "f1", &["sol_example_com"]);
    h.queue().enqueue(QueueName::Transfer, &Envelope::new("f1")).unwrap();

    h.worker(QueueName::Transfer).poll_once().unwrap();
    let mut xcode = h.worker(QueueName::Transcode);
    xcode.poll_once().unwrap();

    assert_eq!(xcode.stats().failed, 1);
    assert_eq!(h.statuses(), vec!["downloading", "queued-xcode", "transcoding", "new"]);
    assert_eq!(h.file_doc("f1")["last-error"], "transcoding failed");
    assert!(h.store.inner.get(VIDEOS_COLLECTION, "f1").is_none());
    assert_eq!(h.queue().work_len(QueueName::Transcode).unwrap(), 0);
}

#[test]
fn test_transcode_options_from_job() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    insert_file(&h.store, "f1", &["sol_example_com"]);
    let record = FileRecord::load(h.store.as_ref(), "f1").unwrap();
    let ctx = h.context();

    let opts = json!({
        "realpath": "/stage/ep01.mkv",
        "basefile": "ep01",
        "profile": "unknown",
        "version": "web",
        "no_subs": true,
        "vscap": -1,
        "fansub": "Group"
    });
    let job = Envelope::new("f1").with_opts(opts.as_object().unwrap().clone());
    let req = transcode::build_request(&ctx, &job, &record).unwrap();

    assert_eq!(req.profile, "unknown");
    assert_eq!(req.version.as_deref(), Some("web"));
    assert_eq!(req.crf, 20);
    assert_eq!(req.audio_bitrate, 128);
    assert_eq!(req.scale, None);
    assert!(!req.bake_subs);
    assert_eq!(req.screenshot_offset, None);
    assert_eq!(req.fansub.as_deref(), Some("Group"));
    assert_eq!(req.location, "sol_example_com");

    let job = Envelope::new("f1");
    assert!(matches!(
        transcode::build_request(&ctx, &job, &record),
        Err(XBakeError::Transcode(_))
    ));
}

#[test]
fn test_malformed_entry_is_counted_and_dropped() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    let q = h.queue();
    h.lists.push_head(&q.pending_key(QueueName::Transcode), "{not json").unwrap();

    let mut xcode = h.worker(QueueName::Transcode);
    assert!(xcode.poll_once().unwrap());
    assert_eq!(xcode.stats().malformed, 1);
    assert_eq!(xcode.stats().processed, 0);
    assert_eq!(q.work_len(QueueName::Transcode).unwrap(), 0);
}

#[test]
fn test_recovery_requeues_abandoned_jobs() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    let q = h.queue();
    let work = q.work_key(QueueName::Transfer);
    for fid in ["a", "b", "c"] {
        h.lists.push_head(&work, &Envelope::new(fid).to_json().unwrap()).unwrap();
    }
    h.lists.push_head(&work, "garbage").unwrap();

    let mut xfer = h.worker(QueueName::Transfer);
    let report = xfer.recover().unwrap();
    assert_eq!(report.requeued, 3);
    assert_eq!(report.discarded, 1);
    assert_eq!(q.work_len(QueueName::Transfer).unwrap(), 0);
    assert_eq!(q.pending_len(QueueName::Transfer).unwrap(), 3);
    assert_eq!(xfer.stats().requeued, 3);
}

#[test]
fn test_run_stops_when_parent_is_gone() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    let alive = Arc::new(AtomicBool::new(false));
    let worker = Worker::new(QueueName::Transfer, h.context(), Box::new(FlagProbe(alive)));

    let stats = worker.run().unwrap();
    assert_eq!(stats.processed, 0);
}

#[test]
fn test_profile_without_abr_uses_global_bitrate() {
    let mut h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    h.config.xcode.abr = 192;
    h.config.profiles.clear();
    insert_file(&h.store, "f1", &["sol_example_com"]);
    let record = FileRecord::load(h.store.as_ref(), "f1").unwrap();
    let ctx = h.context();

    let opts = json!({"realpath": "/stage/ep01.mkv"});
    let job = Envelope::new("f1").with_opts(opts.as_object().unwrap().clone());
    let req = transcode::build_request(&ctx, &job, &record).unwrap();
    assert_eq!(req.audio_bitrate, 192);
}

#[test]
fn test_debug_level_shows_ffmpeg_output() {
    let config = Config::default();
    assert!(!WorkerSettings::at_log_level(&config, log::LevelFilter::Info).show_ffmpeg);
    assert!(WorkerSettings::at_log_level(&config, log::LevelFilter::Debug).show_ffmpeg);
    assert!(WorkerSettings::at_log_level(&config, log::LevelFilter::Trace).show_ffmpeg);
}

/// List store whose next `fail_pops` head pops fail
#[derive(Default)]
struct FlakyLists {
    inner: MemoryListStore,
    fail_pops: AtomicUsize,
}

impl ListStore for FlakyLists {
    fn push_tail(&self, key: &str, value: &str) -> Result<()> {
        self.inner.push_tail(key, value)
    }

    fn push_head(&self, key: &str, value: &str) -> Result<()> {
        self.inner.push_head(key, value)
    }

    fn pop_head(&self, key: &str) -> Result<Option<String>> {
        let left = self.fail_pops.load(Ordering::SeqCst);
        if left > 0 {
            self.fail_pops.store(left - 1, Ordering::SeqCst);
            return Err(XBakeError::Queue("connection reset".into()));
        }
        self.inner.pop_head(key)
    }

    fn pop_tail(&self, key: &str) -> Result<Option<String>> {
        self.inner.pop_tail(key)
    }

    fn len(&self, key: &str) -> Result<usize> {
        self.inner.len(key)
    }

    fn move_tail_to_head_blocking(&self, src: &str, dst: &str, timeout: Duration) -> Result<Option<String>> {
        self.inner.move_tail_to_head_blocking(src, dst, timeout)
    }
}

#[test]
fn test_failed_acknowledge_is_retried_before_next_dequeue() {
    let h = Harness::new(remote_copy(&[]), FakeTranscoder::default());
    let lists = Arc::new(FlakyLists::default());
    let q = JobQueue::new(lists.clone(), "test");
    q.enqueue(QueueName::Transfer, &Envelope::new("missing-1")).unwrap();
    q.enqueue(QueueName::Transfer, &Envelope::new("missing-2")).unwrap();

    let mut ctx = h.context();
    ctx.queue = q.clone();
    let mut xfer = Worker::new(
        QueueName::Transfer,
        ctx,
        Box::new(FlagProbe(Arc::new(AtomicBool::new(true)))),
    );

    lists.fail_pops.store(1, Ordering::SeqCst);
    assert!(xfer.poll_once().is_err());
    assert_eq!(q.work_len(QueueName::Transfer).unwrap(), 1);
    assert_eq!(q.pending_len(QueueName::Transfer).unwrap(), 1);

    // The stuck entry is cleared first, so the work list never holds two
    assert!(xfer.poll_once().unwrap());
    assert_eq!(q.work_len(QueueName::Transfer).unwrap(), 0);
    assert_eq!(q.pending_len(QueueName::Transfer).unwrap(), 0);
    assert_eq!(xfer.stats().processed, 2);
}
