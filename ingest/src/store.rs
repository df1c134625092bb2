//! Durable accumulation of submissions into a single JSON document.
//!
//! The document maps receipt timestamps to submissions. Every append reads
//! the whole document, inserts one key and rewrites it through a temporary
//! file in the same directory, so a failed write never truncates what was
//! persisted before.
//!
//! Appends are not synchronised across callers. Route concurrent writers
//! through a [`StoreHandle`], which owns the store on a single task.

use crate::codec::Submission;
use crate::metrics_defs::{STORE_APPEND_DURATION, STORE_APPEND_FAILED};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use shared::{counter, histogram};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

/// Receipt timestamp -> submission, in insertion order.
pub type Document = IndexMap<String, Submission>;

/// Local wall-clock time with microseconds, e.g. `2024-05-01 13:45:09.123456`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const WRITER_QUEUE_SIZE: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store document {path} is not valid JSON: {source}")]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store document {path} is not a map of string fields: {source}")]
    UnexpectedShape {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on store document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize store document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store writer is no longer running")]
    WriterClosed,

    #[error("store task failed: {0}")]
    Task(#[from] JoinError),
}

/// Source of record keys.
pub trait Clock: Send + Sync {
    fn timestamp(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn timestamp(&self) -> String {
        chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

#[derive(Clone)]
pub struct RecordStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted document. A missing file is an empty document.
    pub fn load(&self) -> Result<Document, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        serde_json::from_slice(&bytes).map_err(|source| {
            let path = self.path.clone();
            if source.is_data() {
                StoreError::UnexpectedShape { path, source }
            } else {
                StoreError::CorruptStore { path, source }
            }
        })
    }

    /// Stores `submission` under a fresh timestamp and returns that key.
    ///
    /// A key that already exists is overwritten: two appends within the same
    /// clock tick keep only the later submission.
    pub fn append(&self, submission: Submission) -> Result<String, StoreError> {
        let mut document = self.load()?;
        let key = self.clock.timestamp();

        if document.insert(key.clone(), submission).is_some() {
            tracing::warn!(key = %key, path = %self.path.display(), "Record key collision, previous submission overwritten");
        }

        self.persist(&document)?;
        Ok(key)
    }

    fn persist(&self, document: &Document) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut bytes, PrettyFormatter::with_indent(b"    "));
        document.serialize(&mut serializer)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|source| self.io_error(source))?;
        temp.write_all(&bytes)
            .map_err(|source| self.io_error(source))?;
        // Carry the existing document's permissions over to its replacement
        match fs::metadata(&self.path) {
            Ok(metadata) => temp
                .as_file()
                .set_permissions(metadata.permissions())
                .map_err(|source| self.io_error(source))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(self.io_error(source)),
        }
        temp.as_file()
            .sync_all()
            .map_err(|source| self.io_error(source))?;
        temp.persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;

        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Runs [`RecordStore::append`] on the blocking pool, recording metrics.
pub async fn append_blocking(
    store: &RecordStore,
    submission: Submission,
) -> Result<String, StoreError> {
    let store = store.clone();
    let start = Instant::now();

    let result = tokio::task::spawn_blocking(move || store.append(submission))
        .await
        .map_err(StoreError::from)
        .and_then(|inner| inner);

    histogram!(STORE_APPEND_DURATION).record(start.elapsed().as_secs_f64());
    if result.is_err() {
        counter!(STORE_APPEND_FAILED).increment(1);
    }
    result
}

enum Command {
    Append {
        submission: Submission,
        reply: oneshot::Sender<Result<String, StoreError>>,
    },
}

/// Handle to the single task that owns a [`RecordStore`].
///
/// Appends sent through any clone are applied one at a time in arrival
/// order. The task exits once every handle has been dropped and the queue
/// is drained.
#[derive(Clone, Debug)]
pub struct StoreHandle {
    tx: mpsc::Sender<Command>,
}

impl StoreHandle {
    pub fn spawn(store: RecordStore) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE_SIZE);
        let task = tokio::spawn(run_writer(store, rx));
        (Self { tx }, task)
    }

    pub async fn append(&self, submission: Submission) -> Result<String, StoreError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Append { submission, reply })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        response.await.map_err(|_| StoreError::WriterClosed)?
    }
}

async fn run_writer(store: RecordStore, mut rx: mpsc::Receiver<Command>) {
    tracing::info!(path = %store.path().display(), "Store writer started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Append { submission, reply } => {
                let result = append_blocking(&store, submission).await;
                // The requester may have gone away; the append stands regardless
                let _ = reply.send(result);
            }
        }
    }

    tracing::info!("Store writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{FixedClock, SequenceClock, submission};

    fn store_in(dir: &tempfile::TempDir, clock: Arc<dyn Clock>) -> RecordStore {
        RecordStore::with_clock(dir.path().join("storage").join("data.json"), clock)
    }

    #[test]
    fn test_system_clock_format() {
        let ts = SystemClock.timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok());
        // date, space, time with six fractional digits
        assert_eq!(ts.len(), "2024-05-01 13:45:09.123456".len());
    }

    #[test]
    fn test_load_missing_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SystemClock));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_to_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(FixedClock::new("2024-05-01 13:45:09.123456")));
        let jane = submission(&[("name", "Jane Doe"), ("email", "jane@example.com")]);

        let key = store.append(jane.clone()).unwrap();

        assert_eq!(key, "2024-05-01 13:45:09.123456");
        let document = store.load().unwrap();
        assert_eq!(document.len(), 1);
        assert_eq!(document[&key], jane);
    }

    #[test]
    fn test_append_accumulates_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SequenceClock::default()));

        let submissions: Vec<_> = (0..5)
            .map(|i| submission(&[("n", &i.to_string())]))
            .collect();
        let keys: Vec<_> = submissions
            .iter()
            .map(|s| store.append(s.clone()).unwrap())
            .collect();

        let document = store.load().unwrap();
        assert_eq!(document.len(), 5);
        for (key, expected) in keys.iter().zip(&submissions) {
            assert_eq!(&document[key], expected);
        }
    }

    #[test]
    fn test_colliding_timestamp_keeps_later_submission() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(FixedClock::new("2024-05-01 00:00:00.000000")));

        store.append(submission(&[("who", "first")])).unwrap();
        store.append(submission(&[("who", "second")])).unwrap();

        let document = store.load().unwrap();
        assert_eq!(document.len(), 1);
        assert_eq!(document["2024-05-01 00:00:00.000000"]["who"], "second");
    }

    #[test]
    fn test_corrupt_store_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SystemClock));
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        let err = store.append(submission(&[("a", "1")])).unwrap_err();

        assert!(matches!(err, StoreError::CorruptStore { .. }));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{ not json");
    }

    #[test]
    fn test_non_object_document_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SystemClock));
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "[1, 2, 3]").unwrap();

        assert!(matches!(store.load(), Err(StoreError::UnexpectedShape { .. })));
    }

    #[test]
    fn test_non_string_field_is_reported_as_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SystemClock));
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), r#"{"k": {"age": 42}}"#).unwrap();

        let err = store.append(submission(&[("a", "1")])).unwrap_err();

        assert!(matches!(err, StoreError::UnexpectedShape { .. }));
        assert!(err.to_string().contains("not a map of string fields"));
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            r#"{"k": {"age": 42}}"#
        );
    }

    #[test]
    fn test_unwritable_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SystemClock));
        // A directory where the document should be
        fs::create_dir_all(store.path()).unwrap();

        let err = store.append(submission(&[("a", "1")])).unwrap_err();

        assert!(matches!(err, StoreError::Io { .. }));
        assert!(store.path().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_append_keeps_document_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SequenceClock::default()));
        store.append(submission(&[("a", "1")])).unwrap();
        fs::set_permissions(store.path(), fs::Permissions::from_mode(0o644)).unwrap();

        store.append(submission(&[("a", "2")])).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_document_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(FixedClock::new("2024-05-01 13:45:09.123456")));

        store
            .append(submission(&[("name", "Олена"), ("note", "ok")]))
            .unwrap();

        let expected = r#"{
    "2024-05-01 13:45:09.123456": {
        "name": "Олена",
        "note": "ok"
    }
}"#;
        assert_eq!(fs::read_to_string(store.path()).unwrap(), expected);
    }

    #[test]
    fn test_existing_records_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(FixedClock::new("2024-05-02 09:00:00.000000")));
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{"2024-05-01 08:00:00.000000": {"name": "earlier"}}"#,
        )
        .unwrap();

        store.append(submission(&[("name", "later")])).unwrap();

        let document = store.load().unwrap();
        let keys: Vec<_> = document.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["2024-05-01 08:00:00.000000", "2024-05-02 09:00:00.000000"]
        );
        assert_eq!(document["2024-05-01 08:00:00.000000"]["name"], "earlier");
    }

    #[tokio::test]
    async fn test_handle_serializes_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SequenceClock::default()));
        let (handle, task) = StoreHandle::spawn(store.clone());

        let appends: Vec<_> = (0..20)
            .map(|i| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.append(submission(&[("i", &i.to_string())])).await })
            })
            .collect();
        for append in appends {
            append.await.unwrap().unwrap();
        }

        drop(handle);
        task.await.unwrap();
        assert_eq!(store.load().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_handle_reports_store_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, Arc::new(SystemClock));
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "garbage").unwrap();
        let (handle, _task) = StoreHandle::spawn(store);

        let err = handle.append(submission(&[("a", "1")])).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptStore { .. }));
    }
}
