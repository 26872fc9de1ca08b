use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{identity::FileIdentity, path_utils::append_extension};

/// On-disk form of the position record. Unknown keys are ignored when reading.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PositionRecord {
    #[serde(rename = "pos")]
    pub position: u64,
    /// seconds since unix epoch
    #[serde(rename = "time")]
    pub saved_at: f64,
    pub inode: u64,
    #[serde(rename = "dev")]
    pub device: u64,
}

impl PositionRecord {
    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            inode: self.inode,
            device: self.device,
            size: 0,
        }
    }
}

/// Result of `PositionStore::read`
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LoadedPosition {
    pub position: u64,
    /// seconds elapsed since the record was saved, zero on first run
    pub idle_duration: f64,
    pub identity: FileIdentity,
}

impl LoadedPosition {
    fn first_run() -> Self {
        Self {
            position: 0,
            idle_duration: 0.0,
            identity: FileIdentity::zero(),
        }
    }
}

/// Possible errors that could happen while working with persistent position storage
#[derive(Error, Debug)]
pub enum PositionStoreError {
    #[error("while working with position record {path}")]
    IO {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("while trying to (de)serialize position record {path}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Fixed-attempt, fixed-delay retry applied to reads of the position record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or attempts are exhausted, returning the last error.
    pub fn run<T, E>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(_) => {
                    attempt += 1;
                    thread::sleep(self.delay);
                }
            }
        }
    }
}

/// Durable store of a single `PositionRecord` in a file.
///
/// Writes go to a sibling temporary file which is synced and then renamed over the record, so a concurrent reader
/// either sees the previous record or the new one, never a torn one. Reads are retried according to `RetryPolicy`
/// to ride out transient failures. There is no cross-process locking.
#[derive(Clone, Debug)]
pub struct PositionStore {
    path: PathBuf,
    retry: RetryPolicy,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last saved position. A missing or empty record is a first run and yields zero values.
    pub fn read(&self) -> Result<LoadedPosition, PositionStoreError> {
        let record = self.retry.run(|| self.read_once())?;
        let Some(record) = record else {
            return Ok(LoadedPosition::first_run());
        };
        Ok(LoadedPosition {
            position: record.position,
            idle_duration: unix_now() - record.saved_at,
            identity: record.identity(),
        })
    }

    fn read_once(&self) -> Result<Option<PositionRecord>, PositionStoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PositionStoreError::IO {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.is_empty() {
            return Ok(None);
        }
        let record = serde_json::from_slice(&content).map_err(|source| PositionStoreError::Serde {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Persist `position` for the file identified by `identity`, stamped with the current time.
    ///
    /// Returns only after the data reached stable storage.
    pub fn write(&self, position: u64, identity: &FileIdentity) -> Result<(), PositionStoreError> {
        let record = PositionRecord {
            position,
            saved_at: unix_now(),
            inode: identity.inode,
            device: identity.device,
        };
        self.write_record(&record)
    }

    /// Replace the stored record as a whole.
    pub fn write_record(&self, record: &PositionRecord) -> Result<(), PositionStoreError> {
        let io_error = |source| PositionStoreError::IO {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error)?;
            }
        }

        let temp_path = append_extension(self.path.clone(), format!("tmp.{}", std::process::id()));
        let replaced = self
            .write_temporary(&temp_path, record)
            .and_then(|()| fs::rename(&temp_path, &self.path).map_err(io_error));
        if let Err(e) = replaced {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        sync_parent(&self.path);
        Ok(())
    }

    fn write_temporary(&self, temp_path: &Path, record: &PositionRecord) -> Result<(), PositionStoreError> {
        let io_error = |source| PositionStoreError::IO {
            path: self.path.clone(),
            source,
        };

        let file = File::create(temp_path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record).map_err(|source| PositionStoreError::Serde {
            path: self.path.clone(),
            source,
        })?;
        writer.flush().map_err(io_error)?;
        let file = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
        file.sync_all().map_err(io_error)
    }
}

/// Make the rename itself durable. Not every filesystem allows syncing a directory, so failures are ignored.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn identity(inode: u64, device: u64) -> FileIdentity {
        FileIdentity {
            inode,
            device,
            size: 0,
        }
    }

    #[rstest]
    fn missing_record_is_first_run(dir: TempDir) {
        let store = PositionStore::new(dir.path().join("pos"));
        let loaded = store.read().unwrap();
        assert_eq!(loaded.position, 0);
        assert_eq!(loaded.idle_duration, 0.0);
        assert!(loaded.identity.is_zero());
    }

    #[rstest]
    fn empty_record_is_first_run(dir: TempDir) {
        let path = dir.path().join("pos");
        File::create(&path).unwrap();
        let loaded = PositionStore::new(path).read().unwrap();
        assert_eq!(loaded.position, 0);
        assert!(loaded.identity.is_zero());
    }

    #[rstest]
    fn written_record_is_read_back(dir: TempDir) {
        let store = PositionStore::new(dir.path().join("pos"));
        store.write(456, &identity(3, 4)).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.position, 456);
        assert_eq!(loaded.identity, identity(3, 4));
        assert!(loaded.idle_duration >= 0.0 && loaded.idle_duration < 60.0);
    }

    #[rstest]
    fn record_uses_flat_json_keys(dir: TempDir) {
        let path = dir.path().join("pos");
        PositionStore::new(&path).write(17, &identity(5, 6)).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["pos"], 17);
        assert_eq!(value["inode"], 5);
        assert_eq!(value["dev"], 6);
        assert!(value["time"].is_f64());
    }

    #[rstest]
    fn idle_duration_is_measured_from_saved_time(dir: TempDir) {
        let path = dir.path().join("pos");
        let saved_at = unix_now() - 120.0;
        fs::write(
            &path,
            format!(r#"{{"pos":123,"time":{saved_at},"inode":1,"dev":2,"extra":"ignored"}}"#),
        )
        .unwrap();

        let loaded = PositionStore::new(path).read().unwrap();
        assert_eq!(loaded.position, 123);
        assert_eq!(loaded.identity, identity(1, 2));
        assert!(loaded.idle_duration >= 120.0 && loaded.idle_duration < 180.0);
    }

    #[rstest]
    fn malformed_record_fails_after_retries(dir: TempDir) {
        let path = dir.path().join("pos");
        fs::write(&path, b"{\"pos\":").unwrap();
        let store = PositionStore::new(path).with_retry(RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
        });
        assert!(matches!(
            store.read(),
            Err(PositionStoreError::Serde { .. })
        ));
    }

    #[rstest]
    fn write_creates_missing_directory(dir: TempDir) {
        let store = PositionStore::new(dir.path().join("state").join("pos"));
        store.write(1, &identity(1, 1)).unwrap();
        assert_eq!(store.read().unwrap().position, 1);
    }

    #[rstest]
    fn failed_write_removes_temporary_file(dir: TempDir) {
        // a directory in place of the record makes the final rename fail
        let path = dir.path().join("pos");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), b"x").unwrap();

        let result = PositionStore::new(&path).write(1, &identity(1, 1));
        assert!(matches!(result, Err(PositionStoreError::IO { .. })));
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("pos")]);
    }

    #[rstest]
    fn write_leaves_no_temporary_files(dir: TempDir) {
        let store = PositionStore::new(dir.path().join("pos"));
        store.write(1, &identity(1, 1)).unwrap();
        store.write(2, &identity(1, 1)).unwrap();
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn retry_stops_at_first_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let result: Result<u32, &str> = policy.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err("transient")
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retry_gives_up_after_configured_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let result: Result<(), &str> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err("broken")
        });
        assert_eq!(result, Err("broken"));
        assert_eq!(calls.get(), 3);
    }

    #[rstest]
    fn concurrent_reader_never_sees_torn_record(dir: TempDir) {
        let path = dir.path().join("pos");
        PositionStore::new(&path).write(789, &identity(5, 6)).unwrap();

        let reader_path = path.clone();
        let reader = std::thread::spawn(move || {
            let store = PositionStore::new(reader_path);
            for _ in 0..100 {
                let loaded = store.read().unwrap();
                assert!(loaded.position >= 789);
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let store = PositionStore::new(path);
        for i in 0..100 {
            store.write(1000 + i, &identity(5, 6)).unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        reader.join().unwrap();
    }
}
