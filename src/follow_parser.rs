use std::{
    fs::File,
    io::{self, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::ParserConfig,
    identity::{self, FileIdentity, IdentityError},
    path_utils,
    position::{PositionStore, PositionStoreError},
    scanner::{LineScanner, ScanError, ScanMode},
    sink::{LineSink, NoopSink},
};

/// Outcome of scanning one physical file during an invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanResult {
    pub file_name: PathBuf,
    /// size of the file when it was opened
    pub size: u64,
    pub start_pos: u64,
    /// exclusive, always `start_pos` plus the bytes of the lines emitted
    pub end_pos: u64,
    pub rows: usize,
}

/// Possible errors that could happen while working with `FollowParser`
#[derive(Error, Debug)]
pub enum FollowParserError {
    #[error("failed to load position record")]
    LoadPosition(#[source] PositionStoreError),

    #[error("failed to fingerprint log file")]
    Identity(#[from] IdentityError),

    #[error("while opening {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("while scanning {path}")]
    Scan {
        path: PathBuf,
        #[source]
        source: ScanError,
    },

    #[error("failed to update position record")]
    Persistence(#[source] PositionStoreError),
}

/// Incremental reader of a growing, possibly rotated log file.
///
/// ## Usage
///
/// Each call to `parse` delivers the lines appended to the log since the previous call (possibly made by another
/// process) to a `LineSink`, then records how far it got in a position record under `ParserConfig::work_dir`.
///
/// ```rust no_run
/// # use logfollow::{FollowParser, FollowParserError, LineSink, ParserConfig, SinkError};
/// struct Printer;
///
/// impl LineSink for Printer {
///     fn parse(&mut self, line: &[u8]) -> Result<(), SinkError> {
///         println!("{}", String::from_utf8_lossy(line));
///         Ok(())
///     }
///
///     fn finish(&mut self, idle_duration: f64) {
///         println!("{idle_duration:.0}s since last run");
///     }
/// }
///
/// let mut parser = FollowParser::with_sink(ParserConfig::default(), Printer);
/// for segment in parser.parse("mail", "/var/log/mail.log")? {
///     println!("{}: {}..{}", segment.file_name.display(), segment.start_pos, segment.end_pos);
/// }
/// # Ok::<(), FollowParserError>(())
/// ```
///
/// ## Working principles
///
/// The position record stores a byte offset together with the inode and device of the file it belongs to. On every
/// invocation the identity of the log path is compared to the recorded one:
///
/// * same file: scanning resumes at the recorded offset, or at zero if the file shrank below it (truncation).
/// * different file: the log was rotated. The previous file is searched by identity in the archive directory and its
///   remainder is delivered first, including a final line without a newline. The new file is then read from the
///   start. If the previous file cannot be found, whatever it held past the recorded offset is skipped.
///
/// A trailing line without a newline in the live file is never delivered; it stays unconsumed until completed.
/// Backlogs larger than `ParserConfig::max_read_size` are skipped by jumping to the end of the file.
///
/// ## Limitations
///
/// * Invocations sharing one position record must not run concurrently; nothing locks the record.
/// * Rotation detection relies on inode and device numbers and does not work on filesystems without stable ones.
pub struct FollowParser<S = NoopSink> {
    config: ParserConfig,
    sink: S,
    record_path: Option<PathBuf>,
    /// position reached by the last successful live scan, together with the record it belongs to
    pending: Option<(PositionStore, u64, FileIdentity)>,
}

impl FollowParser<NoopSink> {
    /// Parser that only advances positions without looking at line content
    pub fn new(config: ParserConfig) -> Self {
        Self::with_sink(config, NoopSink)
    }
}

impl<S: LineSink> FollowParser<S> {
    pub fn with_sink(config: ParserConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            record_path: None,
            pending: None,
        }
    }

    /// Use `path` for the position record instead of deriving it from the record name, working directory and user.
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Position and identity reached by the last successful live scan, committed or not
    pub fn pending_position(&self) -> Option<(u64, FileIdentity)> {
        self.pending
            .as_ref()
            .map(|(_, position, identity)| (*position, *identity))
    }

    /// Deliver lines appended to `log_file` since the position stored under `record_name`.
    ///
    /// Returns one `ScanResult` per file read, the rotated-away file first. Errors concerning the live file abort the
    /// invocation without updating the position and without calling `LineSink::finish`.
    pub fn parse(
        &mut self,
        record_name: &str,
        log_file: impl AsRef<Path>,
    ) -> Result<Vec<ScanResult>, FollowParserError> {
        let log_file = log_file.as_ref();
        let store = PositionStore::new(self.record_path_for(record_name));
        let last = store.read().map_err(FollowParserError::LoadPosition)?;

        let current = identity::stat(log_file)?;
        let mut results = Vec::with_capacity(2);

        if !identity::is_rotated(&current, &last.identity) {
            let mut start_pos = last.position;
            if current.size < start_pos {
                if !self.config.silent {
                    info!(
                        path = %log_file.display(),
                        size = current.size,
                        position = start_pos,
                        "log file truncated, reading from the beginning"
                    );
                }
                start_pos = 0;
            }
            results.push(self.scan_live(&store, log_file, start_pos)?);
        } else {
            if !self.config.silent {
                info!(path = %log_file.display(), previous = %last.identity, current = %current, "detected rotation");
            }
            if let Some(result) = self.scan_rotated(log_file, &last.identity, last.position) {
                results.push(result);
            }
            results.push(self.scan_live(&store, log_file, 0)?);
        }

        self.sink.finish(last.idle_duration);
        Ok(results)
    }

    /// Persist the position held in memory. Meant for `no_auto_commit` setups; does nothing before the first
    /// successful `parse`.
    pub fn commit(&self) -> Result<(), FollowParserError> {
        let Some((store, position, identity)) = &self.pending else {
            return Ok(());
        };
        store
            .write(*position, identity)
            .map_err(FollowParserError::Persistence)
    }

    fn record_path_for(&self, record_name: &str) -> PathBuf {
        match &self.record_path {
            Some(path) => path.clone(),
            None => path_utils::record_path(&self.config.work_dir, record_name),
        }
    }

    /// Best effort: locate the previous file and deliver the rest of it. Failures are only logged.
    fn scan_rotated(
        &mut self,
        log_file: &Path,
        previous: &FileIdentity,
        position: u64,
    ) -> Option<ScanResult> {
        let archive_dir = self.config.archive_dir_for(log_file);
        let old_file = match identity::find_by_identity(&archive_dir, previous) {
            Ok(Some(path)) => path,
            Ok(None) => {
                warn!(
                    dir = %archive_dir.display(),
                    identity = %previous,
                    "could not find rotated file, reading new file only"
                );
                return None;
            }
            Err(e) => {
                warn!(dir = %archive_dir.display(), error = %e, "could not search for rotated file");
                return None;
            }
        };

        match self.scan_file(&old_file, position, ScanMode::Archived) {
            Ok((result, _)) => Some(result),
            Err(e) => {
                warn!(path = %old_file.display(), error = %e, "could not read rotated file");
                None
            }
        }
    }

    fn scan_live(
        &mut self,
        store: &PositionStore,
        log_file: &Path,
        start_pos: u64,
    ) -> Result<ScanResult, FollowParserError> {
        let (result, identity) = self.scan_file(log_file, start_pos, ScanMode::Live)?;

        self.pending = Some((store.clone(), result.end_pos, identity));
        if !self.config.no_auto_commit {
            store
                .write(result.end_pos, &identity)
                .map_err(FollowParserError::Persistence)?;
        }
        Ok(result)
    }

    fn scan_file(
        &mut self,
        path: &Path,
        start_pos: u64,
        mode: ScanMode,
    ) -> Result<(ScanResult, FileIdentity), FollowParserError> {
        let open_error = |source| FollowParserError::Open {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(open_error)?;
        let identity = FileIdentity::from_file(&file, path)?;
        let start_pos = self.apply_catch_up_bound(path, start_pos, identity.size);
        if !self.config.silent {
            info!(path = %path.display(), start_pos, size = identity.size, ?mode, "analysis start");
        }
        file.seek(SeekFrom::Start(start_pos)).map_err(open_error)?;

        let mut scanner = LineScanner::new(file, mode, self.config.buffer_limits());
        let scan_error = |source| FollowParserError::Scan {
            path: path.to_path_buf(),
            source,
        };
        while let Some(line) = scanner.next_line().map_err(scan_error)? {
            if let Err(e) = self.sink.parse(line.bytes) {
                warn!(path = %path.display(), error = %e, "failed to parse line");
            }
        }

        let result = ScanResult {
            file_name: path.to_path_buf(),
            size: identity.size,
            start_pos,
            end_pos: start_pos + scanner.consumed(),
            rows: scanner.lines(),
        };
        if !self.config.silent {
            info!(
                path = %path.display(),
                start_pos = result.start_pos,
                end_pos = result.end_pos,
                rows = result.rows,
                "analysis completed"
            );
        }
        Ok((result, identity))
    }

    /// Jump to the end of the file when the unread part exceeds the configured bound.
    fn apply_catch_up_bound(&self, path: &Path, start_pos: u64, size: u64) -> u64 {
        let max_read_size = self.config.effective_max_read_size();
        if size.saturating_sub(start_pos) <= max_read_size {
            return start_pos;
        }
        if !self.config.silent {
            info!(
                path = %path.display(),
                skipped = size - start_pos,
                max_read_size,
                "backlog exceeds read limit, skipping to end of file"
            );
        }
        debug!(path = %path.display(), from = start_pos, to = size, "skipped backlog");
        size
    }
}

/// Read new lines of `log_file` into `sink` with default configuration, keeping the position under `record_name`.
pub fn parse(
    record_name: &str,
    log_file: impl AsRef<Path>,
    sink: impl LineSink,
) -> Result<(), FollowParserError> {
    FollowParser::with_sink(ParserConfig::default(), sink)
        .parse(record_name, log_file)
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write};

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct Collect {
        lines: Vec<Vec<u8>>,
        finished: Option<f64>,
    }

    impl LineSink for Collect {
        fn parse(&mut self, line: &[u8]) -> Result<(), crate::SinkError> {
            self.lines.push(line.to_vec());
            Ok(())
        }

        fn finish(&mut self, idle_duration: f64) {
            self.finished = Some(idle_duration);
        }
    }

    #[fixture]
    fn dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn parser(dir: &TempDir) -> FollowParser<Collect> {
        let config = ParserConfig::default().work_dir(dir.path()).silent(true);
        FollowParser::with_sink(config, Collect::default())
    }

    #[rstest]
    #[case(0, 100, 10, 100)]
    #[case(0, 10, 10, 0)]
    #[case(50, 100, 10, 100)]
    #[case(90, 100, 10, 90)]
    #[case(120, 100, 10, 120)]
    fn catch_up_bound(
        dir: TempDir,
        #[case] start_pos: u64,
        #[case] size: u64,
        #[case] max_read_size: u64,
        #[case] expected: u64,
    ) {
        let config = ParserConfig::default().work_dir(dir.path()).max_read_size(max_read_size);
        let parser = FollowParser::new(config);
        assert_eq!(
            parser.apply_catch_up_bound(Path::new("log"), start_pos, size),
            expected
        );
    }

    #[rstest]
    fn commit_before_parse_is_noop(dir: TempDir) {
        let parser = parser(&dir);
        parser.commit().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn missing_log_file_is_fatal_and_skips_finish(dir: TempDir) {
        let mut parser = parser(&dir);
        let result = parser.parse("pos", dir.path().join("absent"));
        assert!(matches!(result, Err(FollowParserError::Identity(_))));
        assert_eq!(parser.sink().finished, None);
    }

    #[rstest]
    fn explicit_record_path_is_used(dir: TempDir) {
        let log = dir.path().join("log");
        fs::File::create(&log).unwrap().write_all(b"a\n").unwrap();
        let record = dir.path().join("state").join("custom.json");

        let mut parser = parser(&dir).with_record_path(&record);
        parser.parse("ignored", &log).unwrap();

        let stored = PositionStore::new(&record).read().unwrap();
        assert_eq!(stored.position, 2);
        assert_eq!(parser.pending_position().map(|(pos, _)| pos), Some(2));
    }

    #[rstest]
    fn commit_after_failed_run_writes_to_record_of_last_successful_run(dir: TempDir) {
        let log = dir.path().join("log");
        fs::File::create(&log).unwrap().write_all(b"a\n").unwrap();
        let mut parser = FollowParser::with_sink(
            ParserConfig::default()
                .work_dir(dir.path())
                .silent(true)
                .no_auto_commit(true),
            Collect::default(),
        );

        parser.parse("first", &log).unwrap();
        assert!(parser.parse("second", dir.path().join("absent")).is_err());
        parser.commit().unwrap();

        let first = PositionStore::new(path_utils::record_path(dir.path(), "first"));
        let second = PositionStore::new(path_utils::record_path(dir.path(), "second"));
        assert_eq!(first.read().unwrap().position, 2);
        assert!(!second.path().exists());
    }

    #[rstest]
    fn malformed_record_is_fatal(dir: TempDir) {
        let log = dir.path().join("log");
        fs::File::create(&log).unwrap().write_all(b"a\n").unwrap();
        let record = dir.path().join("record");
        fs::write(&record, b"not json").unwrap();

        let mut parser = parser(&dir).with_record_path(&record);
        let result = parser.parse("pos", &log);
        assert!(matches!(result, Err(FollowParserError::LoadPosition(_))));
        assert!(parser.sink().lines.is_empty());
    }
}
