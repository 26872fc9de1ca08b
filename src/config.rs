use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::scanner::BufferLimits;

/// Catch-up bound used when none is configured
pub const DEFAULT_MAX_READ_SIZE: u64 = 500_000_000;

/// Configuration of a `FollowParser`, fixed for the duration of an invocation.
///
/// Every field has a default, so partial configurations can be deserialized:
///
/// ```rust
/// # use logfollow::ParserConfig;
/// let config: ParserConfig = serde_json::from_str(r#"{"max_read_size": 1024, "silent": true}"#)?;
/// assert_eq!(config.max_read_size, 1024);
/// assert_eq!(config.max_buf_size, 5_000_000);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// directory holding position records
    pub work_dir: PathBuf,
    /// backlog larger than this many bytes is skipped instead of scanned
    pub max_read_size: u64,
    pub start_buf_size: usize,
    pub max_buf_size: usize,
    /// where to look for the rotated-away file, defaults to the log file's directory
    pub archive_dir: Option<PathBuf>,
    /// suppress informational diagnostics
    pub silent: bool,
    /// keep new positions in memory until `FollowParser::commit` is called
    pub no_auto_commit: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        let limits = BufferLimits::default();
        Self {
            work_dir: std::env::temp_dir(),
            max_read_size: DEFAULT_MAX_READ_SIZE,
            start_buf_size: limits.start_size,
            max_buf_size: limits.max_size,
            archive_dir: None,
            silent: false,
            no_auto_commit: false,
        }
    }
}

impl ParserConfig {
    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn max_read_size(mut self, max_read_size: u64) -> Self {
        self.max_read_size = max_read_size;
        self
    }

    pub fn buffer_sizes(mut self, start_buf_size: usize, max_buf_size: usize) -> Self {
        self.start_buf_size = start_buf_size;
        self.max_buf_size = max_buf_size;
        self
    }

    pub fn archive_dir(mut self, archive_dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(archive_dir.into());
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn no_auto_commit(mut self, no_auto_commit: bool) -> Self {
        self.no_auto_commit = no_auto_commit;
        self
    }

    /// Catch-up bound with zero meaning "use the default".
    pub fn effective_max_read_size(&self) -> u64 {
        if self.max_read_size == 0 {
            DEFAULT_MAX_READ_SIZE
        } else {
            self.max_read_size
        }
    }

    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            start_size: self.start_buf_size,
            max_size: self.max_buf_size,
        }
    }

    /// Directory searched for the rotated file of `log_file`.
    pub fn archive_dir_for(&self, log_file: &Path) -> PathBuf {
        if let Some(dir) = &self.archive_dir {
            return dir.clone();
        }
        match log_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ParserConfig::default();
        assert_eq!(config.work_dir, std::env::temp_dir());
        assert_eq!(config.max_read_size, 500_000_000);
        assert_eq!(config.start_buf_size, 32_000);
        assert_eq!(config.max_buf_size, 5_000_000);
        assert_eq!(config.archive_dir, None);
        assert!(!config.silent);
        assert!(!config.no_auto_commit);
    }

    #[test]
    fn zero_read_size_falls_back_to_default() {
        let config = ParserConfig::default().max_read_size(0);
        assert_eq!(config.effective_max_read_size(), DEFAULT_MAX_READ_SIZE);
    }

    #[rstest]
    #[case(None, "/var/log/app.log", "/var/log")]
    #[case(None, "app.log", ".")]
    #[case(Some("/archive"), "/var/log/app.log", "/archive")]
    fn archive_dir_resolution(
        #[case] configured: Option<&str>,
        #[case] log_file: &str,
        #[case] expected: &str,
    ) {
        let mut config = ParserConfig::default();
        if let Some(dir) = configured {
            config = config.archive_dir(dir);
        }
        assert_eq!(
            config.archive_dir_for(Path::new(log_file)),
            PathBuf::from(expected)
        );
    }

    #[test]
    fn deserializes_with_defaults_for_missing_fields() {
        let config: ParserConfig =
            serde_json::from_str(r#"{"work_dir": "/state", "no_auto_commit": true}"#).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/state"));
        assert!(config.no_auto_commit);
        assert_eq!(config.start_buf_size, 32_000);
    }
}
