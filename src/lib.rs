//! # Logfollow
//!
//! Logfollow is a library for incremental reading of growing log files across repeated, independent runs, similar
//! to the mechanisms used in Filebeat, fluentd's `pos_file` and other software alike. Each run delivers only the lines
//! appended since the previous one, and log rotation (rename and recreate) is followed without losing the tail of
//! the rotated file.
//!
//! * `FollowParser` that ties everything together: it loads the last position, detects rotation and truncation, feeds
//!   new lines to a `LineSink` and persists the new position.
//!
//! ```rust no_run
//! # use logfollow::{FollowParser, ParserConfig};
//! // running this repeatedly only ever reports lines appended since the previous run
//! let config = ParserConfig::default().work_dir("/var/lib/myagent");
//! let mut parser = FollowParser::new(config);
//! let segments = parser.parse("syslog", "/var/log/syslog")?;
//! for segment in segments {
//!     println!("{} new lines in {}", segment.rows, segment.file_name.display());
//! }
//! # Ok::<(), logfollow::FollowParserError>(())
//! ```
//!
//! * `LineScanner` that splits a byte stream into lines with a bounded, growable buffer and knows whether a trailing
//!   incomplete line may still grow.
//!
//! ```rust
//! # use std::io::Cursor;
//! # use logfollow::{BufferLimits, LineScanner, ScanMode};
//! let mut scanner = LineScanner::new(Cursor::new("done\npartial"), ScanMode::Archived, BufferLimits::default());
//! assert_eq!(scanner.next_line()?.unwrap().bytes, b"done");
//! // archived files will not grow, so the incomplete line is delivered too
//! assert_eq!(scanner.next_line()?.unwrap().bytes, b"partial");
//! assert!(scanner.next_line()?.is_none());
//! # Ok::<(), logfollow::ScanError>(())
//! ```
//!
//! * `PositionStore` that durably keeps `{offset, time, inode, device}` as a small JSON record, and the `identity`
//!   module that fingerprints files and finds a rotated file again by its inode.
//!
//! ```rust no_run
//! # use logfollow::{identity, PositionStore};
//! let store = PositionStore::new("/var/lib/myagent/syslog-0");
//! let last = store.read()?;
//! let current = identity::stat("/var/log/syslog")?;
//! if identity::is_rotated(&current, &last.identity) {
//!     println!("rotated {} seconds ago at the latest", last.idle_duration);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!

mod config;
mod follow_parser;
pub mod identity;
pub mod path_utils;
mod position;
mod scanner;
mod sink;

pub use config::{ParserConfig, DEFAULT_MAX_READ_SIZE};
pub use follow_parser::{parse, FollowParser, FollowParserError, ScanResult};
pub use identity::{FileIdentity, IdentityError};
pub use position::{LoadedPosition, PositionRecord, PositionStore, PositionStoreError, RetryPolicy};
pub use scanner::{BufferLimits, Line, LineScanner, ScanError, ScanMode};
pub use sink::{LineSink, NoopSink, SinkError};
