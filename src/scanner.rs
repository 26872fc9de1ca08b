use std::io::{self, Read};

use thiserror::Error;

/// How the end of the stream is treated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// The file is still being appended to. A trailing run without a newline is left unconsumed so that a later
    /// scan picks it up once it is complete.
    Live,
    /// The file was rotated away and will not grow. A trailing run without a newline is emitted as the last line.
    Archived,
}

/// Sizes of the line buffer: it starts at `start_size` and doubles up to `max_size`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferLimits {
    pub start_size: usize,
    pub max_size: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            start_size: 32_000,
            max_size: 5_000_000,
        }
    }
}

/// Possible errors that could happen while scanning
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("while reading from underlying file")]
    IO(#[from] io::Error),

    #[error("line does not fit into {max_size} byte buffer")]
    TokenTooLong { max_size: usize },
}

/// A single line produced by `LineScanner`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Line<'a> {
    /// line content without the newline (and without a `\r` preceding it)
    pub bytes: &'a [u8],
    /// number of bytes this line occupied in the stream, delimiter included
    pub consumed: u64,
}

/// Splits a byte stream into newline-delimited lines using one growable buffer.
///
/// ## Usage
///
/// Lines borrow from the scanner's buffer, so they are pulled one at a time with `next_line`:
///
/// ```rust
/// # use std::io::Cursor;
/// # use logfollow::{BufferLimits, LineScanner, ScanMode};
/// let mut scanner = LineScanner::new(Cursor::new("first\nsecond\nthi"), ScanMode::Live, BufferLimits::default());
/// let mut lines = vec![];
/// while let Some(line) = scanner.next_line()? {
///     lines.push(String::from_utf8_lossy(line.bytes).into_owned());
/// }
/// assert_eq!(lines, vec!["first", "second"]);
/// // the incomplete "thi" is not consumed in live mode
/// assert_eq!(scanner.consumed(), 13);
/// # Ok::<(), logfollow::ScanError>(())
/// ```
pub struct LineScanner<R> {
    reader: R,
    mode: ScanMode,
    max_size: usize,
    buf: Vec<u8>,
    /// pending bytes are `buf[start..end]`
    start: usize,
    end: usize,
    /// `buf[start..checked]` is known to contain no newline
    checked: usize,
    eof: bool,
    consumed: u64,
    lines: usize,
}

impl<R: Read> LineScanner<R> {
    /// Create a scanner reading from the current position of `reader`.
    pub fn new(reader: R, mode: ScanMode, limits: BufferLimits) -> Self {
        let max_size = limits.max_size.max(1);
        let start_size = limits.start_size.clamp(1, max_size);
        Self {
            reader,
            mode,
            max_size,
            buf: vec![0; start_size],
            start: 0,
            end: 0,
            checked: 0,
            eof: false,
            consumed: 0,
            lines: 0,
        }
    }

    /// Produce the next line, or `None` once the stream is exhausted.
    pub fn next_line(&mut self) -> Result<Option<Line<'_>>, ScanError> {
        let Some((from, to, consumed)) = self.advance()? else {
            return Ok(None);
        };
        Ok(Some(Line {
            bytes: drop_cr(&self.buf[from..to]),
            consumed,
        }))
    }

    /// Bytes consumed so far, counting emitted lines and their delimiters only.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Number of lines emitted so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Current size of the internal buffer.
    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn advance(&mut self) -> Result<Option<(usize, usize, u64)>, ScanError> {
        loop {
            let search_from = self.checked.max(self.start);
            if let Some(idx) = self.buf[search_from..self.end]
                .iter()
                .position(|&b| b == b'\n')
            {
                let from = self.start;
                let to = search_from + idx;
                return Ok(Some(self.take(from, to, to + 1)));
            }
            self.checked = self.end;

            if self.eof {
                if self.mode == ScanMode::Archived && self.start < self.end {
                    let (from, to) = (self.start, self.end);
                    return Ok(Some(self.take(from, to, to)));
                }
                return Ok(None);
            }
            self.fill()?;
        }
    }

    fn take(&mut self, from: usize, to: usize, next_start: usize) -> (usize, usize, u64) {
        let consumed = (next_start - from) as u64;
        self.start = next_start;
        self.checked = next_start;
        self.consumed += consumed;
        self.lines += 1;
        (from, to, consumed)
    }

    /// Read more data, compacting or growing the buffer first when there is no room left.
    fn fill(&mut self) -> Result<(), ScanError> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.checked -= self.start;
            self.start = 0;
        }
        if self.end == self.buf.len() {
            if self.buf.len() >= self.max_size {
                return Err(ScanError::TokenTooLong {
                    max_size: self.max_size,
                });
            }
            let new_size = self.buf.len().saturating_mul(2).min(self.max_size);
            self.buf.resize(new_size, 0);
        }
        loop {
            match self.reader.read(&mut self.buf[self.end..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.end += n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn drop_cr(line: &[u8]) -> &[u8] {
    match line {
        [rest @ .., b'\r'] => rest,
        _ => line,
    }
}
