use std::{
    fmt,
    fs::{self, File, Metadata},
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Physical fingerprint of a file: inode and device numbers plus the size observed at stat time.
///
/// Inode and device survive renames but change when a file is deleted and recreated, which makes them the
/// signal for log rotation. `size` is informational and does not take part in equality.
///
/// An identity with a zero inode or a zero device is a sentinel for "nothing known yet", see `FileIdentity::zero`.
#[derive(Copy, Clone, Debug, Default)]
pub struct FileIdentity {
    pub inode: u64,
    pub device: u64,
    pub size: u64,
}

/// Possible errors that could happen while fingerprinting a file
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("while reading metadata of {path}")]
    IO {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("platform cannot report a durable identity for {0}")]
    Unsupported(PathBuf),
}

impl FileIdentity {
    /// Identity used when no prior state exists.
    pub const fn zero() -> Self {
        Self {
            inode: 0,
            device: 0,
            size: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.inode == 0 || self.device == 0
    }

    /// Fingerprint an already opened file. Size is read from the same handle, so it describes exactly the
    /// file that will be scanned even if the path gets replaced in the meantime.
    pub fn from_file(file: &File, path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let metadata = file.metadata().map_err(|source| IdentityError::IO {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        from_metadata(&metadata, path.as_ref())
    }

    /// Same physical file, ignoring size.
    pub fn same_file(&self, other: &FileIdentity) -> bool {
        self.inode == other.inode && self.device == other.device
    }
}

impl PartialEq for FileIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.same_file(other)
    }
}

impl Eq for FileIdentity {}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.inode)
    }
}

/// Ask the filesystem for metadata and return identity of the object specified by `path`
pub fn stat(path: impl AsRef<Path>) -> Result<FileIdentity, IdentityError> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|source| IdentityError::IO {
        path: path.to_path_buf(),
        source,
    })?;
    from_metadata(&metadata, path)
}

#[cfg(unix)]
fn from_metadata(metadata: &Metadata, _path: &Path) -> Result<FileIdentity, IdentityError> {
    use std::os::unix::fs::MetadataExt;

    Ok(FileIdentity {
        inode: metadata.ino(),
        device: metadata.dev(),
        size: metadata.len(),
    })
}

#[cfg(not(unix))]
fn from_metadata(_metadata: &Metadata, path: &Path) -> Result<FileIdentity, IdentityError> {
    Err(IdentityError::Unsupported(path.to_path_buf()))
}

/// Decide whether `current` is a different physical file than the one recorded as `last`.
///
/// A zero `last` means no identity was ever recorded and is reported as not rotated.
pub fn is_rotated(current: &FileIdentity, last: &FileIdentity) -> bool {
    !(last.is_zero() || current.same_file(last))
}

/// Search `directory` for a non-directory entry whose identity matches `identity`.
///
/// Entries that cannot be stat'd are skipped. `Ok(None)` is the ordinary outcome when the rotated file was removed
/// or moved elsewhere; an error is only returned when the directory itself cannot be listed.
pub fn find_by_identity(
    directory: impl AsRef<Path>,
    identity: &FileIdentity,
) -> io::Result<Option<PathBuf>> {
    for entry in fs::read_dir(directory)? {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => continue,
            Ok(_) => {}
            Err(_) => continue,
        }
        if let Ok(candidate) = stat(&path) {
            if candidate.same_file(identity) {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}
