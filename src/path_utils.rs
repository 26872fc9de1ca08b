use std::path::{Path, PathBuf};

/// Build path of the position record for logical name `name`, owned by the effective user of this process
///
/// ## Example
///
/// ```rust
/// use logfollow::path_utils::{current_user_id, record_path};
/// let path = record_path("/var/tmp", "nginx-access");
/// assert_eq!(path.file_name().unwrap(), format!("nginx-access-{}", current_user_id()).as_str());
/// ```
pub fn record_path(work_dir: impl AsRef<Path>, name: &str) -> PathBuf {
    record_path_for_user(work_dir, name, current_user_id())
}

/// Same as `record_path` with an explicit user id
///
/// ## Example
///
/// ```rust
/// use std::path::PathBuf;
/// let path = logfollow::path_utils::record_path_for_user("/var/tmp", "nginx-access", 1000);
/// assert_eq!(path, PathBuf::from("/var/tmp/nginx-access-1000"));
/// ```
pub fn record_path_for_user(work_dir: impl AsRef<Path>, name: &str, uid: u32) -> PathBuf {
    work_dir.as_ref().join(format!("{name}-{uid}"))
}

/// Effective user id of the current process, `0` where the platform has no such notion
#[cfg(unix)]
pub fn current_user_id() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
pub fn current_user_id() -> u32 {
    0
}

/// Add extension to existing PathBuf
///
/// ## Example
///
/// ```rust
/// use std::path::PathBuf;
/// let original_path = "/tmp/access-1000".into();
/// let temporary = logfollow::path_utils::append_extension(original_path, "tmp");
/// assert_eq!(temporary, PathBuf::from("/tmp/access-1000.tmp"));
/// ```
pub fn append_extension(path: PathBuf, ext: impl AsRef<std::ffi::OsStr>) -> PathBuf {
    let mut os_string: std::ffi::OsString = path.into();
    os_string.push(".");
    os_string.push(ext.as_ref());
    os_string.into()
}
