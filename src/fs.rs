//! Abstraction over the filesystem, so scans can run against an in-memory
//! file tree in tests.

use crate::graph::TimeStamp;
use rustc_hash::FxHashMap;
use std::io::ErrorKind;
use std::sync::Mutex;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(TimeStamp),
}

impl MTime {
    /// The ninja-style timestamp: 0 for a missing file.
    pub fn timestamp(self) -> TimeStamp {
        match self {
            MTime::Missing => 0,
            MTime::Stamp(t) => t,
        }
    }
}

/// Sync so that stat calls can be fanned out across threads.
pub trait FileSystem: Sync {
    /// stat() an on-disk path, producing its MTime.  A missing file, or one
    /// whose parent is not a directory, is MTime::Missing rather than an error.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;
    fn read_file(&self, path: &str) -> std::io::Result<Vec<u8>>;
    fn write_file(&self, path: &str, contents: &[u8]) -> std::io::Result<()>;
    /// Create a single directory; an existing directory is not an error.
    fn make_dir(&self, path: &str) -> std::io::Result<()>;
    /// Returns false if the file was already absent.
    fn remove_file(&self, path: &str) -> std::io::Result<bool>;
}

/// Create all the parent directories of `path`.
pub fn make_dirs(fs: &dyn FileSystem, path: &str) -> std::io::Result<()> {
    let dir = match path.rfind('/') {
        Some(0) | None => return Ok(()),
        Some(ofs) => &path[..ofs],
    };
    if fs.stat(dir)? != MTime::Missing {
        return Ok(());
    }
    make_dirs(fs, dir)?;
    fs.make_dir(dir)
}

#[derive(Default)]
pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

#[cfg(unix)]
fn mtime_from_metadata(meta: &std::fs::Metadata) -> TimeStamp {
    use std::os::unix::fs::MetadataExt;
    let t = meta.mtime() * 1_000_000_000 + meta.mtime_nsec();
    // 0 is reserved for "missing"; a file at the epoch still exists.
    if t == 0 {
        1
    } else {
        t
    }
}

#[cfg(not(unix))]
fn mtime_from_metadata(meta: &std::fs::Metadata) -> TimeStamp {
    let t = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as TimeStamp)
        .unwrap_or(0);
    t.max(1)
}

#[cfg(unix)]
fn is_not_a_directory(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOTDIR)
}

#[cfg(not(unix))]
fn is_not_a_directory(_err: &std::io::Error) -> bool {
    false
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(MTime::Stamp(mtime_from_metadata(&meta))),
            Err(err) if err.kind() == ErrorKind::NotFound || is_not_a_directory(&err) => {
                Ok(MTime::Missing)
            }
            Err(err) => Err(err),
        }
    }

    fn read_file(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_file(&self, path: &str, contents: &[u8]) -> std::io::Result<()> {
        std::fs::write(path, contents)
    }

    fn make_dir(&self, path: &str) -> std::io::Result<()> {
        match std::fs::create_dir(path) {
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            r => r,
        }
    }

    fn remove_file(&self, path: &str) -> std::io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

struct VirtualFile {
    mtime: TimeStamp,
    contents: Vec<u8>,
}

#[derive(Default)]
struct VirtualState {
    now: TimeStamp,
    files: FxHashMap<String, VirtualFile>,
    stat_errors: FxHashMap<String, String>,
    directories_made: Vec<String>,
    files_read: Vec<String>,
    files_removed: Vec<String>,
}

/// An in-memory FileSystem with a manual clock, for tests.
pub struct VirtualFileSystem {
    state: Mutex<VirtualState>,
}

impl Default for VirtualFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFileSystem {
    pub fn new() -> Self {
        VirtualFileSystem {
            state: Mutex::new(VirtualState {
                now: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<VirtualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advance the clock, returning the new time.
    pub fn tick(&self) -> TimeStamp {
        let mut state = self.lock();
        state.now += 1;
        state.now
    }

    pub fn now(&self) -> TimeStamp {
        self.lock().now
    }

    /// Create or overwrite a file, stamping it with the current time.
    pub fn create(&self, path: &str, contents: &str) {
        let mut state = self.lock();
        let mtime = state.now;
        state.files.insert(
            path.to_owned(),
            VirtualFile {
                mtime,
                contents: contents.as_bytes().to_vec(),
            },
        );
    }

    /// Stamp a file with the current time, creating it empty if needed.
    pub fn touch(&self, path: &str) {
        let now = self.now();
        self.set_mtime(path, now);
    }

    /// Set a file's mtime directly, creating it empty if needed.
    pub fn set_mtime(&self, path: &str, mtime: TimeStamp) {
        let mut state = self.lock();
        state
            .files
            .entry(path.to_owned())
            .or_insert_with(|| VirtualFile {
                mtime,
                contents: Vec::new(),
            })
            .mtime = mtime;
    }

    /// Make stat() of `path` fail with `message`.
    pub fn fail_stat(&self, path: &str, message: &str) {
        self.lock()
            .stat_errors
            .insert(path.to_owned(), message.to_owned());
    }

    pub fn files_read(&self) -> Vec<String> {
        self.lock().files_read.clone()
    }

    pub fn files_removed(&self) -> Vec<String> {
        self.lock().files_removed.clone()
    }

    pub fn directories_made(&self) -> Vec<String> {
        self.lock().directories_made.clone()
    }
}

impl FileSystem for VirtualFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        let state = self.lock();
        if let Some(msg) = state.stat_errors.get(path) {
            return Err(std::io::Error::new(ErrorKind::Other, msg.clone()));
        }
        Ok(match state.files.get(path) {
            Some(file) => MTime::Stamp(file.mtime),
            None => MTime::Missing,
        })
    }

    fn read_file(&self, path: &str) -> std::io::Result<Vec<u8>> {
        let mut state = self.lock();
        state.files_read.push(path.to_owned());
        match state.files.get(path) {
            Some(file) => Ok(file.contents.clone()),
            None => Err(std::io::Error::new(ErrorKind::NotFound, "No such file or directory")),
        }
    }

    fn write_file(&self, path: &str, contents: &[u8]) -> std::io::Result<()> {
        let mut state = self.lock();
        let mtime = state.now;
        state.files.insert(
            path.to_owned(),
            VirtualFile {
                mtime,
                contents: contents.to_vec(),
            },
        );
        Ok(())
    }

    fn make_dir(&self, path: &str) -> std::io::Result<()> {
        self.lock().directories_made.push(path.to_owned());
        Ok(())
    }

    fn remove_file(&self, path: &str) -> std::io::Result<bool> {
        let mut state = self.lock();
        if state.files.remove(path).is_some() {
            state.files_removed.push(path.to_owned());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
