//! Plain data carried across the dispatch table.
//!
//! These mirror the C structures the kernel protocol speaks in (`struct
//! stat`, `struct statvfs`, `struct flock`, `struct timespec`), kept as
//! simple value types so implementations can fill them field by field.

use std::ffi::OsString;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// File attributes (cf. `struct stat`).
///
/// `st_mode` carries both the file type bits (`S_IFREG`, `S_IFDIR`, ...) and
/// the permission bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub st_mode: u32,
    pub st_ino: u64,
    pub st_dev: u64,
    pub st_nlink: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: u64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}

impl Stat {
    /// A directory with the given permission bits and link count 2.
    pub fn directory(perm: u32) -> Self {
        Self {
            st_mode: libc::S_IFDIR as u32 | (perm & 0o7777),
            st_nlink: 2,
            ..Self::default()
        }
    }

    /// A regular file with the given permission bits and size.
    pub fn regular(perm: u32, size: u64) -> Self {
        Self {
            st_mode: libc::S_IFREG as u32 | (perm & 0o7777),
            st_nlink: 1,
            st_size: size,
            ..Self::default()
        }
    }

    /// The file type bits of `st_mode`.
    pub fn file_type(&self) -> u32 {
        self.st_mode & libc::S_IFMT as u32
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    /// The permission bits of `st_mode`.
    pub fn permissions(&self) -> u32 {
        self.st_mode & 0o7777
    }
}

#[cfg(unix)]
impl From<&std::fs::Metadata> for Stat {
    fn from(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            st_mode: meta.mode(),
            st_ino: meta.ino(),
            st_dev: meta.dev(),
            st_nlink: meta.nlink() as u32,
            st_uid: meta.uid(),
            st_gid: meta.gid(),
            st_size: meta.size(),
            st_atime: meta.atime(),
            st_mtime: meta.mtime(),
            st_ctime: meta.ctime(),
        }
    }
}

/// Filesystem statistics (cf. `struct statvfs`). All fields default to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatVfs {
    /// Preferred size of file blocks, in bytes.
    pub f_bsize: u64,
    /// Fundamental size of file blocks, in bytes.
    pub f_frsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_files: u64,
    pub f_ffree: u64,
    pub f_favail: u64,
    pub f_flag: u64,
    pub f_namemax: u64,
}

/// One directory entry yielded by `readdir`.
///
/// Only `name` is required. `offset` is a bookmark for stateful directory
/// reading; when every entry reports 0 the engine numbers them itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Direntry {
    pub name: OsString,
    pub offset: i64,
    /// One of the `S_IF*` type specifiers, or 0 if unknown.
    pub kind: u32,
    pub ino: u64,
}

impl Direntry {
    pub fn new(name: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            offset: 0,
            kind: 0,
            ino: 0,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: u32) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// A POSIX record lock (cf. `struct flock`). `l_whence` is not used by the
/// kernel protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flock {
    pub l_type: i32,
    pub l_start: u64,
    pub l_len: u64,
    pub l_pid: u32,
}

/// A point in time split into seconds and nanoseconds (cf. `struct
/// timespec`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl Timespec {
    pub fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }

    pub fn to_system_time(self) -> SystemTime {
        let nanos = Duration::from_nanos(self.tv_nsec.clamp(0, 999_999_999) as u64);
        if self.tv_sec >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.tv_sec as u64) + nanos
        } else {
            UNIX_EPOCH - Duration::from_secs(self.tv_sec.unsigned_abs()) + nanos
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, i64::from(d.subsec_nanos())),
            Err(e) => {
                let d = e.duration();
                // Normalize so that tv_nsec stays in [0, 1e9).
                let mut sec = -(d.as_secs() as i64);
                let mut nsec = i64::from(d.subsec_nanos());
                if nsec > 0 {
                    sec -= 1;
                    nsec = 1_000_000_000 - nsec;
                }
                Self::new(sec, nsec)
            }
        }
    }
}

/// Per-open-file flags returned from `open`/`create`.
///
/// Returning a bare `FileInfo` is the disposable marker: the engine applies
/// the flags but keeps no handle for the open file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Keep the kernel page cache across opens of this file.
    pub keep_cache: bool,
    /// Bypass the page cache for this open file.
    pub direct_io: bool,
}

/// Reply to `getxattr`/`listxattr`.
///
/// The kernel first asks with `size == 0` to learn how large a buffer it
/// needs; implementations answer that probe with [`Xattr::Size`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Xattr {
    Size(u32),
    Data(Vec<u8>),
}

impl Xattr {
    /// Answers a `listxattr` request from a list of attribute names, joining
    /// them NUL-terminated as the kernel expects.
    pub fn from_names<I, S>(names: I, size: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut buf = Vec::new();
        for name in names {
            buf.extend_from_slice(name.as_ref());
            buf.push(0);
        }
        if size == 0 {
            Xattr::Size(buf.len() as u32)
        } else {
            Xattr::Data(buf)
        }
    }

    /// Answers a `getxattr` request for a single value.
    pub fn from_value(value: impl Into<Vec<u8>>, size: u32) -> Self {
        let value = value.into();
        if size == 0 {
            Xattr::Size(value.len() as u32)
        } else {
            Xattr::Data(value)
        }
    }
}
