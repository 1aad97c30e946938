//! The callback table handed to the engine.
//!
//! A [`DispatchTable`] has one optional entry per [`Operation`]. Entries are
//! built once by [`DispatchBuilder`] from what the filesystem and its handle
//! classes declare, already wrapped for error translation, and never change
//! afterwards. Calling an absent entry answers `ENOSYS`.

pub mod builder;
pub mod errno;
pub mod proxy;

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

pub use builder::DispatchBuilder;
pub use errno::{Fault, OpError, OpResult, Reply};
pub use proxy::{DirHandle, FileHandle, Handle, Open, Opened};

use crate::operation::{Operation, OperationSet};
use crate::types::{Direntry, Flock, Stat, StatVfs, Xattr};

macro_rules! dispatch_table {
    ($(
        $(#[$meta:meta])*
        $field:ident / $variant:ident ($($arg:ident: $ty:ty),*) -> $ret:ty;
    )*) => {
        /// Error-wrapped callbacks, one optional entry per operation.
        pub struct DispatchTable {
            $(pub(crate) $field: Option<Box<dyn Fn($($ty),*) -> Reply<$ret> + Send + Sync>>,)*
        }

        impl DispatchTable {
            pub(crate) fn empty() -> Self {
                Self {
                    $($field: None,)*
                }
            }

            /// The operations that have an entry.
            pub fn operations(&self) -> OperationSet {
                let mut set = OperationSet::EMPTY;
                $(if self.$field.is_some() {
                    set.insert(Operation::$variant);
                })*
                set
            }

            $(
                $(#[$meta])*
                pub fn $field(&self, $($arg: $ty),*) -> Reply<$ret> {
                    match &self.$field {
                        Some(entry) => entry($($arg),*),
                        None => Err(Fault::Errno(libc::ENOSYS)),
                    }
                }
            )*
        }
    };
}

dispatch_table! {
    getattr / Getattr (path: &Path) -> Stat;
    readlink / Readlink (path: &Path) -> PathBuf;
    readdir / Readdir (path: &Path, offset: i64, fh: Option<&Handle>) -> Vec<Direntry>;
    mknod / Mknod (path: &Path, mode: u32, rdev: u32) -> ();
    mkdir / Mkdir (path: &Path, mode: u32) -> ();
    unlink / Unlink (path: &Path) -> ();
    rmdir / Rmdir (path: &Path) -> ();
    symlink / Symlink (target: &Path, link: &Path) -> ();
    rename / Rename (from: &Path, to: &Path) -> ();
    link / Link (target: &Path, link: &Path) -> ();
    chmod / Chmod (path: &Path, mode: u32) -> ();
    chown / Chown (path: &Path, uid: Option<u32>, gid: Option<u32>) -> ();
    truncate / Truncate (path: &Path, size: u64) -> ();
    utime / Utime (path: &Path, atime: i64, mtime: i64) -> ();
    /// Opens a file. The reply says whether the engine keeps the handle.
    open / Open (path: &Path, flags: i32) -> Opened;
    read / Read (path: &Path, size: u32, offset: u64, fh: Option<&Handle>) -> Vec<u8>;
    write / Write (path: &Path, data: &[u8], offset: u64, fh: Option<&Handle>) -> u32;
    release / Release (path: &Path, flags: i32, fh: Option<&Handle>) -> ();
    statfs / Statfs () -> StatVfs;
    fsync / Fsync (path: &Path, datasync: bool, fh: Option<&Handle>) -> ();
    /// Creates and opens a file. Adapted like `open`.
    create / Create (path: &Path, flags: i32, mode: u32) -> Opened;
    opendir / Opendir (path: &Path) -> Option<Handle>;
    releasedir / Releasedir (path: &Path, fh: Option<&Handle>) -> ();
    fsyncdir / Fsyncdir (path: &Path, datasync: bool, fh: Option<&Handle>) -> ();
    flush / Flush (path: &Path, fh: Option<&Handle>) -> ();
    fgetattr / Fgetattr (path: &Path, fh: Option<&Handle>) -> Stat;
    ftruncate / Ftruncate (path: &Path, size: u64, fh: Option<&Handle>) -> ();
    getxattr / Getxattr (path: &Path, name: &OsStr, size: u32) -> Xattr;
    listxattr / Listxattr (path: &Path, size: u32) -> Xattr;
    setxattr / Setxattr (path: &Path, name: &OsStr, value: &[u8], flags: i32) -> ();
    removexattr / Removexattr (path: &Path, name: &OsStr) -> ();
    access / Access (path: &Path, mask: i32) -> ();
    lock / Lock (path: &Path, cmd: i32, lock: Flock, fh: Option<&Handle>) -> Flock;
    /// Sets file times from their raw second and nanosecond components.
    utimens / Utimens (path: &Path, acc_sec: i64, acc_nsec: i64, mod_sec: i64, mod_nsec: i64) -> ();
    bmap / Bmap (path: &Path, blocksize: u32, idx: u64) -> u64;
    fsinit / Fsinit () -> ();
    fsdestroy / Fsdestroy () -> ();
    ioctl / Ioctl (path: &Path, cmd: u32, data: &[u8], out_size: u32) -> Vec<u8>;
    poll / Poll (path: &Path, events: u32, fh: Option<&Handle>) -> u32;
}

impl DispatchTable {
    pub fn contains(&self, op: Operation) -> bool {
        self.operations().contains(op)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("operations", &self.operations())
            .finish()
    }
}
