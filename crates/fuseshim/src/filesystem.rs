//! The path-based filesystem interface implementations provide.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::dispatch::errno::{OpResult, enosys};
use crate::dispatch::proxy::{Handle, Open};
use crate::operation::OperationSet;
use crate::types::{Direntry, Flock, Stat, StatVfs, Timespec, Xattr};

/// A userspace filesystem.
///
/// Every operation has a default answering `ENOSYS`. Which ones the engine
/// actually sees is decided by [`operations`](Filesystem::operations): the
/// dispatch table binds exactly the declared set, once, when it is built.
///
/// Operations that act on an open file take the value returned by `open`,
/// `create` or `opendir` as `fh`, when that value was retained. Handle
/// classes registered with the dispatch builder take over those operations
/// entirely.
///
/// Implementations must be safe to call from several threads at once unless
/// the service runs single-threaded.
#[allow(unused_variables)]
pub trait Filesystem: Send + Sync + 'static {
    /// The operations this filesystem implements.
    fn operations(&self) -> OperationSet;

    fn getattr(&self, path: &Path) -> OpResult<Stat> {
        enosys()
    }

    fn readlink(&self, path: &Path) -> OpResult<PathBuf> {
        enosys()
    }

    /// Lists a directory. `offset` is the offset of the last entry the
    /// kernel already has, as reported in [`Direntry::offset`].
    fn readdir(&self, path: &Path, offset: i64, fh: Option<&Handle>) -> OpResult<Vec<Direntry>> {
        enosys()
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> OpResult<()> {
        enosys()
    }

    fn mkdir(&self, path: &Path, mode: u32) -> OpResult<()> {
        enosys()
    }

    fn unlink(&self, path: &Path) -> OpResult<()> {
        enosys()
    }

    fn rmdir(&self, path: &Path) -> OpResult<()> {
        enosys()
    }

    /// Creates `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> OpResult<()> {
        enosys()
    }

    fn rename(&self, from: &Path, to: &Path) -> OpResult<()> {
        enosys()
    }

    /// Creates the hard link `link` to `target`.
    fn link(&self, target: &Path, link: &Path) -> OpResult<()> {
        enosys()
    }

    fn chmod(&self, path: &Path, mode: u32) -> OpResult<()> {
        enosys()
    }

    /// `None` leaves the respective id unchanged.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> OpResult<()> {
        enosys()
    }

    fn truncate(&self, path: &Path, size: u64) -> OpResult<()> {
        enosys()
    }

    /// Sets access and modification times, in whole seconds.
    fn utime(&self, path: &Path, atime: i64, mtime: i64) -> OpResult<()> {
        enosys()
    }

    fn open(&self, path: &Path, flags: i32) -> OpResult<Open> {
        enosys()
    }

    fn read(&self, path: &Path, size: u32, offset: u64, fh: Option<&Handle>) -> OpResult<Vec<u8>> {
        enosys()
    }

    /// Returns the number of bytes written.
    fn write(&self, path: &Path, data: &[u8], offset: u64, fh: Option<&Handle>) -> OpResult<u32> {
        enosys()
    }

    fn release(&self, path: &Path, flags: i32, fh: Option<&Handle>) -> OpResult<()> {
        enosys()
    }

    fn statfs(&self) -> OpResult<StatVfs> {
        enosys()
    }

    fn fsync(&self, path: &Path, datasync: bool, fh: Option<&Handle>) -> OpResult<()> {
        enosys()
    }

    fn create(&self, path: &Path, flags: i32, mode: u32) -> OpResult<Open> {
        enosys()
    }

    /// Opens a directory. A returned handle is kept until `releasedir`.
    fn opendir(&self, path: &Path) -> OpResult<Option<Handle>> {
        enosys()
    }

    fn releasedir(&self, path: &Path, fh: Option<&Handle>) -> OpResult<()> {
        enosys()
    }

    fn fsyncdir(&self, path: &Path, datasync: bool, fh: Option<&Handle>) -> OpResult<()> {
        enosys()
    }

    fn flush(&self, path: &Path, fh: Option<&Handle>) -> OpResult<()> {
        enosys()
    }

    fn fgetattr(&self, path: &Path, fh: Option<&Handle>) -> OpResult<Stat> {
        enosys()
    }

    fn ftruncate(&self, path: &Path, size: u64, fh: Option<&Handle>) -> OpResult<()> {
        enosys()
    }

    fn getxattr(&self, path: &Path, name: &OsStr, size: u32) -> OpResult<Xattr> {
        enosys()
    }

    fn listxattr(&self, path: &Path, size: u32) -> OpResult<Xattr> {
        enosys()
    }

    fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: i32) -> OpResult<()> {
        enosys()
    }

    fn removexattr(&self, path: &Path, name: &OsStr) -> OpResult<()> {
        enosys()
    }

    fn access(&self, path: &Path, mask: i32) -> OpResult<()> {
        enosys()
    }

    fn lock(&self, path: &Path, cmd: i32, lock: Flock, fh: Option<&Handle>) -> OpResult<Flock> {
        enosys()
    }

    fn utimens(&self, path: &Path, atime: Timespec, mtime: Timespec) -> OpResult<()> {
        enosys()
    }

    /// Maps block `idx` of the file to a device block.
    fn bmap(&self, path: &Path, blocksize: u32, idx: u64) -> OpResult<u64> {
        enosys()
    }

    /// Called once the session is up, before any other operation.
    fn fsinit(&self) -> OpResult<()> {
        Ok(())
    }

    /// Called when the session ends.
    fn fsdestroy(&self) -> OpResult<()> {
        Ok(())
    }

    fn ioctl(&self, path: &Path, cmd: u32, data: &[u8], out_size: u32) -> OpResult<Vec<u8>> {
        enosys()
    }

    /// Returns the ready events among `events`.
    fn poll(&self, path: &Path, events: u32, fh: Option<&Handle>) -> OpResult<u32> {
        enosys()
    }
}
