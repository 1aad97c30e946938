//! Open-file state and the handle classes that service it.
//!
//! A [`Handle`] is whatever an implementation returned from `open`,
//! `create` or `opendir`, kept by the engine until the matching release.
//! Handle classes ([`FileHandle`], [`DirHandle`]) go one step further: the
//! open value is an instance of the class, and the per-handle operations
//! are methods on it rather than on the filesystem.

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::dispatch::errno::{OpError, OpResult, enosys};
use crate::filesystem::Filesystem;
use crate::operation::OperationSet;
use crate::types::{Direntry, FileInfo, Flock, Stat};

/// A type-erased open-file or open-directory value.
#[derive(Clone)]
pub struct Handle(Arc<dyn Any + Send + Sync>);

impl Handle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").finish_non_exhaustive()
    }
}

/// Resolves the trailing handle argument of a proxied call to the class
/// instance. A missing or foreign handle is `EBADF`.
pub(crate) fn with_handle<H: Any, T>(
    fh: Option<&Handle>,
    call: impl FnOnce(&H) -> OpResult<T>,
) -> OpResult<T> {
    let handle = fh
        .and_then(Handle::downcast_ref::<H>)
        .ok_or(OpError::Errno(libc::EBADF))?;
    call(handle)
}

/// What a stateless `open` or `create` produced.
#[derive(Debug, Clone, Default)]
pub enum Open {
    /// Nothing to remember about this open file.
    #[default]
    Stateless,
    /// Flags for this open only; the engine keeps no handle.
    Info(FileInfo),
    /// A value the engine keeps until `release` and passes back to every
    /// per-handle operation.
    Keep(Handle),
}

impl Open {
    pub fn keep<T: Any + Send + Sync>(value: T) -> Self {
        Open::Keep(Handle::new(value))
    }
}

/// An `open`/`create` reply after signature adaptation.
#[derive(Debug, Clone, Default)]
pub struct Opened {
    pub handle: Option<Handle>,
    pub info: FileInfo,
    /// Whether the engine keeps `handle` for the lifetime of the open file.
    /// False for the disposable [`Open::Info`] marker.
    pub retain: bool,
}

impl From<Open> for Opened {
    fn from(open: Open) -> Self {
        match open {
            Open::Stateless => Opened::default(),
            Open::Info(info) => Opened {
                handle: None,
                info,
                retain: false,
            },
            Open::Keep(handle) => Opened {
                handle: Some(handle),
                info: FileInfo::default(),
                retain: true,
            },
        }
    }
}

/// A file handle class.
///
/// `open` and `create` construct the instance; the engine keeps it until
/// `release`. Only the methods named in [`OPERATIONS`] are bound, the rest
/// keep their `ENOSYS` defaults and are never called.
///
/// [`OPERATIONS`]: FileHandle::OPERATIONS
pub trait FileHandle: Sized + Send + Sync + 'static {
    type Fs: Filesystem;

    /// Per-handle operations this class implements.
    const OPERATIONS: OperationSet;

    fn open(fs: &Arc<Self::Fs>, path: &Path, flags: i32) -> OpResult<Self>;

    fn create(fs: &Arc<Self::Fs>, path: &Path, flags: i32, mode: u32) -> OpResult<Self> {
        let _ = (fs, path, flags, mode);
        enosys()
    }

    /// Page-cache flags reported back to the kernel on open.
    fn info(&self) -> FileInfo {
        FileInfo::default()
    }

    fn read(&self, size: u32, offset: u64) -> OpResult<Vec<u8>> {
        let _ = (size, offset);
        enosys()
    }

    fn write(&self, data: &[u8], offset: u64) -> OpResult<u32> {
        let _ = (data, offset);
        enosys()
    }

    fn release(&self, flags: i32) -> OpResult<()> {
        let _ = flags;
        Ok(())
    }

    fn flush(&self) -> OpResult<()> {
        enosys()
    }

    fn fsync(&self, datasync: bool) -> OpResult<()> {
        let _ = datasync;
        enosys()
    }

    fn fgetattr(&self) -> OpResult<Stat> {
        enosys()
    }

    fn ftruncate(&self, size: u64) -> OpResult<()> {
        let _ = size;
        enosys()
    }

    fn lock(&self, cmd: i32, lock: Flock) -> OpResult<Flock> {
        let _ = (cmd, lock);
        enosys()
    }
}

/// A directory handle class, constructed by `opendir`.
pub trait DirHandle: Sized + Send + Sync + 'static {
    type Fs: Filesystem;

    const OPERATIONS: OperationSet;

    fn opendir(fs: &Arc<Self::Fs>, path: &Path) -> OpResult<Self>;

    fn readdir(&self, offset: i64) -> OpResult<Vec<Direntry>> {
        let _ = offset;
        enosys()
    }

    fn fsyncdir(&self, datasync: bool) -> OpResult<()> {
        let _ = datasync;
        enosys()
    }

    fn releasedir(&self) -> OpResult<()> {
        Ok(())
    }
}
