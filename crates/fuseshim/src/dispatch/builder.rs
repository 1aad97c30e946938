//! Builds a [`DispatchTable`] from a filesystem and its handle classes.

use std::any::type_name;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::DispatchTable;
use super::errno::guard;
use super::proxy::{DirHandle, FileHandle, Handle, Opened, with_handle};
use crate::filesystem::Filesystem;
use crate::operation::{Operation, OperationSet, STATEFUL_DIR_OPS, STATEFUL_FILE_OPS};
use crate::types::{Flock, Timespec};

/// Installs a table entry calling the filesystem, wrapped in [`guard`].
macro_rules! bind {
    ($table:ident, $fs:ident, $field:ident, $variant:ident, |$($arg:ident: $ty:ty),*| $call:expr) => {{
        let $fs = Arc::clone($fs);
        $table.$field = Some(Box::new(move |$($arg: $ty),*| guard(Operation::$variant, $call)));
    }};
}

/// Installs a table entry that needs no filesystem reference.
macro_rules! proxy {
    ($table:ident, $field:ident, $variant:ident, |$($arg:ident: $ty:ty),*| $call:expr) => {{
        $table.$field = Some(Box::new(move |$($arg: $ty),*| guard(Operation::$variant, $call)));
    }};
}

/// A registered handle class, erased to the function that installs it.
struct ClassBinding<F> {
    name: &'static str,
    operations: OperationSet,
    install: fn(&Arc<F>, &mut DispatchTable),
}

impl<F> Clone for ClassBinding<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            operations: self.operations,
            install: self.install,
        }
    }
}

/// Builds dispatch tables for one filesystem.
///
/// The filesystem's declared operations are bound first. A file handle
/// class then takes over `open` and `create` and every per-handle file
/// operation it implements, replacing any same-named filesystem entry; a
/// directory handle class does the same for `opendir` and the per-handle
/// directory operations.
pub struct DispatchBuilder<F: Filesystem> {
    fs: Arc<F>,
    file_class: Option<ClassBinding<F>>,
    dir_class: Option<ClassBinding<F>>,
}

impl<F: Filesystem> Clone for DispatchBuilder<F> {
    fn clone(&self) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            file_class: self.file_class.clone(),
            dir_class: self.dir_class.clone(),
        }
    }
}

impl<F: Filesystem> DispatchBuilder<F> {
    pub fn new(fs: Arc<F>) -> Self {
        Self {
            fs,
            file_class: None,
            dir_class: None,
        }
    }

    pub fn fs(&self) -> &Arc<F> {
        &self.fs
    }

    /// Registers `H` as the file handle class, replacing any earlier one.
    #[must_use]
    pub fn file_class<H: FileHandle<Fs = F>>(mut self) -> Self {
        self.set_file_class::<H>();
        self
    }

    pub fn set_file_class<H: FileHandle<Fs = F>>(&mut self) {
        self.file_class = Some(ClassBinding {
            name: type_name::<H>(),
            operations: H::OPERATIONS,
            install: install_file_class::<H>,
        });
    }

    /// Registers `D` as the directory handle class, replacing any earlier
    /// one.
    #[must_use]
    pub fn dir_class<D: DirHandle<Fs = F>>(mut self) -> Self {
        self.set_dir_class::<D>();
        self
    }

    pub fn set_dir_class<D: DirHandle<Fs = F>>(&mut self) {
        self.dir_class = Some(ClassBinding {
            name: type_name::<D>(),
            operations: D::OPERATIONS,
            install: install_dir_class::<D>,
        });
    }

    pub fn has_file_class(&self) -> bool {
        self.file_class.is_some()
    }

    pub fn has_dir_class(&self) -> bool {
        self.dir_class.is_some()
    }

    /// Builds the table.
    pub fn build(&self) -> DispatchTable {
        let mut table = DispatchTable::empty();
        for op in self.fs.operations().iter() {
            bind_operation(&self.fs, op, &mut table);
        }
        for class in [&self.file_class, &self.dir_class].into_iter().flatten() {
            debug!(class = class.name, operations = ?class.operations, "Binding handle class");
            (class.install)(&self.fs, &mut table);
        }
        debug!(operations = ?table.operations(), "Built dispatch table");
        table
    }
}

fn bind_operation<F: Filesystem>(fs: &Arc<F>, op: Operation, table: &mut DispatchTable) {
    match op {
        Operation::Getattr => bind!(table, fs, getattr, Getattr, |path: &Path| fs.getattr(path)),
        Operation::Readlink => bind!(table, fs, readlink, Readlink, |path: &Path| fs.readlink(path)),
        Operation::Readdir => bind!(table, fs, readdir, Readdir, |path: &Path, offset: i64, fh: Option<&Handle>| {
            fs.readdir(path, offset, fh)
        }),
        Operation::Mknod => bind!(table, fs, mknod, Mknod, |path: &Path, mode: u32, rdev: u32| {
            fs.mknod(path, mode, rdev)
        }),
        Operation::Mkdir => bind!(table, fs, mkdir, Mkdir, |path: &Path, mode: u32| fs.mkdir(path, mode)),
        Operation::Unlink => bind!(table, fs, unlink, Unlink, |path: &Path| fs.unlink(path)),
        Operation::Rmdir => bind!(table, fs, rmdir, Rmdir, |path: &Path| fs.rmdir(path)),
        Operation::Symlink => bind!(table, fs, symlink, Symlink, |target: &Path, link: &Path| {
            fs.symlink(target, link)
        }),
        Operation::Rename => bind!(table, fs, rename, Rename, |from: &Path, to: &Path| fs.rename(from, to)),
        Operation::Link => bind!(table, fs, link, Link, |target: &Path, link: &Path| fs.link(target, link)),
        Operation::Chmod => bind!(table, fs, chmod, Chmod, |path: &Path, mode: u32| fs.chmod(path, mode)),
        Operation::Chown => bind!(table, fs, chown, Chown, |path: &Path, uid: Option<u32>, gid: Option<u32>| {
            fs.chown(path, uid, gid)
        }),
        Operation::Truncate => bind!(table, fs, truncate, Truncate, |path: &Path, size: u64| {
            fs.truncate(path, size)
        }),
        Operation::Utime => bind!(table, fs, utime, Utime, |path: &Path, atime: i64, mtime: i64| {
            fs.utime(path, atime, mtime)
        }),
        Operation::Open => bind!(table, fs, open, Open, |path: &Path, flags: i32| {
            fs.open(path, flags).map(Opened::from)
        }),
        Operation::Read => bind!(table, fs, read, Read, |path: &Path, size: u32, offset: u64, fh: Option<&Handle>| {
            fs.read(path, size, offset, fh)
        }),
        Operation::Write => bind!(table, fs, write, Write, |path: &Path, data: &[u8], offset: u64, fh: Option<&Handle>| {
            fs.write(path, data, offset, fh)
        }),
        Operation::Release => bind!(table, fs, release, Release, |path: &Path, flags: i32, fh: Option<&Handle>| {
            fs.release(path, flags, fh)
        }),
        Operation::Statfs => bind!(table, fs, statfs, Statfs, | | fs.statfs()),
        Operation::Fsync => bind!(table, fs, fsync, Fsync, |path: &Path, datasync: bool, fh: Option<&Handle>| {
            fs.fsync(path, datasync, fh)
        }),
        Operation::Create => bind!(table, fs, create, Create, |path: &Path, flags: i32, mode: u32| {
            fs.create(path, flags, mode).map(Opened::from)
        }),
        Operation::Opendir => bind!(table, fs, opendir, Opendir, |path: &Path| fs.opendir(path)),
        Operation::Releasedir => bind!(table, fs, releasedir, Releasedir, |path: &Path, fh: Option<&Handle>| {
            fs.releasedir(path, fh)
        }),
        Operation::Fsyncdir => bind!(table, fs, fsyncdir, Fsyncdir, |path: &Path, datasync: bool, fh: Option<&Handle>| {
            fs.fsyncdir(path, datasync, fh)
        }),
        Operation::Flush => bind!(table, fs, flush, Flush, |path: &Path, fh: Option<&Handle>| fs.flush(path, fh)),
        Operation::Fgetattr => bind!(table, fs, fgetattr, Fgetattr, |path: &Path, fh: Option<&Handle>| {
            fs.fgetattr(path, fh)
        }),
        Operation::Ftruncate => bind!(table, fs, ftruncate, Ftruncate, |path: &Path, size: u64, fh: Option<&Handle>| {
            fs.ftruncate(path, size, fh)
        }),
        Operation::Getxattr => bind!(table, fs, getxattr, Getxattr, |path: &Path, name: &OsStr, size: u32| {
            fs.getxattr(path, name, size)
        }),
        Operation::Listxattr => bind!(table, fs, listxattr, Listxattr, |path: &Path, size: u32| {
            fs.listxattr(path, size)
        }),
        Operation::Setxattr => bind!(table, fs, setxattr, Setxattr, |path: &Path, name: &OsStr, value: &[u8], flags: i32| {
            fs.setxattr(path, name, value, flags)
        }),
        Operation::Removexattr => bind!(table, fs, removexattr, Removexattr, |path: &Path, name: &OsStr| {
            fs.removexattr(path, name)
        }),
        Operation::Access => bind!(table, fs, access, Access, |path: &Path, mask: i32| fs.access(path, mask)),
        Operation::Lock => bind!(table, fs, lock, Lock, |path: &Path, cmd: i32, lock: Flock, fh: Option<&Handle>| {
            fs.lock(path, cmd, lock, fh)
        }),
        Operation::Utimens => bind!(table, fs, utimens, Utimens, |path: &Path, acc_sec: i64, acc_nsec: i64, mod_sec: i64, mod_nsec: i64| {
            fs.utimens(path, Timespec::new(acc_sec, acc_nsec), Timespec::new(mod_sec, mod_nsec))
        }),
        Operation::Bmap => bind!(table, fs, bmap, Bmap, |path: &Path, blocksize: u32, idx: u64| {
            fs.bmap(path, blocksize, idx)
        }),
        Operation::Fsinit => bind!(table, fs, fsinit, Fsinit, | | fs.fsinit()),
        Operation::Fsdestroy => bind!(table, fs, fsdestroy, Fsdestroy, | | fs.fsdestroy()),
        Operation::Ioctl => bind!(table, fs, ioctl, Ioctl, |path: &Path, cmd: u32, data: &[u8], out_size: u32| {
            fs.ioctl(path, cmd, data, out_size)
        }),
        Operation::Poll => bind!(table, fs, poll, Poll, |path: &Path, events: u32, fh: Option<&Handle>| {
            fs.poll(path, events, fh)
        }),
    }
}

fn adopt<H: FileHandle>(handle: H) -> Opened {
    Opened {
        info: handle.info(),
        handle: Some(Handle::new(handle)),
        retain: true,
    }
}

fn install_file_class<H: FileHandle>(fs: &Arc<H::Fs>, table: &mut DispatchTable) {
    bind!(table, fs, open, Open, |path: &Path, flags: i32| {
        H::open(&fs, path, flags).map(adopt)
    });
    bind!(table, fs, create, Create, |path: &Path, flags: i32, mode: u32| {
        H::create(&fs, path, flags, mode).map(adopt)
    });

    for op in H::OPERATIONS.intersection(STATEFUL_FILE_OPS).iter() {
        match op {
            Operation::Read => proxy!(table, read, Read, |_path: &Path, size: u32, offset: u64, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.read(size, offset))
            }),
            Operation::Write => proxy!(table, write, Write, |_path: &Path, data: &[u8], offset: u64, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.write(data, offset))
            }),
            Operation::Release => proxy!(table, release, Release, |_path: &Path, flags: i32, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.release(flags))
            }),
            Operation::Flush => proxy!(table, flush, Flush, |_path: &Path, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.flush())
            }),
            Operation::Fsync => proxy!(table, fsync, Fsync, |_path: &Path, datasync: bool, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.fsync(datasync))
            }),
            Operation::Fgetattr => proxy!(table, fgetattr, Fgetattr, |_path: &Path, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.fgetattr())
            }),
            Operation::Ftruncate => proxy!(table, ftruncate, Ftruncate, |_path: &Path, size: u64, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.ftruncate(size))
            }),
            Operation::Lock => proxy!(table, lock, Lock, |_path: &Path, cmd: i32, lock: Flock, fh: Option<&Handle>| {
                with_handle(fh, |h: &H| h.lock(cmd, lock))
            }),
            _ => {}
        }
    }
}

fn install_dir_class<D: DirHandle>(fs: &Arc<D::Fs>, table: &mut DispatchTable) {
    bind!(table, fs, opendir, Opendir, |path: &Path| {
        D::opendir(&fs, path).map(|dir| Some(Handle::new(dir)))
    });

    for op in D::OPERATIONS.intersection(STATEFUL_DIR_OPS).iter() {
        match op {
            Operation::Readdir => proxy!(table, readdir, Readdir, |_path: &Path, offset: i64, fh: Option<&Handle>| {
                with_handle(fh, |d: &D| d.readdir(offset))
            }),
            Operation::Fsyncdir => proxy!(table, fsyncdir, Fsyncdir, |_path: &Path, datasync: bool, fh: Option<&Handle>| {
                with_handle(fh, |d: &D| d.fsyncdir(datasync))
            }),
            Operation::Releasedir => proxy!(table, releasedir, Releasedir, |_path: &Path, fh: Option<&Handle>| {
                with_handle(fh, |d: &D| d.releasedir())
            }),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dispatch::errno::{OpError, OpResult};
    use crate::dispatch::proxy::Open;
    use crate::types::{Direntry, FileInfo, Stat};

    /// Implements only a stateless `read` that fails with ENOENT.
    struct MissingFiles;

    impl Filesystem for MissingFiles {
        fn operations(&self) -> OperationSet {
            OperationSet::of(&[Operation::Read])
        }

        fn read(&self, _path: &Path, _size: u32, _offset: u64, _fh: Option<&Handle>) -> OpResult<Vec<u8>> {
            Err(io::Error::from_raw_os_error(2).into())
        }
    }

    #[test]
    fn test_stateless_read_translates_errno() {
        let table = DispatchBuilder::new(Arc::new(MissingFiles)).build();
        assert_eq!(table.operations(), OperationSet::of(&[Operation::Read]));

        let fault = table.read(Path::new("/x"), 10, 0, None).unwrap_err();
        assert_eq!(fault.as_return_code(), -2);
    }

    #[test]
    fn test_absent_entry_is_enosys() {
        let table = DispatchBuilder::new(Arc::new(MissingFiles)).build();
        let fault = table.getattr(Path::new("/")).unwrap_err();
        assert_eq!(fault.errno(), libc::ENOSYS);
        assert!(!table.contains(Operation::Getattr));
    }

    #[derive(Default)]
    struct Counting {
        top_level_reads: AtomicUsize,
    }

    impl Filesystem for Counting {
        fn operations(&self) -> OperationSet {
            OperationSet::of(&[Operation::Getattr, Operation::Read, Operation::Utimens, Operation::Open])
        }

        fn getattr(&self, _path: &Path) -> OpResult<Stat> {
            Ok(Stat::regular(0o644, 5))
        }

        fn open(&self, _path: &Path, _flags: i32) -> OpResult<Open> {
            Ok(Open::Info(FileInfo {
                keep_cache: true,
                direct_io: false,
            }))
        }

        fn read(&self, _path: &Path, _size: u32, _offset: u64, _fh: Option<&Handle>) -> OpResult<Vec<u8>> {
            self.top_level_reads.fetch_add(1, Ordering::SeqCst);
            Ok(b"top".to_vec())
        }

        fn utimens(&self, _path: &Path, atime: Timespec, mtime: Timespec) -> OpResult<()> {
            if atime == Timespec::new(1, 2) && mtime == Timespec::new(3, 4) {
                Ok(())
            } else {
                Err(OpError::Errno(libc::EINVAL))
            }
        }
    }

    struct CountingFile {
        path: String,
    }

    impl FileHandle for CountingFile {
        type Fs = Counting;
        const OPERATIONS: OperationSet = OperationSet::of(&[Operation::Read, Operation::Release]);

        fn open(_fs: &Arc<Counting>, path: &Path, _flags: i32) -> OpResult<Self> {
            Ok(Self {
                path: path.display().to_string(),
            })
        }

        fn info(&self) -> FileInfo {
            FileInfo {
                keep_cache: false,
                direct_io: true,
            }
        }

        fn read(&self, size: u32, offset: u64) -> OpResult<Vec<u8>> {
            let data = format!("{}@{offset}", self.path);
            Ok(data.into_bytes().into_iter().take(size as usize).collect())
        }
    }

    struct ListingDir;

    impl DirHandle for ListingDir {
        type Fs = Counting;
        const OPERATIONS: OperationSet = OperationSet::of(&[Operation::Readdir]);

        fn opendir(_fs: &Arc<Counting>, _path: &Path) -> OpResult<Self> {
            Ok(ListingDir)
        }

        fn readdir(&self, _offset: i64) -> OpResult<Vec<Direntry>> {
            Ok(vec![Direntry::new("."), Direntry::new("..")])
        }
    }

    #[test]
    fn test_open_info_marker_is_not_retained() {
        let table = DispatchBuilder::new(Arc::new(Counting::default())).build();
        let opened = table.open(Path::new("/f"), libc::O_RDONLY).unwrap();
        assert!(!opened.retain);
        assert!(opened.info.keep_cache);
    }

    #[test]
    fn test_utimens_repackages_components() {
        let table = DispatchBuilder::new(Arc::new(Counting::default())).build();
        assert!(table.utimens(Path::new("/f"), 1, 2, 3, 4).is_ok());
        assert!(table.utimens(Path::new("/f"), 0, 0, 0, 0).is_err());
    }

    #[test]
    fn test_file_class_takes_over_stateful_ops() {
        let fs = Arc::new(Counting::default());
        let table = DispatchBuilder::new(Arc::clone(&fs))
            .file_class::<CountingFile>()
            .build();

        let opened = table.open(Path::new("/a"), libc::O_RDONLY).unwrap();
        assert!(opened.retain);
        assert!(opened.info.direct_io);
        let handle = opened.handle.unwrap();
        assert!(handle.is::<CountingFile>());

        let data = table.read(Path::new("/a"), 64, 7, Some(&handle)).unwrap();
        assert_eq!(data, b"/a@7");
        assert_eq!(fs.top_level_reads.load(Ordering::SeqCst), 0);

        assert!(table.release(Path::new("/a"), 0, Some(&handle)).is_ok());
        // Not implemented by the class and not declared by the filesystem.
        assert!(!table.contains(Operation::Flush));
        // Create is always routed to the class; this one does not support it.
        assert_eq!(
            table.create(Path::new("/b"), 0, 0o644).unwrap_err().errno(),
            libc::ENOSYS
        );
    }

    #[test]
    fn test_proxy_rejects_foreign_handle() {
        let table = DispatchBuilder::new(Arc::new(Counting::default()))
            .file_class::<CountingFile>()
            .build();
        let foreign = Handle::new(17u8);
        let fault = table.read(Path::new("/a"), 1, 0, Some(&foreign)).unwrap_err();
        assert_eq!(fault.errno(), libc::EBADF);
    }

    #[test]
    fn test_dir_class() {
        let table = DispatchBuilder::new(Arc::new(Counting::default()))
            .dir_class::<ListingDir>()
            .build();
        let handle = table.opendir(Path::new("/")).unwrap().unwrap();
        let entries = table.readdir(Path::new("/"), 0, Some(&handle)).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(table.contains(Operation::Opendir));
        assert!(!table.contains(Operation::Releasedir));
    }
}
