//! Adapter from the kernel's inode-based protocol to a path-based
//! [`DispatchTable`].
//!
//! Every request is translated on the session thread (inode to path, file
//! handle id to retained [`Handle`]) and then run through the [`Dispatcher`],
//! inline or on a worker, which calls the table and sends the reply.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{
    FileAttr, Filesystem, KernelConfig, ReplyAttr, ReplyBmap, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyIoctl, ReplyLock, ReplyOpen, ReplyStatfs,
    ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use fuseshim::context::{self, Context};
use fuseshim::{
    DispatchTable, Fault, FileInfo, Flock, Handle, Opened, Operation, Reply, Stat, Timespec,
    Xattr,
};
use tracing::{debug, error, info};

use crate::attr::{file_attr, file_type};
use crate::config::EngineConfig;
use crate::handles::{HandleTable, NO_HANDLE};
use crate::inode::{InodeTable, ROOT_INODE};
use crate::worker::Dispatcher;

/// `OFFSET_MAX` in the kernel's lock ranges: "until end of file".
const LOCK_TO_EOF: u64 = i64::MAX as u64;

/// State shared between the session thread and the workers.
pub(crate) struct Core {
    table: DispatchTable,
    inodes: InodeTable,
    handles: HandleTable<Handle>,
    config: EngineConfig,
}

impl Core {
    /// Converts a failed reply to the errno sent to the kernel.
    fn errno(op: Operation, fault: Fault) -> c_int {
        if let Fault::Unhandled(err) = &fault {
            error!(%op, error = ?err, "Unhandled error in filesystem operation");
        }
        fault.errno()
    }

    fn entry(&self, op: Operation, path: &Path, reply: ReplyEntry) {
        match self.table.getattr(path) {
            Ok(stat) => {
                let ino = self.inodes.get_or_insert(path);
                reply.entry(&self.config.entry_ttl, &file_attr(ino, &stat), 0);
            }
            Err(fault) => reply.error(Self::errno(op, fault)),
        }
    }

    pub(crate) fn inode(&self, path: &Path) -> Option<u64> {
        self.inodes.get_inode(path)
    }

    /// Attributes of an open file, through `fgetattr` when the handle
    /// class or filesystem provides it.
    fn stat(&self, path: &Path, fh: Option<&Handle>) -> Reply<Stat> {
        if fh.is_some() && self.table.contains(Operation::Fgetattr) {
            self.table.fgetattr(path, fh)
        } else {
            self.table.getattr(path)
        }
    }

    /// Stores a retained open value and returns the id and open flags.
    fn retain(&self, opened: Opened) -> (u64, u32) {
        let fh = match opened.handle {
            Some(handle) if opened.retain => self.handles.insert(handle),
            _ => NO_HANDLE,
        };
        (fh, open_flags(opened.info))
    }

    /// Creates and opens `path`, returning what the create reply carries.
    ///
    /// If the new file cannot be stat'ed the open value is released here,
    /// since the kernel sends no release for a failed create.
    fn create(
        &self,
        path: &Path,
        flags: i32,
        mode: u32,
    ) -> Result<(FileAttr, u64, u32), (Operation, Fault)> {
        let opened = self
            .table
            .create(path, flags, mode)
            .map_err(|fault| (Operation::Create, fault))?;
        match self.stat(path, opened.handle.as_ref()) {
            Ok(stat) => {
                let ino = self.inodes.get_or_insert(path);
                let (fh, open_flags) = self.retain(opened);
                Ok((file_attr(ino, &stat), fh, open_flags))
            }
            Err(fault) => {
                if let Err(e) = self.table.release(path, flags, opened.handle.as_ref())
                    && e.errno() != libc::ENOSYS
                {
                    Self::errno(Operation::Release, e);
                }
                Err((Operation::Getattr, fault))
            }
        }
    }

    fn set_times(
        &self,
        path: &Path,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Reply<()> {
        let current = if atime.is_none() || mtime.is_none() {
            Some(self.table.getattr(path)?)
        } else {
            None
        };
        let resolve = |t: Option<TimeOrNow>, fallback: fn(&Stat) -> i64| match t {
            Some(TimeOrNow::SpecificTime(t)) => Timespec::from(t),
            Some(TimeOrNow::Now) => Timespec::from(SystemTime::now()),
            None => Timespec::new(current.as_ref().map_or(0, fallback), 0),
        };
        let atime = resolve(atime, |s| s.st_atime);
        let mtime = resolve(mtime, |s| s.st_mtime);

        if self.table.contains(Operation::Utimens) {
            self.table
                .utimens(path, atime.tv_sec, atime.tv_nsec, mtime.tv_sec, mtime.tv_nsec)
        } else {
            self.table.utime(path, atime.tv_sec, mtime.tv_sec)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &self,
        path: &Path,
        fh: Option<&Handle>,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Reply<Stat> {
        if let Some(mode) = mode {
            self.table.chmod(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.table.chown(path, uid, gid)?;
        }
        if let Some(size) = size {
            if fh.is_some() && self.table.contains(Operation::Ftruncate) {
                self.table.ftruncate(path, size, fh)?;
            } else {
                self.table.truncate(path, size)?;
            }
        }
        if atime.is_some() || mtime.is_some() {
            self.set_times(path, atime, mtime)?;
        }
        self.stat(path, fh)
    }
}

fn open_flags(info: FileInfo) -> u32 {
    let mut flags = 0;
    if info.direct_io {
        flags |= fuser::consts::FOPEN_DIRECT_IO;
    }
    if info.keep_cache {
        flags |= fuser::consts::FOPEN_KEEP_CACHE;
    }
    flags
}

fn request_context(req: &Request<'_>) -> Context {
    Context {
        uid: req.uid(),
        gid: req.gid(),
        pid: req.pid(),
    }
}

/// Converts a kernel lock range (inclusive end) to a `Flock`.
fn flock(start: u64, end: u64, typ: i32, pid: u32) -> Flock {
    Flock {
        l_type: typ,
        l_start: start,
        l_len: if end >= LOCK_TO_EOF {
            0
        } else {
            end - start + 1
        },
        l_pid: pid,
    }
}

fn lock_end(lock: &Flock) -> u64 {
    if lock.l_len == 0 {
        LOCK_TO_EOF
    } else {
        lock.l_start + lock.l_len - 1
    }
}

/// A [`fuser::Filesystem`] serving a dispatch table.
pub struct ShimFs {
    core: Arc<Core>,
    dispatcher: Dispatcher,
}

impl ShimFs {
    pub fn new(table: DispatchTable, config: EngineConfig, multithreaded: bool) -> Self {
        let dispatcher = if multithreaded {
            Dispatcher::pool(config.workers)
        } else {
            Dispatcher::inline()
        };
        Self {
            core: Arc::new(Core {
                table,
                inodes: InodeTable::new(),
                handles: HandleTable::new(),
                config,
            }),
            dispatcher,
        }
    }

    fn run(
        &self,
        req: &Request<'_>,
        op: Operation,
        job: impl FnOnce(&Core) + Send + 'static,
    ) {
        self.dispatch(request_context(req), op, job);
    }

    /// Runs `job` with `ctx` as the current request context.
    fn dispatch(&self, ctx: Context, op: Operation, job: impl FnOnce(&Core) + Send + 'static) {
        debug!(%op, uid = ctx.uid, pid = ctx.pid, "Dispatching");
        let core = Arc::clone(&self.core);
        self.dispatcher.execute(move || context::scope(ctx, || job(&core)));
    }

    pub(crate) fn core(&self) -> Arc<Core> {
        Arc::clone(&self.core)
    }

    fn path(&self, ino: u64) -> Result<PathBuf, c_int> {
        self.core.inodes.path(ino).ok_or(libc::ENOENT)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Result<PathBuf, c_int> {
        self.core.inodes.child_path(parent, name).ok_or(libc::ENOENT)
    }

    fn handle(&self, fh: u64) -> Option<Handle> {
        self.core.handles.get(fh)
    }
}

/// Resolves a path or answers the request with the errno and returns.
macro_rules! resolve {
    ($expr:expr, $reply:ident) => {
        match $expr {
            Ok(path) => path,
            Err(errno) => {
                $reply.error(errno);
                return;
            }
        }
    };
}

/// Dispatches an operation whose only reply is success or an errno.
macro_rules! empty {
    ($self:ident, $req:ident, $op:ident, $reply:ident, |$core:ident| $call:expr) => {
        $self.run($req, Operation::$op, move |$core| match $call {
            Ok(()) => $reply.ok(),
            Err(fault) => $reply.error(Core::errno(Operation::$op, fault)),
        })
    };
}

impl Filesystem for ShimFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        match self.core.table.fsinit() {
            Ok(()) => {}
            Err(fault) if fault.errno() == libc::ENOSYS => {}
            Err(fault) => return Err(Core::errno(Operation::Fsinit, fault)),
        }
        info!("Filesystem session started");
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(fault) = self.core.table.fsdestroy()
            && fault.errno() != libc::ENOSYS
        {
            Core::errno(Operation::Fsdestroy, fault);
        }
        info!(open_handles = self.core.handles.len(), "Filesystem session ended");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = resolve!(self.child(parent, name), reply);
        self.run(req, Operation::Getattr, move |core| {
            core.entry(Operation::Getattr, &path, reply);
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.core.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let path = resolve!(self.path(ino), reply);
        let handle = fh.and_then(|fh| self.handle(fh));
        self.run(req, Operation::Getattr, move |core| {
            match core.stat(&path, handle.as_ref()) {
                Ok(stat) => reply.attr(&core.config.attr_ttl, &file_attr(ino, &stat)),
                Err(fault) => reply.error(Core::errno(Operation::Getattr, fault)),
            }
        });
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = resolve!(self.path(ino), reply);
        let handle = fh.and_then(|fh| self.handle(fh));
        self.run(req, Operation::Getattr, move |core| {
            match core.setattr(&path, handle.as_ref(), mode, uid, gid, size, atime, mtime) {
                Ok(stat) => reply.attr(&core.config.attr_ttl, &file_attr(ino, &stat)),
                Err(fault) => reply.error(Core::errno(Operation::Getattr, fault)),
            }
        });
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = resolve!(self.path(ino), reply);
        self.run(req, Operation::Readlink, move |core| match core.table.readlink(&path) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(fault) => reply.error(Core::errno(Operation::Readlink, fault)),
        });
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = resolve!(self.child(parent, name), reply);
        self.run(req, Operation::Mknod, move |core| match core.table.mknod(&path, mode, rdev) {
            Ok(()) => core.entry(Operation::Mknod, &path, reply),
            Err(fault) => reply.error(Core::errno(Operation::Mknod, fault)),
        });
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = resolve!(self.child(parent, name), reply);
        self.run(req, Operation::Mkdir, move |core| match core.table.mkdir(&path, mode) {
            Ok(()) => core.entry(Operation::Mkdir, &path, reply),
            Err(fault) => reply.error(Core::errno(Operation::Mkdir, fault)),
        });
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = resolve!(self.child(parent, name), reply);
        self.run(req, Operation::Unlink, move |core| match core.table.unlink(&path) {
            Ok(()) => {
                core.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(fault) => reply.error(Core::errno(Operation::Unlink, fault)),
        });
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = resolve!(self.child(parent, name), reply);
        self.run(req, Operation::Rmdir, move |core| match core.table.rmdir(&path) {
            Ok(()) => {
                core.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(fault) => reply.error(Core::errno(Operation::Rmdir, fault)),
        });
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = resolve!(self.child(parent, link_name), reply);
        let target = target.to_path_buf();
        self.run(req, Operation::Symlink, move |core| match core.table.symlink(&target, &path) {
            Ok(()) => core.entry(Operation::Symlink, &path, reply),
            Err(fault) => reply.error(Core::errno(Operation::Symlink, fault)),
        });
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE and RENAME_EXCHANGE have no path-level equivalent.
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let from = resolve!(self.child(parent, name), reply);
        let to = resolve!(self.child(newparent, newname), reply);
        self.run(req, Operation::Rename, move |core| match core.table.rename(&from, &to) {
            Ok(()) => {
                core.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(fault) => reply.error(Core::errno(Operation::Rename, fault)),
        });
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let target = resolve!(self.path(ino), reply);
        let path = resolve!(self.child(newparent, newname), reply);
        self.run(req, Operation::Link, move |core| match core.table.link(&target, &path) {
            Ok(()) => core.entry(Operation::Link, &path, reply),
            Err(fault) => reply.error(Core::errno(Operation::Link, fault)),
        });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = resolve!(self.path(ino), reply);
        self.run(req, Operation::Open, move |core| {
            if !core.table.contains(Operation::Open) {
                reply.opened(NO_HANDLE, 0);
                return;
            }
            match core.table.open(&path, flags) {
                Ok(opened) => {
                    let (fh, open_flags) = core.retain(opened);
                    reply.opened(fh, open_flags);
                }
                Err(fault) => reply.error(Core::errno(Operation::Open, fault)),
            }
        });
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        self.run(req, Operation::Read, move |core| {
            match core.table.read(&path, size, offset.max(0) as u64, handle.as_ref()) {
                Ok(data) => reply.data(&data),
                Err(fault) => reply.error(Core::errno(Operation::Read, fault)),
            }
        });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        let data = data.to_vec();
        self.run(req, Operation::Write, move |core| {
            match core.table.write(&path, &data, offset.max(0) as u64, handle.as_ref()) {
                Ok(written) => reply.written(written),
                Err(fault) => reply.error(Core::errno(Operation::Write, fault)),
            }
        });
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        empty!(self, req, Flush, reply, |core| core.table.flush(&path, handle.as_ref()));
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = self.path(ino).unwrap_or_default();
        let handle = self.core.handles.remove(fh);
        self.run(req, Operation::Release, move |core| {
            match core.table.release(&path, flags, handle.as_ref()) {
                Ok(()) => reply.ok(),
                Err(fault) if fault.errno() == libc::ENOSYS => reply.ok(),
                Err(fault) => reply.error(Core::errno(Operation::Release, fault)),
            }
        });
    }

    fn fsync(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        empty!(self, req, Fsync, reply, |core| core.table.fsync(&path, datasync, handle.as_ref()));
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = resolve!(self.path(ino), reply);
        self.run(req, Operation::Opendir, move |core| {
            if !core.table.contains(Operation::Opendir) {
                reply.opened(NO_HANDLE, 0);
                return;
            }
            match core.table.opendir(&path) {
                Ok(handle) => {
                    let fh = handle.map_or(NO_HANDLE, |h| core.handles.insert(h));
                    reply.opened(fh, 0);
                }
                Err(fault) => reply.error(Core::errno(Operation::Opendir, fault)),
            }
        });
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        self.run(req, Operation::Readdir, move |core| {
            let entries = match core.table.readdir(&path, offset, handle.as_ref()) {
                Ok(entries) => entries,
                Err(fault) => {
                    reply.error(Core::errno(Operation::Readdir, fault));
                    return;
                }
            };

            // Implementations that ignore offsets return the whole listing
            // every time; number the entries and skip what the kernel has.
            let synthesize = entries.iter().all(|e| e.offset == 0);
            let skip = if synthesize { offset.max(0) as usize } else { 0 };
            let parent_ino = path
                .parent()
                .and_then(|p| core.inodes.get_inode(p))
                .unwrap_or(ROOT_INODE);

            for (i, entry) in entries.iter().enumerate().skip(skip) {
                let next_offset = if synthesize { i as i64 + 1 } else { entry.offset };
                let entry_ino = match entry.name.as_bytes() {
                    b"." => ino,
                    b".." => parent_ino,
                    _ => core.inodes.get_or_insert_no_lookup(&path.join(&entry.name)),
                };
                if reply.add(entry_ino, next_offset, file_type(entry.kind), &entry.name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn releasedir(&mut self, req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        let path = self.path(ino).unwrap_or_default();
        let handle = self.core.handles.remove(fh);
        self.run(req, Operation::Releasedir, move |core| {
            match core.table.releasedir(&path, handle.as_ref()) {
                Ok(()) => reply.ok(),
                Err(fault) if fault.errno() == libc::ENOSYS => reply.ok(),
                Err(fault) => reply.error(Core::errno(Operation::Releasedir, fault)),
            }
        });
    }

    fn fsyncdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        datasync: bool,
        reply: ReplyEmpty,
    ) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        empty!(self, req, Fsyncdir, reply, |core| core
            .table
            .fsyncdir(&path, datasync, handle.as_ref()));
    }

    fn statfs(&mut self, req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        self.run(req, Operation::Statfs, move |core| {
            match core.table.statfs() {
                Ok(st) => reply.statfs(
                    st.f_blocks,
                    st.f_bfree,
                    st.f_bavail,
                    st.f_files,
                    st.f_ffree,
                    st.f_bsize as u32,
                    st.f_namemax as u32,
                    st.f_frsize as u32,
                ),
                Err(fault) if fault.errno() == libc::ENOSYS => {
                    reply.statfs(0, 0, 0, 0, 0, 512, 255, 0);
                }
                Err(fault) => reply.error(Core::errno(Operation::Statfs, fault)),
            }
        });
    }

    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path = resolve!(self.path(ino), reply);
        let name = name.to_owned();
        let value = value.to_vec();
        empty!(self, req, Setxattr, reply, |core| core
            .table
            .setxattr(&path, &name, &value, flags));
    }

    fn getxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let path = resolve!(self.path(ino), reply);
        let name = name.to_owned();
        self.run(req, Operation::Getxattr, move |core| {
            send_xattr(Operation::Getxattr, core.table.getxattr(&path, &name, size), size, reply);
        });
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let path = resolve!(self.path(ino), reply);
        self.run(req, Operation::Listxattr, move |core| {
            send_xattr(Operation::Listxattr, core.table.listxattr(&path, size), size, reply);
        });
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = resolve!(self.path(ino), reply);
        let name = name.to_owned();
        empty!(self, req, Removexattr, reply, |core| core.table.removexattr(&path, &name));
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = resolve!(self.path(ino), reply);
        empty!(self, req, Access, reply, |core| core.table.access(&path, mask));
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = resolve!(self.child(parent, name), reply);
        self.run(req, Operation::Create, move |core| {
            match core.create(&path, flags, mode) {
                Ok((attr, fh, open_flags)) => {
                    reply.created(&core.config.entry_ttl, &attr, 0, fh, open_flags);
                }
                Err((op, fault)) => reply.error(Core::errno(op, fault)),
            }
        });
    }

    fn getlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        reply: ReplyLock,
    ) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        let request = flock(start, end, typ, pid);
        self.run(req, Operation::Lock, move |core| {
            match core.table.lock(&path, libc::F_GETLK, request, handle.as_ref()) {
                Ok(lock) => reply.locked(lock.l_start, lock_end(&lock), lock.l_type, lock.l_pid),
                Err(fault) => reply.error(Core::errno(Operation::Lock, fault)),
            }
        });
    }

    fn setlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        sleep: bool,
        reply: ReplyEmpty,
    ) {
        let path = resolve!(self.path(ino), reply);
        let handle = self.handle(fh);
        let request = flock(start, end, typ, pid);
        let cmd = if sleep { libc::F_SETLKW } else { libc::F_SETLK };
        empty!(self, req, Lock, reply, |core| core
            .table
            .lock(&path, cmd, request, handle.as_ref())
            .map(|_| ()));
    }

    fn bmap(&mut self, req: &Request<'_>, ino: u64, blocksize: u32, idx: u64, reply: ReplyBmap) {
        let path = resolve!(self.path(ino), reply);
        self.run(req, Operation::Bmap, move |core| match core.table.bmap(&path, blocksize, idx) {
            Ok(block) => reply.bmap(block),
            Err(fault) => reply.error(Core::errno(Operation::Bmap, fault)),
        });
    }

    fn ioctl(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: u32,
        cmd: u32,
        in_data: &[u8],
        out_size: u32,
        reply: ReplyIoctl,
    ) {
        let path = resolve!(self.path(ino), reply);
        let data = in_data.to_vec();
        self.run(req, Operation::Ioctl, move |core| {
            match core.table.ioctl(&path, cmd, &data, out_size) {
                Ok(out) => reply.ioctl(0, &out),
                Err(fault) => reply.error(Core::errno(Operation::Ioctl, fault)),
            }
        });
    }
}

fn send_xattr(op: Operation, result: Reply<Xattr>, size: u32, reply: ReplyXattr) {
    match result {
        Ok(Xattr::Size(len)) => reply.size(len),
        Ok(Xattr::Data(data)) if size == 0 => reply.size(data.len() as u32),
        Ok(Xattr::Data(data)) if data.len() > size as usize => reply.error(libc::ERANGE),
        Ok(Xattr::Data(data)) => reply.data(&data),
        Err(fault) => reply.error(Core::errno(op, fault)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, mpsc};

    use fuseshim::{DispatchBuilder, OpError, OpResult, Open, OperationSet};

    use super::*;

    #[derive(Default)]
    struct Recording {
        callers: Mutex<Vec<Option<Context>>>,
        released: AtomicUsize,
    }

    impl fuseshim::Filesystem for Recording {
        fn operations(&self) -> OperationSet {
            OperationSet::of(&[Operation::Access, Operation::Create, Operation::Release])
        }

        fn access(&self, _path: &Path, _mask: i32) -> OpResult<()> {
            self.callers.lock().unwrap().push(context::current());
            Ok(())
        }

        fn create(&self, _path: &Path, _flags: i32, _mode: u32) -> OpResult<Open> {
            Ok(Open::keep(7u64))
        }

        fn release(&self, _path: &Path, _flags: i32, fh: Option<&Handle>) -> OpResult<()> {
            if fh.and_then(|h| h.downcast_ref::<u64>()) == Some(&7) {
                self.released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            } else {
                Err(OpError::Errno(libc::EBADF))
            }
        }
    }

    fn shim(fs: &Arc<Recording>, multithreaded: bool) -> ShimFs {
        let table = DispatchBuilder::new(Arc::clone(fs)).build();
        ShimFs::new(table, EngineConfig::default().workers(2), multithreaded)
    }

    #[test]
    fn test_dispatched_call_sees_request_context() {
        let fs = Arc::new(Recording::default());
        let caller = Context {
            uid: 1000,
            gid: 100,
            pid: 4242,
        };
        let shim = shim(&fs, true);
        let (tx, rx) = mpsc::channel();
        shim.dispatch(caller, Operation::Access, move |core| {
            tx.send(core.table.access(Path::new("/"), libc::R_OK).is_ok()).unwrap();
        });
        assert!(rx.recv().unwrap());
        drop(shim);

        assert_eq!(*fs.callers.lock().unwrap(), vec![Some(caller)]);
        assert_eq!(context::current(), None);
    }

    #[test]
    fn test_failed_create_releases_handle() {
        let fs = Arc::new(Recording::default());
        let shim = shim(&fs, false);
        let core = shim.core();

        let (op, fault) = core.create(Path::new("/new"), libc::O_WRONLY, 0o644).unwrap_err();
        assert_eq!(op, Operation::Getattr);
        assert_eq!(fault.errno(), libc::ENOSYS);
        assert_eq!(fs.released.load(Ordering::SeqCst), 1);
        assert!(core.handles.is_empty());
        assert_eq!(core.inodes.get_inode(Path::new("/new")), None);
    }

    #[test]
    fn test_lock_range_conversion() {
        let lock = flock(10, 19, libc::F_WRLCK, 42);
        assert_eq!(lock.l_len, 10);
        assert_eq!(lock_end(&lock), 19);

        let to_eof = flock(5, LOCK_TO_EOF, libc::F_RDLCK, 1);
        assert_eq!(to_eof.l_len, 0);
        assert_eq!(lock_end(&to_eof), LOCK_TO_EOF);
    }

    #[test]
    fn test_open_flags() {
        assert_eq!(open_flags(FileInfo::default()), 0);
        let both = FileInfo {
            keep_cache: true,
            direct_io: true,
        };
        assert_eq!(
            open_flags(both),
            fuser::consts::FOPEN_DIRECT_IO | fuser::consts::FOPEN_KEEP_CACHE
        );
    }
}
