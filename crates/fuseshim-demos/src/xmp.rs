//! A pass-through filesystem mirroring a host directory.
//!
//! Path operations go straight to the host. Open files and directories
//! are served by the [`XmpFile`] and [`XmpDir`] handle classes, which hold
//! the host file for as long as the kernel keeps it open.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, FileExt, FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use fuseshim::{
    DirHandle, Direntry, FileHandle, Filesystem, OpError, OpResult, Operation, OperationSet,
    Stat, StatVfs, Timespec,
};
use nix::fcntl::AT_FDCWD;
use nix::sys::stat::{Mode, SFlag, UtimensatFlags, utimensat};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use tracing::debug;

fn nix_error(errno: nix::errno::Errno) -> OpError {
    OpError::errno(errno as i32)
}

/// `S_IF*` bits for a host file type.
fn type_bits(kind: fs::FileType) -> u32 {
    let bits = if kind.is_dir() {
        libc::S_IFDIR
    } else if kind.is_symlink() {
        libc::S_IFLNK
    } else if kind.is_block_device() {
        libc::S_IFBLK
    } else if kind.is_char_device() {
        libc::S_IFCHR
    } else if kind.is_fifo() {
        libc::S_IFIFO
    } else if kind.is_socket() {
        libc::S_IFSOCK
    } else {
        libc::S_IFREG
    };
    bits as u32
}

/// The mirror. The root directory may be set once after construction,
/// typically from the `root` sub-option; it defaults to `/`.
#[derive(Debug, Default)]
pub struct XmpFs {
    root: OnceLock<PathBuf>,
}

impl XmpFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let fs = Self::default();
        let _ = fs.root.set(root.into());
        fs
    }

    /// Sets the mirrored directory. Returns false if it was already set.
    pub fn set_root(&self, root: impl Into<PathBuf>) -> bool {
        self.root.set(root.into()).is_ok()
    }

    pub fn root(&self) -> &Path {
        self.root.get().map_or(Path::new("/"), PathBuf::as_path)
    }

    /// The host path for a path inside the mount.
    pub fn real(&self, path: &Path) -> PathBuf {
        self.root().join(path.strip_prefix("/").unwrap_or(path))
    }
}

impl Filesystem for XmpFs {
    fn operations(&self) -> OperationSet {
        OperationSet::of(&[
            Operation::Getattr,
            Operation::Readlink,
            Operation::Mknod,
            Operation::Mkdir,
            Operation::Unlink,
            Operation::Rmdir,
            Operation::Symlink,
            Operation::Rename,
            Operation::Link,
            Operation::Chmod,
            Operation::Chown,
            Operation::Truncate,
            Operation::Utimens,
            Operation::Access,
            Operation::Statfs,
        ])
    }

    fn getattr(&self, path: &Path) -> OpResult<Stat> {
        Ok(Stat::from(&fs::symlink_metadata(self.real(path))?))
    }

    fn readlink(&self, path: &Path) -> OpResult<PathBuf> {
        Ok(fs::read_link(self.real(path))?)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> OpResult<()> {
        nix::sys::stat::mknod(
            &self.real(path),
            SFlag::from_bits_truncate((mode & libc::S_IFMT as u32) as libc::mode_t),
            Mode::from_bits_truncate((mode & 0o7777) as libc::mode_t),
            rdev as libc::dev_t,
        )
        .map_err(nix_error)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> OpResult<()> {
        Ok(DirBuilder::new().mode(mode).create(self.real(path))?)
    }

    fn unlink(&self, path: &Path) -> OpResult<()> {
        Ok(fs::remove_file(self.real(path))?)
    }

    fn rmdir(&self, path: &Path) -> OpResult<()> {
        Ok(fs::remove_dir(self.real(path))?)
    }

    fn symlink(&self, target: &Path, link: &Path) -> OpResult<()> {
        Ok(std::os::unix::fs::symlink(target, self.real(link))?)
    }

    fn rename(&self, from: &Path, to: &Path) -> OpResult<()> {
        Ok(fs::rename(self.real(from), self.real(to))?)
    }

    fn link(&self, target: &Path, link: &Path) -> OpResult<()> {
        Ok(fs::hard_link(self.real(target), self.real(link))?)
    }

    fn chmod(&self, path: &Path, mode: u32) -> OpResult<()> {
        Ok(fs::set_permissions(
            self.real(path),
            fs::Permissions::from_mode(mode),
        )?)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> OpResult<()> {
        Ok(std::os::unix::fs::lchown(self.real(path), uid, gid)?)
    }

    fn truncate(&self, path: &Path, size: u64) -> OpResult<()> {
        let file = OpenOptions::new().write(true).open(self.real(path))?;
        Ok(file.set_len(size)?)
    }

    fn utimens(&self, path: &Path, atime: Timespec, mtime: Timespec) -> OpResult<()> {
        let spec = |t: Timespec| TimeSpec::new(t.tv_sec as _, t.tv_nsec as _);
        utimensat(
            AT_FDCWD,
            &self.real(path),
            &spec(atime),
            &spec(mtime),
            UtimensatFlags::NoFollowSymlink,
        )
        .map_err(nix_error)
    }

    fn access(&self, path: &Path, mask: i32) -> OpResult<()> {
        nix::unistd::access(&self.real(path), AccessFlags::from_bits_truncate(mask))
            .map_err(nix_error)
    }

    fn statfs(&self) -> OpResult<StatVfs> {
        let st = nix::sys::statvfs::statvfs(self.root()).map_err(nix_error)?;
        Ok(StatVfs {
            f_bsize: st.block_size() as u64,
            f_frsize: st.fragment_size() as u64,
            f_blocks: st.blocks() as u64,
            f_bfree: st.blocks_free() as u64,
            f_bavail: st.blocks_available() as u64,
            f_files: st.files() as u64,
            f_ffree: st.files_free() as u64,
            f_favail: st.files_available() as u64,
            f_flag: st.flags().bits() as u64,
            f_namemax: st.name_max() as u64,
        })
    }
}

/// An open host file.
#[derive(Debug)]
pub struct XmpFile {
    file: File,
}

impl XmpFile {
    fn open_with(fs: &XmpFs, path: &Path, flags: i32, create_mode: Option<u32>) -> OpResult<Self> {
        let access = flags & libc::O_ACCMODE;
        let mut options = OpenOptions::new();
        options
            .read(access != libc::O_WRONLY)
            .write(access != libc::O_RDONLY)
            .custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL));
        if let Some(mode) = create_mode {
            if flags & libc::O_EXCL != 0 {
                options.create_new(true);
            } else {
                options.create(true);
            }
            options.mode(mode);
        }
        let real = fs.real(path);
        debug!(path = %real.display(), flags, "Opening host file");
        Ok(Self {
            file: options.open(real)?,
        })
    }
}

impl FileHandle for XmpFile {
    type Fs = XmpFs;

    const OPERATIONS: OperationSet = OperationSet::of(&[
        Operation::Read,
        Operation::Write,
        Operation::Release,
        Operation::Fsync,
        Operation::Flush,
        Operation::Fgetattr,
        Operation::Ftruncate,
    ]);

    fn open(fs: &Arc<XmpFs>, path: &Path, flags: i32) -> OpResult<Self> {
        Self::open_with(fs, path, flags, None)
    }

    fn create(fs: &Arc<XmpFs>, path: &Path, flags: i32, mode: u32) -> OpResult<Self> {
        Self::open_with(fs, path, flags, Some(mode))
    }

    fn read(&self, size: u32, offset: u64) -> OpResult<Vec<u8>> {
        let mut buf = vec![0; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], offset + filled as u64)? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&self, data: &[u8], offset: u64) -> OpResult<u32> {
        self.file.write_all_at(data, offset)?;
        Ok(data.len() as u32)
    }

    fn release(&self, _flags: i32) -> OpResult<()> {
        // The host file closes when the handle is dropped.
        Ok(())
    }

    fn fsync(&self, datasync: bool) -> OpResult<()> {
        if datasync {
            self.file.sync_data()?;
        } else {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn flush(&self) -> OpResult<()> {
        // Closing a duplicate descriptor reports deferred write errors
        // without closing the handle itself.
        drop(self.file.try_clone()?);
        Ok(())
    }

    fn fgetattr(&self) -> OpResult<Stat> {
        Ok(Stat::from(&self.file.metadata()?))
    }

    fn ftruncate(&self, size: u64) -> OpResult<()> {
        Ok(self.file.set_len(size)?)
    }
}

/// An open host directory.
#[derive(Debug)]
pub struct XmpDir {
    path: PathBuf,
}

impl DirHandle for XmpDir {
    type Fs = XmpFs;

    const OPERATIONS: OperationSet = OperationSet::of(&[
        Operation::Readdir,
        Operation::Fsyncdir,
        Operation::Releasedir,
    ]);

    fn opendir(fs: &Arc<XmpFs>, path: &Path) -> OpResult<Self> {
        let real = fs.real(path);
        if !fs::metadata(&real)?.is_dir() {
            return Err(OpError::errno(libc::ENOTDIR));
        }
        Ok(Self { path: real })
    }

    fn readdir(&self, _offset: i64) -> OpResult<Vec<Direntry>> {
        let mut entries = vec![
            Direntry::new(".").with_kind(libc::S_IFDIR as u32),
            Direntry::new("..").with_kind(libc::S_IFDIR as u32),
        ];
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let kind = entry.file_type().map_or(0, type_bits);
            entries.push(Direntry::new(entry.file_name()).with_kind(kind));
        }
        Ok(entries)
    }

    fn fsyncdir(&self, _datasync: bool) -> OpResult<()> {
        Ok(File::open(&self.path)?.sync_all()?)
    }
}

#[cfg(test)]
mod tests {
    use fuseshim::{DispatchBuilder, DispatchTable};

    use super::*;

    fn mirror() -> (tempfile::TempDir, DispatchTable) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file.txt"), b"mirrored").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let table = DispatchBuilder::new(Arc::new(XmpFs::new(dir.path())))
            .file_class::<XmpFile>()
            .dir_class::<XmpDir>()
            .build();
        (dir, table)
    }

    #[test]
    fn test_real_path_mapping() {
        let fs = XmpFs::new("/srv/data");
        assert_eq!(fs.real(Path::new("/")), PathBuf::from("/srv/data"));
        assert_eq!(fs.real(Path::new("/a/b")), PathBuf::from("/srv/data/a/b"));
        assert!(!fs.set_root("/other"));

        let unset = XmpFs::default();
        assert_eq!(unset.root(), Path::new("/"));
        assert!(unset.set_root("/tmp"));
        assert_eq!(unset.root(), Path::new("/tmp"));
    }

    #[test]
    fn test_handle_classes_bind_stateful_ops() {
        let (_dir, table) = mirror();
        let ops = table.operations();
        for op in [
            Operation::Open,
            Operation::Create,
            Operation::Read,
            Operation::Write,
            Operation::Ftruncate,
            Operation::Opendir,
            Operation::Readdir,
            Operation::Releasedir,
        ] {
            assert!(ops.contains(op), "{op} should be bound");
        }
        assert!(!ops.contains(Operation::Lock));
    }

    #[test]
    fn test_open_read_write_through_handle() {
        let (dir, table) = mirror();
        let path = Path::new("/file.txt");

        let opened = table.open(path, libc::O_RDWR).unwrap();
        assert!(opened.retain);
        let fh = opened.handle.as_ref();
        assert_eq!(table.read(path, 100, 0, fh).unwrap(), b"mirrored");
        assert_eq!(table.write(path, b"MIR", 0, fh).unwrap(), 3);
        table.flush(path, fh).unwrap();
        assert_eq!(table.fgetattr(path, fh).unwrap().st_size, 8);
        table.ftruncate(path, 3, fh).unwrap();
        table.release(path, 0, fh).unwrap();

        assert_eq!(fs::read(dir.path().join("file.txt")).unwrap(), b"MIR");
    }

    #[test]
    fn test_create_and_listing() {
        let (dir, table) = mirror();
        let opened = table
            .create(Path::new("/new.txt"), libc::O_WRONLY | libc::O_CREAT, 0o600)
            .unwrap();
        table
            .write(Path::new("/new.txt"), b"x", 0, opened.handle.as_ref())
            .unwrap();
        assert!(dir.path().join("new.txt").exists());

        let handle = table.opendir(Path::new("/")).unwrap();
        let mut names: Vec<_> = table
            .readdir(Path::new("/"), 0, handle.as_ref())
            .unwrap()
            .into_iter()
            .map(|e| e.name.into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, [".", "..", "file.txt", "new.txt", "sub"]);
    }

    #[test]
    fn test_path_ops_and_errors() {
        let (dir, table) = mirror();
        table.mkdir(Path::new("/made"), 0o755).unwrap();
        assert!(table.getattr(Path::new("/made")).unwrap().is_dir());

        table
            .rename(Path::new("/file.txt"), Path::new("/made/moved.txt"))
            .unwrap();
        assert!(dir.path().join("made/moved.txt").exists());

        table.truncate(Path::new("/made/moved.txt"), 2).unwrap();
        assert_eq!(table.getattr(Path::new("/made/moved.txt")).unwrap().st_size, 2);

        table
            .symlink(Path::new("made/moved.txt"), Path::new("/link"))
            .unwrap();
        assert_eq!(
            table.readlink(Path::new("/link")).unwrap(),
            PathBuf::from("made/moved.txt")
        );

        let err = table.getattr(Path::new("/missing")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        let err = table.rmdir(Path::new("/made")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOTEMPTY);
    }

    #[test]
    fn test_utimens_sets_times_without_opening() {
        use std::os::unix::fs::MetadataExt;

        let (dir, table) = mirror();
        let file = dir.path().join("file.txt");
        fs::set_permissions(&file, fs::Permissions::from_mode(0o200)).unwrap();
        table
            .utimens(Path::new("/file.txt"), 1_000_000_000, 0, 1_500_000_000, 250)
            .unwrap();
        let meta = fs::metadata(&file).unwrap();
        assert_eq!(meta.atime(), 1_000_000_000);
        assert_eq!(meta.mtime(), 1_500_000_000);
        assert_eq!(meta.mtime_nsec(), 250);

        // The link itself is updated, never its (missing) target.
        std::os::unix::fs::symlink("nowhere", dir.path().join("dangling")).unwrap();
        table.utimens(Path::new("/dangling"), 7, 0, 7, 0).unwrap();
        assert_eq!(fs::symlink_metadata(dir.path().join("dangling")).unwrap().mtime(), 7);
    }
}
