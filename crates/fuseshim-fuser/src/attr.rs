//! Conversion of dispatch-table attribute values to fuser's types.

use std::time::SystemTime;

use fuser::{FileAttr, FileType};
use fuseshim::{Stat, Timespec};

const BLOCK_SIZE: u32 = 512;

/// Maps `S_IF*` type bits to a fuser file type. Unknown bits are treated
/// as a regular file.
pub fn file_type(mode: u32) -> FileType {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
        m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
        m if m == libc::S_IFIFO as u32 => FileType::NamedPipe,
        m if m == libc::S_IFSOCK as u32 => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn system_time(secs: i64) -> SystemTime {
    Timespec::new(secs, 0).to_system_time()
}

/// Builds the kernel attributes for inode `ino` from a [`Stat`].
///
/// The inode number always comes from the engine's inode table, whatever
/// `st_ino` says.
pub fn file_attr(ino: u64, stat: &Stat) -> FileAttr {
    let ctime = system_time(stat.st_ctime);
    FileAttr {
        ino,
        size: stat.st_size,
        blocks: stat.st_size.div_ceil(u64::from(BLOCK_SIZE)),
        atime: system_time(stat.st_atime),
        mtime: system_time(stat.st_mtime),
        ctime,
        crtime: ctime,
        kind: file_type(stat.st_mode),
        perm: (stat.st_mode & 0o7777) as u16,
        nlink: stat.st_nlink.max(1),
        uid: stat.st_uid,
        gid: stat.st_gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}
