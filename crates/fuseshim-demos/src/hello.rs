//! A filesystem holding one read-only file, `/hello`.

use std::path::Path;

use fuseshim::{
    Direntry, Filesystem, Handle, OpError, OpResult, Open, Operation, OperationSet, Stat,
};

pub const HELLO_PATH: &str = "/hello";
pub const HELLO_CONTENT: &[u8] = b"Hello World!\n";

#[derive(Debug, Default)]
pub struct HelloFs;

impl Filesystem for HelloFs {
    fn operations(&self) -> OperationSet {
        OperationSet::of(&[
            Operation::Getattr,
            Operation::Readdir,
            Operation::Open,
            Operation::Read,
        ])
    }

    fn getattr(&self, path: &Path) -> OpResult<Stat> {
        if path == Path::new("/") {
            Ok(Stat::directory(0o755))
        } else if path == Path::new(HELLO_PATH) {
            Ok(Stat::regular(0o444, HELLO_CONTENT.len() as u64))
        } else {
            Err(OpError::errno(libc::ENOENT))
        }
    }

    fn readdir(&self, path: &Path, _offset: i64, _fh: Option<&Handle>) -> OpResult<Vec<Direntry>> {
        if path != Path::new("/") {
            return Err(OpError::errno(libc::ENOTDIR));
        }
        Ok(vec![
            Direntry::new(".").with_kind(libc::S_IFDIR as u32),
            Direntry::new("..").with_kind(libc::S_IFDIR as u32),
            Direntry::new(&HELLO_PATH[1..]).with_kind(libc::S_IFREG as u32),
        ])
    }

    fn open(&self, path: &Path, flags: i32) -> OpResult<Open> {
        if path != Path::new(HELLO_PATH) {
            return Err(OpError::errno(libc::ENOENT));
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(OpError::errno(libc::EACCES));
        }
        Ok(Open::Stateless)
    }

    fn read(&self, path: &Path, size: u32, offset: u64, _fh: Option<&Handle>) -> OpResult<Vec<u8>> {
        if path != Path::new(HELLO_PATH) {
            return Err(OpError::errno(libc::ENOENT));
        }
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(HELLO_CONTENT.len());
        let end = start.saturating_add(size as usize).min(HELLO_CONTENT.len());
        Ok(HELLO_CONTENT[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fuseshim::DispatchBuilder;

    use super::*;

    #[test]
    fn test_read_windows() {
        let table = DispatchBuilder::new(Arc::new(HelloFs)).build();
        let path = Path::new(HELLO_PATH);
        assert_eq!(table.read(path, 5, 0, None).unwrap(), b"Hello");
        assert_eq!(table.read(path, 100, 6, None).unwrap(), b"World!\n");
        assert!(table.read(path, 10, 1000, None).unwrap().is_empty());
    }

    #[test]
    fn test_write_access_denied() {
        let table = DispatchBuilder::new(Arc::new(HelloFs)).build();
        let err = table.open(Path::new(HELLO_PATH), libc::O_RDWR).unwrap_err();
        assert_eq!(err.errno(), libc::EACCES);
        let err = table.getattr(Path::new("/nope")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn test_listing() {
        let table = DispatchBuilder::new(Arc::new(HelloFs)).build();
        let names: Vec<_> = table
            .readdir(Path::new("/"), 0, None)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, [".", "..", "hello"]);
        assert!(!table.contains(Operation::Write));
    }
}
