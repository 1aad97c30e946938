//! Shared fixtures for fuseshim integration tests.

#![allow(dead_code)]

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use fuseshim::{
    Direntry, DispatchTable, Engine, EngineError, EngineProbe, FileHandle, Filesystem, Handle,
    OpResult, Open, Operation, OperationSet, ProbeError, Stat,
};

/// Help text in the shape a FUSE engine prints for `-ho`.
pub const ENGINE_HELP: &str = "\
FUSE options:
    -d   -o debug          enable debug output (implies -f)
    -o allow_other         allow access to other users
    -o allow_root          allow access to root
    -o max_read=N          set maximum size of read requests
    -o [no]auto_cache      enable caching based on modification times
    -o fsname=NAME         set filesystem name
";

/// One call to [`MockEngine::main`].
#[derive(Debug, Clone)]
pub struct Invocation {
    pub operations: OperationSet,
    pub multithreaded: bool,
    pub args: Vec<OsString>,
}

/// An engine that records its invocations instead of mounting.
#[derive(Debug, Clone)]
pub struct MockEngine {
    pub version: u32,
    pub fail_with: Option<fn() -> EngineError>,
    /// Whether the engine binary is missing, so no help text can be read.
    pub missing: bool,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl MockEngine {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            fail_with: None,
            missing: false,
            invocations: Arc::default(),
        }
    }

    /// An engine whose service loop always fails to start.
    pub fn failing(version: u32) -> Self {
        Self {
            fail_with: Some(|| EngineError::NoMountpoint),
            ..Self::new(version)
        }
    }

    /// An engine whose binary cannot be run.
    pub fn missing(version: u32) -> Self {
        Self {
            missing: true,
            ..Self::new(version)
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn last(&self) -> Invocation {
        self.invocations().pop().expect("engine was never invoked")
    }
}

impl EngineProbe for MockEngine {
    fn api_version(&self) -> Result<u32, ProbeError> {
        Ok(self.version)
    }

    fn help_text(&self) -> Result<String, ProbeError> {
        if self.missing {
            return Err(ProbeError::Spawn {
                program: "mock-engine".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(ENGINE_HELP.to_string())
    }
}

impl Engine for MockEngine {
    fn main(
        &self,
        table: DispatchTable,
        multithreaded: bool,
        args: &[OsString],
    ) -> Result<(), EngineError> {
        self.invocations.lock().unwrap().push(Invocation {
            operations: table.operations(),
            multithreaded,
            args: args.to_vec(),
        });
        match self.fail_with {
            Some(err) => Err(err()),
            None => Ok(()),
        }
    }
}

/// A filesystem with a single read-only file, `/hello`.
pub struct HelloFs;

pub const HELLO_CONTENT: &[u8] = b"Hello World!\n";

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
        match path.to_str() {
            Some("/") => Ok(Stat::directory(0o755)),
            Some("/hello") => Ok(Stat::regular(0o444, HELLO_CONTENT.len() as u64)),
            _ => Err(io::Error::from_raw_os_error(libc::ENOENT).into()),
        }
    }

    fn readdir(&self, path: &Path, _offset: i64, _fh: Option<&Handle>) -> OpResult<Vec<Direntry>> {
        if path != Path::new("/") {
            return Err(io::Error::from_raw_os_error(libc::ENOENT).into());
        }
        Ok(vec![
            Direntry::new("."),
            Direntry::new(".."),
            Direntry::new("hello"),
        ])
    }

    fn open(&self, path: &Path, flags: i32) -> OpResult<Open> {
        if path != Path::new("/hello") {
            return Err(io::Error::from_raw_os_error(libc::ENOENT).into());
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(io::Error::from_raw_os_error(libc::EACCES).into());
        }
        Ok(Open::Stateless)
    }

    fn read(&self, path: &Path, size: u32, offset: u64, _fh: Option<&Handle>) -> OpResult<Vec<u8>> {
        if path != Path::new("/hello") {
            return Err(io::Error::from_raw_os_error(libc::ENOENT).into());
        }
        let start = (offset as usize).min(HELLO_CONTENT.len());
        let end = (start + size as usize).min(HELLO_CONTENT.len());
        Ok(HELLO_CONTENT[start..end].to_vec())
    }
}

/// A filesystem whose top-level `read` must never be reached once
/// [`MemFile`] is registered.
#[derive(Default)]
pub struct ShadowedFs {
    pub top_level_reads: Mutex<usize>,
}

impl Filesystem for ShadowedFs {
    fn operations(&self) -> OperationSet {
        OperationSet::of(&[Operation::Read, Operation::Getattr])
    }

    fn getattr(&self, _path: &Path) -> OpResult<Stat> {
        Ok(Stat::regular(0o644, 0))
    }

    fn read(&self, _path: &Path, _size: u32, _offset: u64, _fh: Option<&Handle>) -> OpResult<Vec<u8>> {
        *self.top_level_reads.lock().unwrap() += 1;
        Ok(Vec::new())
    }
}

/// A file handle class serving the path it was opened with as content.
pub struct MemFile {
    content: Vec<u8>,
    pub released: Arc<Mutex<bool>>,
}

impl FileHandle for MemFile {
    type Fs = ShadowedFs;
    const OPERATIONS: OperationSet = OperationSet::of(&[Operation::Read, Operation::Release]);

    fn open(_fs: &Arc<ShadowedFs>, path: &Path, _flags: i32) -> OpResult<Self> {
        Ok(Self {
            content: path.to_string_lossy().into_owned().into_bytes(),
            released: Arc::default(),
        })
    }

    fn read(&self, size: u32, offset: u64) -> OpResult<Vec<u8>> {
        let start = (offset as usize).min(self.content.len());
        let end = (start + size as usize).min(self.content.len());
        Ok(self.content[start..end].to_vec())
    }

    fn release(&self, _flags: i32) -> OpResult<()> {
        *self.released.lock().unwrap() = true;
        Ok(())
    }
}
