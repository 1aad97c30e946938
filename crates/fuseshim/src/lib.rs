//! Mount-option negotiation and operation dispatch for userspace
//! filesystems.
//!
//! This crate sits between a filesystem implementation and the engine that
//! speaks the kernel protocol. It provides:
//!
//! - [`FuseArgs`], the canonical form of a FUSE command line, and
//!   [`OptionParser`], which builds one from `argv`
//! - [`CapabilityResolver`], which maps capability names to the engine API
//!   version that first provides them
//! - [`DispatchBuilder`], which turns a [`Filesystem`] and optional handle
//!   classes into the [`DispatchTable`] an [`Engine`] runs
//! - [`Service`], which drives all of the above
//!
//! While a request is being served, [`context::current`] reports the
//! credentials of the process that issued it.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use fuseshim::{Filesystem, OpResult, Operation, OperationSet, Stat};
//!
//! struct Empty;
//!
//! impl Filesystem for Empty {
//!     fn operations(&self) -> OperationSet {
//!         OperationSet::of(&[Operation::Getattr])
//!     }
//!
//!     fn getattr(&self, path: &Path) -> OpResult<Stat> {
//!         if path == Path::new("/") {
//!             Ok(Stat::directory(0o755))
//!         } else {
//!             Err(fuseshim::OpError::Errno(libc::ENOENT))
//!         }
//!     }
//! }
//! ```

pub mod capability;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod filesystem;
pub mod operation;
pub mod options;
pub mod parser;
pub mod service;
pub mod types;

pub use capability::{BASELINE_VERSION, CapabilityGraph, CapabilityResolver, Feature};
pub use context::Context;
pub use dispatch::{
    DirHandle, DispatchBuilder, DispatchTable, Fault, FileHandle, Handle, OpError, OpResult, Open,
    Opened, Reply,
};
pub use engine::{Engine, EngineProbe, ProcessProbe};
pub use error::{
    CapabilityError, ConfigError, EngineError, OptionError, ParseError, ProbeError, ServiceError,
};
pub use filesystem::Filesystem;
pub use operation::{Operation, OperationSet, STATEFUL_DIR_OPS, STATEFUL_FILE_OPS};
pub use options::{FuseArgs, Modifier, OptValue};
pub use parser::{
    MountOpt, OptionParser, ParsedCommandLine, ParserConfig, SingleThreadPolicy, ThreadingSwitch,
};
pub use service::Service;
pub use types::{Direntry, FileInfo, Flock, Stat, StatVfs, Timespec, Xattr};
