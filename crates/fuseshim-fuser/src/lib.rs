//! In-process FUSE engine for fuseshim dispatch tables.
//!
//! [`FuserEngine`] implements [`fuseshim::Engine`] on top of the `fuser`
//! crate. It reads the assembled command line back into mount options,
//! translates the kernel's inode-based requests into the path-based calls a
//! [`fuseshim::DispatchTable`] expects, and keeps the handles that `open`,
//! `create` and `opendir` ask it to retain.
//!
//! # Usage
//!
//! ```ignore
//! use fuseshim::Service;
//! use fuseshim_fuser::FuserEngine;
//!
//! let mut service = Service::new(MyFs::default(), FuserEngine::new());
//! service.parse(std::env::args_os())?;
//! service.run(None)?;
//! ```
//!
//! In multithreaded mode requests are served by a worker pool sized by
//! [`EngineConfig::workers`]; `-s` on the command line forces a single
//! thread.

pub mod attr;
pub mod config;
pub mod engine;
pub mod filesystem;
pub mod handles;
pub mod inode;
pub mod mount_args;
pub mod notify;
pub mod worker;

pub use config::{DEFAULT_FSNAME, DEFAULT_TTL, EngineConfig};
pub use engine::{ENGINE_API_VERSION, ENGINE_HELP, FuserEngine};
pub use filesystem::ShimFs;
pub use handles::{HandleTable, NO_HANDLE};
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
pub use mount_args::MountArgs;
pub use notify::Invalidator;
pub use worker::Dispatcher;
