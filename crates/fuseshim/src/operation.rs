//! The fixed set of dispatchable filesystem operations.
//!
//! Every callback the engine can invoke has a name from [`Operation`].
//! Implementations declare the subset they provide with an [`OperationSet`],
//! which replaces run-time method discovery: the dispatch table is built
//! once from these declarations and never consults them again.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// A dispatchable filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Getattr,
    Readlink,
    Readdir,
    Mknod,
    Mkdir,
    Unlink,
    Rmdir,
    Symlink,
    Rename,
    Link,
    Chmod,
    Chown,
    Truncate,
    Utime,
    Open,
    Read,
    Write,
    Release,
    Statfs,
    Fsync,
    Create,
    Opendir,
    Releasedir,
    Fsyncdir,
    Flush,
    Fgetattr,
    Ftruncate,
    Getxattr,
    Listxattr,
    Setxattr,
    Removexattr,
    Access,
    Lock,
    Utimens,
    Bmap,
    Fsinit,
    Fsdestroy,
    Ioctl,
    Poll,
}

impl Operation {
    /// All operations, in engine table order.
    pub const ALL: [Operation; 39] = [
        Operation::Getattr,
        Operation::Readlink,
        Operation::Readdir,
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
        Operation::Utime,
        Operation::Open,
        Operation::Read,
        Operation::Write,
        Operation::Release,
        Operation::Statfs,
        Operation::Fsync,
        Operation::Create,
        Operation::Opendir,
        Operation::Releasedir,
        Operation::Fsyncdir,
        Operation::Flush,
        Operation::Fgetattr,
        Operation::Ftruncate,
        Operation::Getxattr,
        Operation::Listxattr,
        Operation::Setxattr,
        Operation::Removexattr,
        Operation::Access,
        Operation::Lock,
        Operation::Utimens,
        Operation::Bmap,
        Operation::Fsinit,
        Operation::Fsdestroy,
        Operation::Ioctl,
        Operation::Poll,
    ];

    /// The operation's engine-facing name.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Getattr => "getattr",
            Operation::Readlink => "readlink",
            Operation::Readdir => "readdir",
            Operation::Mknod => "mknod",
            Operation::Mkdir => "mkdir",
            Operation::Unlink => "unlink",
            Operation::Rmdir => "rmdir",
            Operation::Symlink => "symlink",
            Operation::Rename => "rename",
            Operation::Link => "link",
            Operation::Chmod => "chmod",
            Operation::Chown => "chown",
            Operation::Truncate => "truncate",
            Operation::Utime => "utime",
            Operation::Open => "open",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Release => "release",
            Operation::Statfs => "statfs",
            Operation::Fsync => "fsync",
            Operation::Create => "create",
            Operation::Opendir => "opendir",
            Operation::Releasedir => "releasedir",
            Operation::Fsyncdir => "fsyncdir",
            Operation::Flush => "flush",
            Operation::Fgetattr => "fgetattr",
            Operation::Ftruncate => "ftruncate",
            Operation::Getxattr => "getxattr",
            Operation::Listxattr => "listxattr",
            Operation::Setxattr => "setxattr",
            Operation::Removexattr => "removexattr",
            Operation::Access => "access",
            Operation::Lock => "lock",
            Operation::Utimens => "utimens",
            Operation::Bmap => "bmap",
            Operation::Fsinit => "fsinit",
            Operation::Fsdestroy => "fsdestroy",
            Operation::Ioctl => "ioctl",
            Operation::Poll => "poll",
        }
    }

    const fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown operation name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filesystem operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// A set of operations, stored as a bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperationSet(u64);

impl OperationSet {
    /// The empty set.
    pub const EMPTY: OperationSet = OperationSet(0);

    /// Builds a set from a slice of operations. Usable in `const` context so
    /// handle classes can declare their operations as associated constants.
    pub const fn of(ops: &[Operation]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < ops.len() {
            bits |= ops[i].bit();
            i += 1;
        }
        OperationSet(bits)
    }

    pub const fn contains(self, op: Operation) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn insert(&mut self, op: Operation) {
        self.0 |= op.bit();
    }

    pub fn remove(&mut self, op: Operation) {
        self.0 &= !op.bit();
    }

    #[must_use]
    pub const fn union(self, other: OperationSet) -> OperationSet {
        OperationSet(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: OperationSet) -> OperationSet {
        OperationSet(self.0 & other.0)
    }

    #[must_use]
    pub const fn difference(self, other: OperationSet) -> OperationSet {
        OperationSet(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates members in [`Operation::ALL`] order.
    pub fn iter(self) -> impl Iterator<Item = Operation> {
        Operation::ALL.into_iter().filter(move |op| self.contains(*op))
    }
}

impl fmt::Debug for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Operation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut set = OperationSet::EMPTY;
        for op in iter {
            set.insert(op);
        }
        set
    }
}

/// Per-handle file operations, serviced by a file handle class when one is
/// registered.
pub const STATEFUL_FILE_OPS: OperationSet = OperationSet::of(&[
    Operation::Read,
    Operation::Write,
    Operation::Fsync,
    Operation::Release,
    Operation::Flush,
    Operation::Fgetattr,
    Operation::Ftruncate,
    Operation::Lock,
]);

/// Per-handle directory operations, serviced by a directory handle class
/// when one is registered.
pub const STATEFUL_DIR_OPS: OperationSet = OperationSet::of(&[
    Operation::Readdir,
    Operation::Fsyncdir,
    Operation::Releasedir,
]);
