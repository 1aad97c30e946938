//! Operation errors and their translation into engine return codes.
//!
//! Implementations return [`OpResult`]. The dispatch table wraps every call
//! with [`guard`], which turns the error side into a [`Fault`]: either a
//! plain errno the engine hands back to the kernel, or an error nobody
//! attached an errno to, which is kept intact so the engine can log it.

use std::io;

use thiserror::Error;
use tracing::{debug, warn};

use crate::operation::Operation;

/// Error returned by a filesystem operation.
#[derive(Debug, Error)]
pub enum OpError {
    /// An I/O error. Carries an errno when it came from the OS.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An explicit errno.
    #[error("{}", describe_errno(.0))]
    Errno(i32),

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OpError {
    pub fn errno(code: i32) -> Self {
        OpError::Errno(code)
    }

    /// The errno this error carries, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            OpError::Io(e) => e.raw_os_error(),
            OpError::Errno(code) => Some(*code),
            OpError::Other(e) => e
                .downcast_ref::<io::Error>()
                .and_then(io::Error::raw_os_error),
        }
    }
}

fn describe_errno(code: &i32) -> io::Error {
    io::Error::from_raw_os_error(*code)
}

/// Result type of filesystem operations.
pub type OpResult<T> = Result<T, OpError>;

/// Shorthand for the "not implemented" answer.
pub fn enosys<T>() -> OpResult<T> {
    Err(OpError::Errno(libc::ENOSYS))
}

/// A failed operation as the engine sees it.
#[derive(Debug, Error)]
pub enum Fault {
    /// The operation failed with this errno.
    #[error("errno {0}")]
    Errno(i32),

    /// The operation failed without an errno. The engine logs it and answers
    /// `EINVAL`.
    #[error("unhandled operation error: {0}")]
    Unhandled(OpError),
}

impl Fault {
    /// The errno handed to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            Fault::Errno(code) => *code,
            Fault::Unhandled(_) => libc::EINVAL,
        }
    }

    /// The engine's negative return code convention.
    pub fn as_return_code(&self) -> i32 {
        -self.errno()
    }
}

impl From<OpError> for Fault {
    fn from(err: OpError) -> Self {
        match err.raw_os_error() {
            Some(code) => Fault::Errno(code),
            None => Fault::Unhandled(err),
        }
    }
}

/// Result type of dispatch table entries.
pub type Reply<T> = Result<T, Fault>;

/// Translates an operation result. Pure; see [`guard`] for the logging
/// variant the dispatch table uses.
pub fn translate<T>(result: OpResult<T>) -> Reply<T> {
    result.map_err(Fault::from)
}

/// Translates an operation result and traces failures.
pub fn guard<T>(op: Operation, result: OpResult<T>) -> Reply<T> {
    translate(result).inspect_err(|fault| match fault {
        Fault::Errno(code) => debug!(op = %op, errno = code, "Operation failed"),
        Fault::Unhandled(err) => warn!(op = %op, error = %err, "Operation failed without an errno"),
    })
}
