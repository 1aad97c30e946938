//! Kernel cache invalidation for mounted dispatch tables.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::filesystem::Core;
use crate::inode::ROOT_INODE;

struct Target {
    notifier: fuser::Notifier,
    core: Arc<Core>,
}

/// Asks the kernel to drop what it has cached for a path.
///
/// Obtained from [`FuserEngine::invalidator`](crate::FuserEngine::invalidator)
/// before mounting and usable from any thread once the session is up.
/// Calling it from inside a request for the same path in single-threaded
/// mode can deadlock the session.
#[derive(Clone, Default)]
pub struct Invalidator {
    target: Arc<OnceLock<Target>>,
}

impl Invalidator {
    pub(crate) fn attach(&self, notifier: fuser::Notifier, core: Arc<Core>) {
        if self.target.set(Target { notifier, core }).is_err() {
            warn!("Invalidator already attached to a session, keeping the first");
        }
    }

    /// Whether a mounted session is connected.
    pub fn is_attached(&self) -> bool {
        self.target.get().is_some()
    }

    /// Invalidates the attributes, data and directory entry of `path`.
    ///
    /// Paths the kernel has never looked up are not cached and succeed
    /// without a notification. Fails with `ENOTCONN` before the filesystem
    /// is mounted.
    pub fn invalidate(&self, path: &Path) -> io::Result<()> {
        let target = self
            .target
            .get()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOTCONN))?;
        let Some(ino) = target.core.inode(path) else {
            debug!(path = %path.display(), "Nothing cached to invalidate");
            return Ok(());
        };
        target.notifier.inval_inode(ino, 0, 0)?;
        if ino != ROOT_INODE
            && let (Some(parent), Some(name)) = (path.parent(), path.file_name())
            && let Some(parent_ino) = target.core.inode(parent)
        {
            target.notifier.inval_entry(parent_ino, name)?;
        }
        debug!(path = %path.display(), ino, "Invalidated kernel cache");
        Ok(())
    }
}

impl fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invalidator")
            .field("attached", &self.is_attached())
            .finish()
    }
}
