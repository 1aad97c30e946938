//! Inode management for the FUSE session.
//!
//! The kernel protocol names files by inode number; dispatch tables name
//! them by path. This table maps between the two and tracks the kernel's
//! lookup count for each inode so entries are dropped only on `forget`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::one::Ref;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Absolute path within the filesystem, `/` for the root.
    pub path: PathBuf,
    /// Lookup count for `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn with_count(path: PathBuf, nlookup: u64) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count` and returns the new value.
    /// Returns `None` if the count would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe table mapping between inodes and paths.
pub struct InodeTable {
    path_to_ino: DashMap<PathBuf, u64>,
    entries: DashMap<u64, InodeEntry>,
    next_ino: AtomicU64,
}

impl InodeTable {
    /// Creates a table with the root directory pre-allocated.
    pub fn new() -> Self {
        let table = Self {
            path_to_ino: DashMap::new(),
            entries: DashMap::new(),
            next_ino: AtomicU64::new(ROOT_INODE + 1),
        };
        let root = PathBuf::from("/");
        table.path_to_ino.insert(root.clone(), ROOT_INODE);
        table.entries.insert(ROOT_INODE, InodeEntry::with_count(root, 1));
        table
    }

    /// Returns the inode for `path`, allocating one if needed, and counts a
    /// lookup against it.
    pub fn get_or_insert(&self, path: &Path) -> u64 {
        if let Some(ino) = self.get_inode(path)
            && let Some(entry) = self.entries.get(&ino)
        {
            entry.inc_nlookup();
            return ino;
        }
        self.insert_with_count(path, 1)
    }

    /// Returns the inode for `path` without counting a lookup. Used for
    /// `readdir`, which does not affect the kernel's lookup count.
    pub fn get_or_insert_no_lookup(&self, path: &Path) -> u64 {
        if let Some(ino) = self.get_inode(path) {
            return ino;
        }
        self.insert_with_count(path, 0)
    }

    fn insert_with_count(&self, path: &Path, nlookup: u64) -> u64 {
        *self
            .path_to_ino
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
                self.entries
                    .insert(ino, InodeEntry::with_count(path.to_path_buf(), nlookup));
                ino
            })
    }

    pub fn get(&self, ino: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.entries.get(&ino)
    }

    /// The current path of `ino`.
    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.entries.get(&ino).map(|e| e.path.clone())
    }

    /// The path of `name` inside directory `parent`.
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.entries.get(&parent).map(|e| e.path.join(name))
    }

    pub fn get_inode(&self, path: &Path) -> Option<u64> {
        self.path_to_ino.get(path).map(|r| *r)
    }

    /// Decrements the lookup count of `ino`, evicting it when the count
    /// reaches zero. Returns `true` if the inode was evicted. The root is
    /// never evicted.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        let remaining = match self.entries.get(&ino) {
            Some(entry) => entry.dec_nlookup(nlookup),
            None => return false,
        };
        if remaining != Some(0) {
            return false;
        }
        match self.entries.remove(&ino) {
            Some((_, entry)) => {
                self.path_to_ino.remove_if(&entry.path, |_, v| *v == ino);
                true
            }
            None => false,
        }
    }

    /// Drops the mapping for `path` after it was deleted. The inode itself
    /// stays until the kernel forgets it.
    pub fn invalidate_path(&self, path: &Path) {
        self.path_to_ino.remove(path);
    }

    /// Moves `from` and everything below it to `to`, replacing whatever
    /// `to` mapped before.
    pub fn rename(&self, from: &Path, to: &Path) {
        let moved: Vec<(PathBuf, u64)> = self
            .path_to_ino
            .iter()
            .filter(|e| e.key().starts_with(from))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        self.path_to_ino.retain(|p, _| !p.starts_with(to));

        for (old, ino) in moved {
            let Ok(rel) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rel.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rel)
            };
            self.path_to_ino.remove_if(&old, |_, v| *v == ino);
            self.path_to_ino.insert(new.clone(), ino);
            if let Some(mut entry) = self.entries.get_mut(&ino) {
                entry.path = new;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table only contains the root inode.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
