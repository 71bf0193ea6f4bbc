use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{FsError, FsResult};
use crate::sync::SpinLock;

use super::{FilePath, FileSystem};

#[derive(Debug, Clone)]
pub struct Mount {
    pub path: FilePath,
    pub driver_name: String,
    pub fs: Arc<dyn FileSystem>,
}

/// Mounted file systems, deepest mount point first so the first prefix hit
/// is the longest one. Callers get clones of the entries and must not call
/// into drivers while the table is locked.
#[derive(Debug)]
pub struct MountTable {
    mounts: SpinLock<Vec<Mount>>,
}

impl MountTable {
    pub const fn new() -> Self {
        Self {
            mounts: SpinLock::new(Vec::new()),
        }
    }

    pub fn add(&self, mount: Mount) -> FsResult<()> {
        let mut mounts = self.mounts.lock_disable_interrupts();
        if mounts.iter().any(|existing| existing.path == mount.path) {
            return Err(FsError::FileExists);
        }
        let index = mounts
            .iter()
            .position(|existing| existing.path.depth() < mount.path.depth())
            .unwrap_or(mounts.len());
        mounts.insert(index, mount);
        Ok(())
    }

    pub fn remove(&self, path: &FilePath) -> Option<Mount> {
        let mut mounts = self.mounts.lock_disable_interrupts();
        let index = mounts.iter().position(|mount| mount.path == *path)?;
        Some(mounts.remove(index))
    }

    pub fn find_exact(&self, path: &FilePath) -> Option<Mount> {
        let mounts = self.mounts.lock_disable_interrupts();
        mounts.iter().find(|mount| mount.path == *path).cloned()
    }

    /// The mount owning `path` and the path relative to that mount's root.
    pub fn longest_prefix_match(&self, path: &FilePath) -> Option<(Mount, FilePath)> {
        let mounts = self.mounts.lock_disable_interrupts();
        mounts.iter().find_map(|mount| {
            let relative = path.strip_prefix(&mount.path)?;
            Some((mount.clone(), relative))
        })
    }

    pub fn uses_driver(&self, driver_name: &str) -> bool {
        let mounts = self.mounts.lock_disable_interrupts();
        mounts.iter().any(|mount| mount.driver_name == driver_name)
    }

    /// Mount points, deepest first.
    pub fn paths(&self) -> Vec<FilePath> {
        let mounts = self.mounts.lock_disable_interrupts();
        mounts.iter().map(|mount| mount.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.mounts.lock_disable_interrupts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
