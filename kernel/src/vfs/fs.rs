use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt::Debug;

use crate::error::FsResult;

use super::{FilePath, OpenFile, OpenFlags};

/// A file system implementation, registered with the VFS under its name.
pub trait FileSystemDriver: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Attaches the file system found on the named block device.
    fn mount(&self, device: &str) -> FsResult<Arc<dyn FileSystem>>;
}

/// One mounted file system. Paths handed in are relative to its root.
pub trait FileSystem: Debug + Send + Sync {
    /// Flushes everything to the device. Fails with `Busy` while files are
    /// open, in which case the file system stays usable.
    fn unmount(&self) -> FsResult<()>;

    fn open(self: Arc<Self>, path: &FilePath, flags: OpenFlags) -> FsResult<Box<dyn OpenFile>>;

    fn unlink(&self, path: &FilePath) -> FsResult<()>;
}
