use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::block::BufferCache;
use crate::error::FsResult;
use crate::fs::Clock;
use crate::vfs::{
    DirEntryRecord, FilePath, FileSystem, FileSystemDriver, OpenFile, OpenFlags, Whence,
};

use super::{FatFile, FatFs};

/// Name the driver registers under, as used in `rootfstype=`.
pub const FAT_DRIVER_NAME: &str = "FAT";

/// Mounts FAT12/16/32 volumes found on block devices known to the cache.
#[derive(Debug)]
pub struct FatDriver {
    cache: Arc<BufferCache>,
    clock: Option<Arc<dyn Clock>>,
}

impl FatDriver {
    pub fn new(cache: Arc<BufferCache>) -> Self {
        Self { cache, clock: None }
    }

    /// New files and writes get timestamps from `clock`. Without one they
    /// keep the zero timestamp.
    pub fn with_clock(cache: Arc<BufferCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock: Some(clock),
        }
    }
}

impl FileSystemDriver for FatDriver {
    fn name(&self) -> &str {
        FAT_DRIVER_NAME
    }

    fn mount(&self, device: &str) -> FsResult<Arc<dyn FileSystem>> {
        let fs = FatFs::mount(Arc::clone(&self.cache), device, self.clock.clone())?;
        Ok(Arc::new(fs))
    }
}

impl FileSystem for FatFs {
    fn unmount(&self) -> FsResult<()> {
        self.detach()
    }

    fn open(self: Arc<Self>, path: &FilePath, flags: OpenFlags) -> FsResult<Box<dyn OpenFile>> {
        Ok(Box::new(FatFile::open(self, path, flags)?))
    }

    fn unlink(&self, path: &FilePath) -> FsResult<()> {
        Self::remove_file(self, path)
    }
}

impl OpenFile for FatFile {
    fn read(&mut self, offset: &mut u64, buf: &mut [u8]) -> FsResult<usize> {
        self.read_bytes(offset, buf)
    }

    fn write(&mut self, offset: &mut u64, data: &[u8]) -> FsResult<usize> {
        self.write_bytes(offset, data)
    }

    fn lseek(&mut self, offset: &mut u64, delta: i64, whence: Whence) -> FsResult<u64> {
        self.seek(offset, delta, whence)
    }

    fn readdir(&mut self, index: usize) -> FsResult<DirEntryRecord> {
        self.dir_entry(index)
    }

    fn close(self: Box<Self>) -> FsResult<()> {
        self.close_file();
        Ok(())
    }
}
