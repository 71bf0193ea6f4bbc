use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{FsError, FsResult};
use crate::sync::SpinLock;

use super::{BlockDeviceDriver, BlockIndex, BlockSize};

/// Block device backed by a heap buffer. Used for initrd-style images and as
/// the test double for the cache and the FAT driver, so it can also be told
/// to fail the next few requests.
#[derive(Debug)]
pub struct RamDisk {
    name: String,
    block_size: BlockSize,
    data: SpinLock<Vec<u8>>,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RamDisk {
    pub fn new(name: &str, block_size: BlockSize, num_blocks: usize) -> Self {
        Self::from_image(name, block_size, vec![0; num_blocks * block_size.bytes()])
    }

    /// Wraps an existing image. A trailing partial block is not addressable.
    pub fn from_image(name: &str, block_size: BlockSize, image: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            block_size,
            data: SpinLock::new(image),
            failing_reads: AtomicU32::new(0),
            failing_writes: AtomicU32::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn num_blocks(&self) -> u64 {
        (self.data.lock().len() / self.block_size.bytes()) as u64
    }

    /// Copy of the whole image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Makes the next `count` read requests fail with `IO`.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::Release);
    }

    /// Makes the next `count` write requests fail with `IO`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::Release);
    }

    /// Successful read requests so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    /// Successful write requests so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    fn range(&self, start_block: BlockIndex, len: usize, disk_len: usize) -> FsResult<core::ops::Range<usize>> {
        let block_size = self.block_size.bytes();
        if len % block_size != 0 {
            return Err(FsError::InvalidParam);
        }
        let start = usize::try_from(u64::from(start_block))
            .ok()
            .and_then(|block| block.checked_mul(block_size))
            .ok_or(FsError::InvalidParam)?;
        let end = start.checked_add(len).ok_or(FsError::InvalidParam)?;
        if end > disk_len {
            return Err(FsError::InvalidParam);
        }
        Ok(start..end)
    }
}

/// Decrements `counter` if it is positive. Returns whether it was.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl BlockDeviceDriver for RamDisk {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn device_block_size(&self) -> BlockSize {
        self.block_size
    }

    fn read_device_blocks(&self, start_block: BlockIndex, buf: &mut [u8]) -> FsResult<()> {
        if take_failure(&self.failing_reads) {
            return Err(FsError::IO);
        }
        let data = self.data.lock();
        let range = self.range(start_block, buf.len(), data.len())?;
        buf.copy_from_slice(&data[range]);
        self.reads.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn write_device_blocks(&self, start_block: BlockIndex, data: &[u8]) -> FsResult<()> {
        if take_failure(&self.failing_writes) {
            return Err(FsError::IO);
        }
        let mut disk = self.data.lock();
        let range = self.range(start_block, data.len(), disk.len())?;
        disk[range].copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_writes() {
        let disk = RamDisk::new("ram0", BlockSize::new(512), 4);
        disk.write_device_blocks(BlockIndex::new(2), &[7; 512]).unwrap();

        let mut buf = [0; 1024];
        disk.read_device_blocks(BlockIndex::new(1), &mut buf).unwrap();
        assert!(buf[..512].iter().all(|&b| b == 0));
        assert!(buf[512..].iter().all(|&b| b == 7));
        assert_eq!((disk.reads(), disk.writes()), (1, 1));
    }

    #[test]
    fn rejects_out_of_range_and_partial_blocks() {
        let disk = RamDisk::new("ram0", BlockSize::new(512), 4);
        let mut buf = [0; 512];
        assert_eq!(
            disk.read_device_blocks(BlockIndex::new(4), &mut buf),
            Err(FsError::InvalidParam)
        );
        assert_eq!(
            disk.write_device_blocks(BlockIndex::new(0), &[0; 100]),
            Err(FsError::InvalidParam)
        );
    }

    #[test]
    fn injected_failures_run_out() {
        let disk = RamDisk::new("ram0", BlockSize::new(512), 1);
        disk.fail_next_reads(2);
        let mut buf = [0; 512];
        assert_eq!(disk.read_device_blocks(BlockIndex::new(0), &mut buf), Err(FsError::IO));
        assert_eq!(disk.read_device_blocks(BlockIndex::new(0), &mut buf), Err(FsError::IO));
        assert_eq!(disk.read_device_blocks(BlockIndex::new(0), &mut buf), Ok(()));
    }
}
