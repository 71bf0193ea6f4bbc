//! Block devices and the sector buffer cache that sits on top of them.

mod cache;
mod ramdisk;

pub use cache::*;
pub use ramdisk::*;

use core::fmt::Debug;

use crate::error::FsResult;

/// A device that reads and writes fixed-size sectors.
pub trait BlockDeviceDriver: Debug + Send + Sync {
    fn device_name(&self) -> &str;

    fn device_block_size(&self) -> BlockSize;

    /// Whether the device finished probing and can take requests.
    fn initialized(&self) -> bool {
        true
    }

    /// Reads `buf.len() / device_block_size()` device blocks starting at
    /// `start_block`.
    fn read_device_blocks(&self, start_block: BlockIndex, buf: &mut [u8]) -> FsResult<()>;

    /// Writes `data.len() / device_block_size()` device blocks starting at
    /// `start_block`.
    fn write_device_blocks(&self, start_block: BlockIndex, data: &[u8]) -> FsResult<()>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockSize(u16);

impl BlockSize {
    pub const MIN: Self = Self(512);
    pub const MAX: Self = Self(8192);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Sector sizes the cache can work with: a power of two in 512..=8192.
    pub fn is_supported(self) -> bool {
        self.0.is_power_of_two() && (Self::MIN.0..=Self::MAX.0).contains(&self.0)
    }

    pub fn bytes(self) -> usize {
        usize::from(self.0)
    }
}

impl From<u16> for BlockSize {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<BlockSize> for u16 {
    fn from(value: BlockSize) -> Self {
        value.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIndex(u64);

impl BlockIndex {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl From<u64> for BlockIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BlockIndex> for u64 {
    fn from(value: BlockIndex) -> Self {
        value.0
    }
}

/// Small integer naming a device registered with the buffer cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

impl DeviceId {
    pub const fn index(self) -> usize {
        self.0
    }
}
