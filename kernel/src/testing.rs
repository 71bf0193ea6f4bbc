//! Fixtures shared by the driver, VFS and syscall tests: freshly formatted
//! FAT volumes on RAM disks.

use alloc::sync::Arc;
use alloc::vec;

use ::fat::{format_volume, CalendarTime, FormatOptions};

use crate::block::{BlockSize, BufferCache, RamDisk};
use crate::fs::fat::FatFs;
use crate::fs::Clock;

pub(crate) const SECTOR: usize = 512;

/// Sector counts that give each FAT type its minimum sensible size with one
/// sector per cluster.
pub(crate) fn sectors_for(options: &FormatOptions) -> usize {
    match options.fat_type {
        ::fat::FatType::Fat12 => 2880,
        ::fat::FatType::Fat16 => 8192,
        ::fat::FatType::Fat32 => 66_600,
    }
}

pub(crate) fn formatted_disk(name: &str, options: &FormatOptions) -> Arc<RamDisk> {
    formatted_disk_filled(name, options, 0)
}

/// Like [`formatted_disk`], but the data region starts out as `fill` bytes
/// instead of zeros.
pub(crate) fn formatted_disk_filled(name: &str, options: &FormatOptions, fill: u8) -> Arc<RamDisk> {
    let mut image = vec![fill; sectors_for(options) * SECTOR];
    format_volume(&mut image, options).unwrap();
    Arc::new(RamDisk::from_image(name, BlockSize::new(512), image))
}

#[derive(Debug)]
pub(crate) struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> CalendarTime {
        CalendarTime {
            year: 2024,
            month: 5,
            day: 17,
            hour: 13,
            minute: 45,
            second: 30,
        }
    }
}

/// A mounted volume plus the disk and cache behind it.
#[derive(Debug)]
pub(crate) struct Volume {
    pub(crate) disk: Arc<RamDisk>,
    pub(crate) cache: Arc<BufferCache>,
    pub(crate) fs: Arc<FatFs>,
}

impl Volume {
    pub(crate) fn new(options: &FormatOptions) -> Self {
        Self::on_disk(formatted_disk("hdb", options))
    }

    pub(crate) fn on_disk(disk: Arc<RamDisk>) -> Self {
        let cache = Arc::new(BufferCache::new(64, 64, 3));
        cache.register_device(disk.clone()).unwrap();
        let fs = FatFs::mount(cache.clone(), "hdb", Some(Arc::new(FixedClock))).unwrap();
        Self {
            disk,
            cache,
            fs: Arc::new(fs),
        }
    }

    /// Unmounts and mounts the same disk again through a fresh cache, so
    /// everything is read back from the device.
    pub(crate) fn remount(self) -> Self {
        self.fs.detach().unwrap();
        let disk = self.disk;
        drop(self.fs);
        let cache = Arc::new(BufferCache::new(64, 64, 3));
        cache.register_device(disk.clone()).unwrap();
        let fs = FatFs::mount(cache.clone(), "hdb", None).unwrap();
        Self {
            disk,
            cache,
            fs: Arc::new(fs),
        }
    }
}
