//! Storage stack for the kernel: block devices and the sector buffer cache,
//! the FAT driver, the VFS with its mount table, and the file system calls.
//!
//! Everything here is `no_std` + `alloc` and runs unchanged on the host,
//! where the tests use RAM disks holding freshly formatted FAT images.

#![cfg_attr(not(test), no_std)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cargo_common_metadata,
    clippy::doc_markdown,
    clippy::implicit_hasher,
    clippy::implicit_return,
    clippy::len_without_is_empty,
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::option_if_let_else,
    clippy::redundant_pub_crate,
    clippy::wildcard_imports
)]

extern crate alloc;

pub mod block;
pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod sync;
pub mod syscall;
#[cfg(test)]
pub(crate) mod testing;
pub mod vfs;

use alloc::sync::Arc;

use crate::block::{BlockDeviceDriver, BufferCache};
use crate::config::FsConfig;
use crate::error::FsResult;
use crate::fs::fat::FatDriver;
use crate::vfs::Vfs;

/// Brings the storage stack up: builds the buffer cache, registers the
/// block devices found at boot, creates the global VFS with the FAT driver
/// and mounts the configured root device on `/`.
pub fn init(
    config: &FsConfig,
    devices: impl IntoIterator<Item = Arc<dyn BlockDeviceDriver>>,
) -> FsResult<&'static Vfs> {
    let cache = Arc::new(BufferCache::from_config(config));
    for device in devices {
        let name = alloc::string::String::from(device.device_name());
        match cache.register_device(device) {
            Ok(_) => log::info!("registered block device {name}"),
            Err(err) => log::warn!("skipping block device {name}: {err}"),
        }
    }

    let vfs = vfs::init()?;
    vfs.register_driver(Arc::new(FatDriver::new(cache)))?;
    vfs.mount("/", &config.root_device, &config.root_fs)?;
    Ok(vfs)
}

/// Unmounts everything and drops the global VFS.
///
/// # Safety
///
/// No reference returned by [`init`] or [`vfs::get`] may be used afterwards.
pub unsafe fn shutdown() -> FsResult<()> {
    unsafe { vfs::teardown() }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ::fat::FormatOptions;

    use crate::error::FsError;
    use crate::syscall::Process;
    use crate::testing::formatted_disk;

    #[test]
    fn boot_and_shutdown() {
        let config = FsConfig::from_cmdline("root=hdc rootfstype=FAT bcache.buffers=32").unwrap();
        let devices: [Arc<dyn BlockDeviceDriver>; 2] = [
            formatted_disk("hdb", &FormatOptions::fat12()),
            formatted_disk("hdc", &FormatOptions::fat16()),
        ];
        let vfs = init(&config, devices).unwrap();
        assert!(core::ptr::eq(vfs, vfs::get().unwrap()));
        assert_eq!(vfs::init().err(), Some(FsError::Busy));

        let process = Process::new(&config);
        let fd = process.sys_open(vfs, Some("/BOOT.LOG"), 0x41, 0);
        assert_eq!(fd, 3);
        assert_eq!(process.sys_write(3, Some(b"up"), 2), 2);
        assert_eq!(process.sys_close(3), 0);

        unsafe { shutdown() }.unwrap();
        assert_eq!(vfs::get().err(), Some(FsError::NotInit));
    }
}
