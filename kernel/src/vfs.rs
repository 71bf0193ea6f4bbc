//! Virtual file system layer: driver registry, mount table and file handles.
//! Every path operation picks the mount with the longest matching prefix and
//! hands the rest of the path to that mount's driver.

mod file;
mod fs;
mod mount;
mod path;

pub use file::*;
pub use fs::*;
pub use mount::*;
pub use path::*;

use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{FsError, FsResult};
use crate::sync::{InitCell, SpinLock};

#[derive(Debug)]
pub struct Vfs {
    drivers: SpinLock<Vec<Arc<dyn FileSystemDriver>>>,
    mounts: MountTable,
}

impl Vfs {
    pub const fn new() -> Self {
        Self {
            drivers: SpinLock::new(Vec::new()),
            mounts: MountTable::new(),
        }
    }

    pub fn register_driver(&self, driver: Arc<dyn FileSystemDriver>) -> FsResult<()> {
        let mut drivers = self.drivers.lock_disable_interrupts();
        if drivers.iter().any(|existing| existing.name() == driver.name()) {
            return Err(FsError::FileExists);
        }
        log::info!("vfs: registered file system driver {}", driver.name());
        drivers.push(driver);
        Ok(())
    }

    /// Fails with `Busy` while anything is mounted through the driver.
    pub fn unregister_driver(&self, name: &str) -> FsResult<()> {
        if self.mounts.uses_driver(name) {
            return Err(FsError::Busy);
        }
        let mut drivers = self.drivers.lock_disable_interrupts();
        let index = drivers
            .iter()
            .position(|driver| driver.name() == name)
            .ok_or(FsError::NotFound)?;
        drivers.remove(index);
        log::info!("vfs: unregistered file system driver {name}");
        Ok(())
    }

    pub fn lookup_driver(&self, name: &str) -> Option<Arc<dyn FileSystemDriver>> {
        let drivers = self.drivers.lock_disable_interrupts();
        drivers.iter().find(|driver| driver.name() == name).cloned()
    }

    pub fn mount(&self, mount_point: &str, device: &str, fs_name: &str) -> FsResult<()> {
        let path = FilePath::parse(mount_point)?;
        if self.mounts.find_exact(&path).is_some() {
            return Err(FsError::FileExists);
        }
        let driver = self.lookup_driver(fs_name).ok_or_else(|| {
            log::warn!("vfs: no file system driver named {fs_name}");
            FsError::NotFound
        })?;

        let fs = driver.mount(device)?;
        let mount = Mount {
            path,
            driver_name: fs_name.to_string(),
            fs: Arc::clone(&fs),
        };
        if let Err(err) = self.mounts.add(mount) {
            if let Err(unmount_err) = fs.unmount() {
                log::warn!("vfs: cleanup unmount of {device} failed: {unmount_err}");
            }
            return Err(err);
        }
        log::info!("vfs: mounted {device} ({fs_name}) on {mount_point}");
        Ok(())
    }

    /// Driver errors (`Busy` with open files) leave the mount in place. `/`
    /// cannot go while anything else is mounted.
    pub fn unmount(&self, mount_point: &str) -> FsResult<()> {
        let path = FilePath::parse(mount_point)?;
        let mount = self.mounts.find_exact(&path).ok_or(FsError::NotFound)?;
        if path.is_root() && self.mounts.len() > 1 {
            return Err(FsError::Busy);
        }
        mount.fs.unmount()?;
        self.mounts.remove(&path);
        log::info!("vfs: unmounted {path}");
        Ok(())
    }

    pub fn open(&self, path: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        let path = FilePath::parse(path)?;
        let (mount, relative) = self
            .mounts
            .longest_prefix_match(&path)
            .ok_or(FsError::NotFound)?;
        log::trace!("vfs: open {path} via {} as {relative}", mount.path);
        let file = mount.fs.open(&relative, flags)?;
        Ok(FileHandle::new(
            Vnode::new(mount.path.to_string(), file),
            flags,
        ))
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let path = FilePath::parse(path)?;
        let (mount, relative) = self
            .mounts
            .longest_prefix_match(&path)
            .ok_or(FsError::NotFound)?;
        if relative.is_root() {
            return Err(FsError::Busy);
        }
        mount.fs.unlink(&relative)
    }

    pub fn mount_points(&self) -> Vec<FilePath> {
        self.mounts.paths()
    }

    /// Unmounts everything, deepest mount point first. Keeps going after a
    /// failure and reports the first one.
    pub fn shutdown(&self) -> FsResult<()> {
        let mut result = Ok(());
        for path in self.mounts.paths() {
            let Some(mount) = self.mounts.find_exact(&path) else {
                continue;
            };
            match mount.fs.unmount() {
                Ok(()) => {
                    self.mounts.remove(&path);
                    log::info!("vfs: unmounted {path}");
                }
                Err(err) => {
                    log::error!("vfs: failed to unmount {path}: {err}");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        result
    }
}

static VFS: InitCell<Vfs> = InitCell::new();

/// Sets up the global VFS. Fails with `Busy` if it already exists.
pub fn init() -> FsResult<&'static Vfs> {
    VFS.init(Vfs::new()).map_err(|_| FsError::Busy)?;
    get()
}

pub fn get() -> FsResult<&'static Vfs> {
    VFS.get().ok_or(FsError::NotInit)
}

/// Unmounts everything and drops the global VFS.
///
/// # Safety
///
/// No reference obtained from [`get`] or [`init`] may be used afterwards.
pub unsafe fn teardown() -> FsResult<()> {
    get()?.shutdown()?;
    // Safe per this function's contract.
    unsafe { VFS.take() };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ::fat::FormatOptions;

    use crate::block::BufferCache;
    use crate::fs::fat::{FatDriver, FAT_DRIVER_NAME};
    use crate::testing::formatted_disk;

    fn two_disks() -> Vfs {
        let cache = Arc::new(BufferCache::new(64, 64, 3));
        cache
            .register_device(formatted_disk("hdb", &FormatOptions::fat16()))
            .unwrap();
        cache
            .register_device(formatted_disk("hdc", &FormatOptions::fat12()))
            .unwrap();
        let vfs = Vfs::new();
        vfs.register_driver(Arc::new(FatDriver::new(cache))).unwrap();
        vfs
    }

    fn create(vfs: &Vfs, path: &str, data: &[u8]) {
        let flags = OpenFlags::WRONLY | OpenFlags::CREAT;
        let mut handle = vfs.open(path, flags).unwrap();
        assert_eq!(handle.write(data), Ok(data.len()));
        assert_eq!(handle.offset(), data.len() as u64);
        handle.close().unwrap();
    }

    fn contents(vfs: &Vfs, path: &str) -> FsResult<Vec<u8>> {
        let mut handle = vfs.open(path, OpenFlags::empty())?;
        let mut buf = alloc::vec![0; 64];
        let len = handle.read(&mut buf)?;
        buf.truncate(len);
        handle.close()?;
        Ok(buf)
    }

    #[test]
    fn nested_mounts_route_by_longest_prefix() {
        let vfs = two_disks();
        vfs.mount("/", "hdb", FAT_DRIVER_NAME).unwrap();
        vfs.mount("/mnt", "hdc", FAT_DRIVER_NAME).unwrap();

        create(&vfs, "/ROOT.TXT", b"root");
        create(&vfs, "/mnt/INNER.TXT", b"inner");
        let handle = vfs.open("/mnt/INNER.TXT", OpenFlags::empty()).unwrap();
        assert_eq!(handle.vnode().mount_point(), "/mnt");
        handle.close().unwrap();

        assert_eq!(contents(&vfs, "/mnt/INNER.TXT").unwrap(), b"inner");
        assert_eq!(contents(&vfs, "/INNER.TXT"), Err(FsError::NotFound));
        assert_eq!(contents(&vfs, "/mnt/ROOT.TXT"), Err(FsError::NotFound));

        // The mount point itself opens as the mounted root directory.
        let mut dir = vfs.open("/mnt", OpenFlags::empty()).unwrap();
        assert_eq!(dir.readdir(0).unwrap().name, "INNER.TXT");
        dir.close().unwrap();

        assert_eq!(vfs.unmount("/"), Err(FsError::Busy));
        assert_eq!(vfs.unmount("/mnt"), Ok(()));
        assert_eq!(contents(&vfs, "/mnt/INNER.TXT"), Err(FsError::NotFound));
        assert_eq!(vfs.unmount("/"), Ok(()));
        assert_eq!(vfs.unmount("/"), Err(FsError::NotFound));
    }

    #[test]
    fn mount_errors() {
        let vfs = two_disks();
        assert_eq!(vfs.mount("/", "hdb", "ext2"), Err(FsError::NotFound));
        assert_eq!(vfs.mount("/", "hdz", FAT_DRIVER_NAME), Err(FsError::Mount));
        assert_eq!(vfs.mount("mnt", "hdb", FAT_DRIVER_NAME), Err(FsError::InvalidParam));
        vfs.mount("/", "hdb", FAT_DRIVER_NAME).unwrap();
        assert_eq!(vfs.mount("/", "hdc", FAT_DRIVER_NAME), Err(FsError::FileExists));
        assert_eq!(vfs.open("relative", OpenFlags::empty()).err(), Some(FsError::InvalidParam));
    }

    #[test]
    fn driver_registry() {
        let vfs = two_disks();
        assert!(vfs.lookup_driver(FAT_DRIVER_NAME).is_some());
        let cache = Arc::new(BufferCache::new(4, 64, 1));
        assert_eq!(
            vfs.register_driver(Arc::new(FatDriver::new(cache))),
            Err(FsError::FileExists)
        );

        vfs.mount("/", "hdb", FAT_DRIVER_NAME).unwrap();
        assert_eq!(vfs.unregister_driver(FAT_DRIVER_NAME), Err(FsError::Busy));
        vfs.unmount("/").unwrap();
        assert_eq!(vfs.unregister_driver(FAT_DRIVER_NAME), Ok(()));
        assert_eq!(vfs.unregister_driver(FAT_DRIVER_NAME), Err(FsError::NotFound));
        assert!(vfs.lookup_driver(FAT_DRIVER_NAME).is_none());
    }

    #[test]
    fn shutdown_unmounts_deepest_first() {
        let vfs = two_disks();
        vfs.mount("/", "hdb", FAT_DRIVER_NAME).unwrap();
        vfs.mount("/data", "hdc", FAT_DRIVER_NAME).unwrap();
        let held = vfs.open("/data", OpenFlags::empty()).unwrap();

        assert_eq!(vfs.shutdown(), Err(FsError::Busy));
        let left: Vec<_> = vfs.mount_points().iter().map(ToString::to_string).collect();
        assert_eq!(left, ["/data"]);

        held.close().unwrap();
        assert_eq!(vfs.shutdown(), Ok(()));
        assert!(vfs.mount_points().is_empty());
    }
}
