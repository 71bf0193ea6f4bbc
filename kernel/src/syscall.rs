//! File system calls as seen from a process: descriptor table plus the
//! `sys_*` entry points. Every call returns a non-negative result or a
//! negated errno, so the trap handler can hand the value straight back.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::FsConfig;
use crate::error::{errno, FsError, FsResult};
use crate::sync::SpinLock;
use crate::vfs::{DirEntryRecord, FileHandle, OpenFlags, Vfs, Whence};

/// An open descriptor. Shared so that a read can run without holding the
/// descriptor table lock.
type SysFile = Arc<SpinLock<FileHandle>>;

fn error_return(err: FsError) -> isize {
    -(err.errno() as isize)
}

fn to_return(result: FsResult<usize>) -> isize {
    match result.and_then(|value| isize::try_from(value).map_err(|_| FsError::Overflow)) {
        Ok(value) => value,
        Err(err) => error_return(err),
    }
}

/// Per-process file state.
#[derive(Debug)]
pub struct Process {
    files: SpinLock<Vec<Option<SysFile>>>,
    first_fd: usize,
}

impl Process {
    pub fn new(config: &FsConfig) -> Self {
        Self::with_limits(config.max_open_files, config.first_fd)
    }

    /// Descriptors `first_fd..max_open_files` are available; the ones below
    /// belong to the console.
    pub fn with_limits(max_open_files: usize, first_fd: usize) -> Self {
        let mut files = Vec::new();
        files.resize_with(max_open_files.max(first_fd + 1), || None);
        Self {
            files: SpinLock::new(files),
            first_fd,
        }
    }

    pub fn open_files(&self) -> usize {
        self.files.lock().iter().filter(|file| file.is_some()).count()
    }

    fn file(&self, fd: i32) -> Option<SysFile> {
        let index = usize::try_from(fd).ok().filter(|&fd| fd >= self.first_fd)?;
        self.files.lock().get(index)?.clone()
    }

    /// Opens `path` and returns the lowest free descriptor. `mode` is
    /// accepted for compatibility; FAT has no permission bits.
    pub fn sys_open(&self, vfs: &Vfs, path: Option<&str>, flags: u32, _mode: u32) -> isize {
        let Some(path) = path else {
            return -(errno::EFAULT as isize);
        };
        let flags = match OpenFlags::from_raw(flags) {
            Ok(flags) => flags,
            Err(err) => return error_return(err),
        };

        if self.free_fd().is_none() {
            return -(errno::EMFILE as isize);
        }
        let handle = match vfs.open(path, flags) {
            Ok(handle) => handle,
            Err(err) => return error_return(err),
        };

        let mut files = self.files.lock();
        // The table may have filled up while the VFS was busy.
        let Some(fd) = Self::lowest_free(&files, self.first_fd) else {
            drop(files);
            if let Err(err) = handle.close() {
                log::warn!("syscall: closing {path} after running out of descriptors failed: {err}");
            }
            return -(errno::EMFILE as isize);
        };
        files[fd] = Some(Arc::new(SpinLock::new(handle)));
        drop(files);
        log::debug!("syscall: open {path} -> fd {fd}");
        fd as isize
    }

    fn free_fd(&self) -> Option<usize> {
        Self::lowest_free(&self.files.lock(), self.first_fd)
    }

    fn lowest_free(files: &[Option<SysFile>], first_fd: usize) -> Option<usize> {
        (first_fd..files.len()).find(|&fd| files[fd].is_none())
    }

    /// Reads up to `count` bytes into `buf`. A missing buffer is `EFAULT`
    /// unless nothing was asked for.
    pub fn sys_read(&self, fd: i32, buf: Option<&mut [u8]>, count: usize) -> isize {
        let Some(file) = self.file(fd) else {
            return -(errno::EBADF as isize);
        };
        if count == 0 {
            return 0;
        }
        let Some(buf) = buf else {
            return -(errno::EFAULT as isize);
        };
        let mut file = file.lock();
        if !file.flags().readable() {
            return -(errno::EBADF as isize);
        }
        let len = count.min(buf.len());
        to_return(file.read(&mut buf[..len]))
    }

    pub fn sys_write(&self, fd: i32, buf: Option<&[u8]>, count: usize) -> isize {
        let Some(file) = self.file(fd) else {
            return -(errno::EBADF as isize);
        };
        if count == 0 {
            return 0;
        }
        let Some(buf) = buf else {
            return -(errno::EFAULT as isize);
        };
        let mut file = file.lock();
        if !file.flags().writable() {
            return -(errno::EBADF as isize);
        }
        let len = count.min(buf.len());
        to_return(file.write(&buf[..len]))
    }

    /// Frees the descriptor first, then closes the file. If another thread
    /// is still inside a call on it, the file closes when that call ends.
    pub fn sys_close(&self, fd: i32) -> isize {
        let file = {
            let mut files = self.files.lock();
            let slot = usize::try_from(fd)
                .ok()
                .filter(|&fd| fd >= self.first_fd)
                .and_then(|fd| files.get_mut(fd));
            match slot.and_then(Option::take) {
                Some(file) => file,
                None => return -(errno::EBADF as isize),
            }
        };
        match Arc::try_unwrap(file) {
            Ok(handle) => match handle.into_inner().close() {
                Ok(()) => 0,
                Err(err) => error_return(err),
            },
            Err(_) => {
                log::debug!("syscall: fd {fd} closed while in use");
                0
            }
        }
    }

    pub fn sys_lseek(&self, fd: i32, offset: i64, whence: u32) -> isize {
        let Some(file) = self.file(fd) else {
            return -(errno::EBADF as isize);
        };
        let whence = match Whence::try_from(whence) {
            Ok(whence) => whence,
            Err(err) => return error_return(err),
        };
        let result = file.lock().lseek(offset, whence);
        to_return(result.and_then(|position| {
            usize::try_from(position).map_err(|_| FsError::Overflow)
        }))
    }

    /// Fills `out` with the `index`-th entry of the directory open as `fd`.
    /// Returns 0, or `-ENOENT` once the listing is exhausted.
    pub fn sys_readdir(&self, fd: i32, index: usize, out: Option<&mut DirEntryRecord>) -> isize {
        let Some(file) = self.file(fd) else {
            return -(errno::EBADF as isize);
        };
        let Some(out) = out else {
            return -(errno::EFAULT as isize);
        };
        let result = file.lock().readdir(index);
        match result {
            Ok(record) => {
                *out = record;
                0
            }
            Err(err) => error_return(err),
        }
    }

    pub fn sys_unlink(&self, vfs: &Vfs, path: Option<&str>) -> isize {
        let Some(path) = path else {
            return -(errno::EFAULT as isize);
        };
        match vfs.unlink(path) {
            Ok(()) => 0,
            Err(err) => error_return(err),
        }
    }

    /// Closes every descriptor, as on process exit.
    pub fn close_all(&self) {
        let files: Vec<SysFile> = self.files.lock().iter_mut().filter_map(Option::take).collect();
        for file in files {
            if let Ok(handle) = Arc::try_unwrap(file) {
                if let Err(err) = handle.into_inner().close() {
                    log::warn!("syscall: close on exit failed: {err}");
                }
            }
        }
    }
}
