use alloc::boxed::Box;
use alloc::string::String;
use core::fmt::Debug;

use bitflags::bitflags;

use crate::error::{FsError, FsResult};

bitflags! {
    /// `open` flags. The access mode lives in the low two bits, where
    /// read-only is 0 and so has no flag of its own.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0x1;
        const RDWR = 0x2;
        const CREAT = 0x40;
        const EXCL = 0x80;
        const TRUNC = 0x200;
        const APPEND = 0x400;
    }
}

pub const O_RDONLY: u32 = 0;
pub const O_ACCMODE: u32 = 0x3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenFlags {
    /// Parses raw flags. Unknown bits and the access mode 3 are invalid.
    pub fn from_raw(raw: u32) -> FsResult<Self> {
        let flags = Self::from_bits(raw).ok_or(FsError::InvalidParam)?;
        flags.access_mode()?;
        Ok(flags)
    }

    pub fn access_mode(self) -> FsResult<AccessMode> {
        match self.bits() & O_ACCMODE {
            O_RDONLY => Ok(AccessMode::ReadOnly),
            0x1 => Ok(AccessMode::WriteOnly),
            0x2 => Ok(AccessMode::ReadWrite),
            _ => Err(FsError::InvalidParam),
        }
    }

    pub fn readable(self) -> bool {
        matches!(
            self.access_mode(),
            Ok(AccessMode::ReadOnly | AccessMode::ReadWrite)
        )
    }

    pub fn writable(self) -> bool {
        matches!(
            self.access_mode(),
            Ok(AccessMode::WriteOnly | AccessMode::ReadWrite)
        )
    }
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl TryFrom<u32> for Whence {
    type Error = FsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            _ => Err(FsError::InvalidParam),
        }
    }
}

impl Whence {
    /// New offset for a seek of `delta` from `whence`. The result must not
    /// be negative.
    pub fn apply(self, current: u64, size: u64, delta: i64) -> FsResult<u64> {
        let base = match self {
            Self::Set => 0,
            Self::Cur => current,
            Self::End => size,
        };
        base.checked_add_signed(delta).ok_or(FsError::InvalidParam)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirectoryEntryType {
    File,
    Directory,
}

/// One directory listing entry as returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryRecord {
    pub name: String,
    /// Driver-specific file number. FAT uses the first cluster.
    pub inode: u32,
    pub entry_type: DirectoryEntryType,
    pub size: u32,
}

/// Driver side of an open file. The offset lives in the [`FileHandle`] and is
/// passed in; `read` and `write` advance it by the number of bytes moved.
pub trait OpenFile: Debug + Send {
    fn read(&mut self, offset: &mut u64, buf: &mut [u8]) -> FsResult<usize>;

    fn write(&mut self, offset: &mut u64, data: &[u8]) -> FsResult<usize>;

    fn lseek(&mut self, offset: &mut u64, delta: i64, whence: Whence) -> FsResult<u64>;

    /// Returns the `index`-th entry of a directory, `NotFound` past the end.
    fn readdir(&mut self, index: usize) -> FsResult<DirEntryRecord>;

    /// Writes back pending metadata. Only a broken handle is an error.
    fn close(self: Box<Self>) -> FsResult<()>;
}

/// Link between a handle and the driver state behind it.
#[derive(Debug)]
pub struct Vnode {
    mount_point: String,
    file: Box<dyn OpenFile>,
}

impl Vnode {
    pub fn new(mount_point: String, file: Box<dyn OpenFile>) -> Self {
        Self { mount_point, file }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }
}

/// An open file as seen by the VFS.
#[derive(Debug)]
pub struct FileHandle {
    vnode: Vnode,
    flags: OpenFlags,
    offset: u64,
}

impl FileHandle {
    pub fn new(vnode: Vnode, flags: OpenFlags) -> Self {
        Self {
            vnode,
            flags,
            offset: 0,
        }
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn vnode(&self) -> &Vnode {
        &self.vnode
    }

    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.vnode.file.read(&mut self.offset, buf)
    }

    pub fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        self.vnode.file.write(&mut self.offset, data)
    }

    pub fn lseek(&mut self, delta: i64, whence: Whence) -> FsResult<u64> {
        self.vnode.file.lseek(&mut self.offset, delta, whence)
    }

    pub fn readdir(&mut self, index: usize) -> FsResult<DirEntryRecord> {
        self.vnode.file.readdir(index)
    }

    pub fn close(self) -> FsResult<()> {
        self.vnode.file.close()
    }
}
