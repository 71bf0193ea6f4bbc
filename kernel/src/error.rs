use core::fmt;

/// POSIX errno values returned (negated) by the syscall layer.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EFAULT: i32 = 14;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const EMFILE: i32 = 24;
    pub const ENOSPC: i32 = 28;
    pub const ESPIPE: i32 = 29;
    pub const EROFS: i32 = 30;
    pub const ENAMETOOLONG: i32 = 36;
    pub const EOVERFLOW: i32 = 75;
    pub const ENOTSUP: i32 = 95;
    pub const ENOBUFS: i32 = 105;
}

/// Every way a file system operation can fail. The discriminants are the
/// kernel-internal error codes; [`FsError::errno`] gives the POSIX view.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FsError {
    Unknown = -1,
    InvalidParam = -2,
    OutOfMemory = -3,
    IO = -4,
    NotFound = -5,
    PermissionDenied = -6,
    FileExists = -7,
    NotADirectory = -8,
    IsADirectory = -9,
    NoSpace = -10,
    ReadOnly = -11,
    NotSupported = -12,
    InvalidFormat = -13,
    Corrupt = -14,
    Mount = -15,
    NotInit = -16,
    Busy = -17,
    NoResource = -18,
    NameTooLong = -19,
    Overflow = -20,
    Internal = -21,
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn errno(self) -> i32 {
        match self {
            Self::NotFound => errno::ENOENT,
            Self::IO | Self::Unknown | Self::Corrupt | Self::InvalidFormat | Self::Internal => {
                errno::EIO
            }
            Self::OutOfMemory => errno::ENOMEM,
            Self::PermissionDenied => errno::EACCES,
            Self::Busy => errno::EBUSY,
            Self::FileExists => errno::EEXIST,
            Self::Mount | Self::NotInit => errno::ENODEV,
            Self::NotADirectory => errno::ENOTDIR,
            Self::IsADirectory => errno::EISDIR,
            Self::InvalidParam => errno::EINVAL,
            Self::NoSpace => errno::ENOSPC,
            Self::ReadOnly => errno::EROFS,
            Self::NameTooLong => errno::ENAMETOOLONG,
            Self::Overflow => errno::EOVERFLOW,
            Self::NotSupported => errno::ENOTSUP,
            Self::NoResource => errno::ENOBUFS,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Unknown => "Unknown error",
            Self::InvalidParam => "Invalid parameter",
            Self::OutOfMemory => "Out of memory",
            Self::IO => "I/O error",
            Self::NotFound => "Not found",
            Self::PermissionDenied => "Permission denied",
            Self::FileExists => "File or directory already exists",
            Self::NotADirectory => "Not a directory",
            Self::IsADirectory => "Is a directory",
            Self::NoSpace => "No space left on device",
            Self::ReadOnly => "Read-only file system",
            Self::NotSupported => "Operation not supported",
            Self::InvalidFormat => "Invalid file system format",
            Self::Corrupt => "File system corrupt",
            Self::Mount => "Mount error",
            Self::NotInit => "File system not initialized",
            Self::Busy => "Resource is busy",
            Self::NoResource => "No buffer space available",
            Self::NameTooLong => "File name too long",
            Self::Overflow => "Value too large",
            Self::Internal => "Internal error",
        };
        f.write_str(message)
    }
}

impl From<fat::BootSectorError> for FsError {
    fn from(err: fat::BootSectorError) -> Self {
        log::warn!("rejecting boot sector: {err}");
        Self::InvalidFormat
    }
}

impl From<fat::NameError> for FsError {
    fn from(err: fat::NameError) -> Self {
        match err {
            fat::NameError::TooLong => Self::NameTooLong,
            fat::NameError::Empty | fat::NameError::InvalidCharacter(_) => Self::InvalidParam,
        }
    }
}

impl From<alloc::collections::TryReserveError> for FsError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), errno::ENOENT);
        assert_eq!(FsError::FileExists.errno(), errno::EEXIST);
        assert_eq!(FsError::Busy.errno(), errno::EBUSY);
        assert_eq!(FsError::Corrupt.errno(), errno::EIO);
        assert_eq!(FsError::NoResource.errno(), errno::ENOBUFS);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(FsError::Unknown.code(), -1);
        assert_eq!(FsError::Busy.code(), -17);
        assert_eq!(FsError::Internal.code(), -21);
        assert_eq!(FsError::NotADirectory.to_string(), "Not a directory");
    }

    #[test]
    fn boot_sector_errors_mean_invalid_format() {
        for err in [
            fat::BootSectorError::BadSignature([0, 0]),
            fat::BootSectorError::FatTooSmall,
            fat::BootSectorError::TooManyClusters(0xFFFF_FFFC),
        ] {
            assert_eq!(FsError::from(err), FsError::InvalidFormat);
        }
    }

    #[test]
    fn name_errors_convert() {
        assert_eq!(FsError::from(fat::NameError::TooLong), FsError::NameTooLong);
        assert_eq!(
            FsError::from(fat::NameError::InvalidCharacter('*')),
            FsError::InvalidParam
        );
    }
}
