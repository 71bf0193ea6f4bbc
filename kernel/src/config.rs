use alloc::string::{String, ToString};

use crate::error::{FsError, FsResult};

/// Tunables for the storage stack. Defaults match a small teaching machine;
/// the kernel command line can override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsConfig {
    /// Number of sector buffers the cache may hold.
    pub cache_buffers: usize,
    /// Hash bucket count. Always a power of two, at least 64.
    pub cache_buckets: usize,
    /// Attempts per sector read before giving up with `IO`.
    pub read_retries: u32,
    /// Size of each process descriptor table.
    pub max_open_files: usize,
    /// Lowest descriptor handed out by `open`. 0-2 belong to the console.
    pub first_fd: usize,
    pub root_device: String,
    pub root_fs: String,
}

pub const MIN_CACHE_BUCKETS: usize = 64;

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            cache_buffers: 128,
            cache_buckets: 256,
            read_retries: 3,
            max_open_files: 64,
            first_fd: 3,
            root_device: "hdb".to_string(),
            root_fs: "FAT".to_string(),
        }
    }
}

impl FsConfig {
    /// Overlays `key=value` tokens from a kernel command line on the defaults.
    /// Tokens without `=` and unknown keys are skipped.
    pub fn from_cmdline(cmdline: &str) -> FsResult<Self> {
        let mut config = Self::default();
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "root" => config.root_device = non_empty(key, value)?.to_string(),
                "rootfstype" => config.root_fs = non_empty(key, value)?.to_string(),
                "bcache.buffers" => config.cache_buffers = parse_number(key, value)?,
                "bcache.buckets" => config.cache_buckets = parse_number(key, value)?,
                "bcache.retries" => config.read_retries = parse_number(key, value)?,
                "fd.max" => config.max_open_files = parse_number(key, value)?,
                _ => log::debug!("ignoring kernel command line option {key}"),
            }
        }
        Ok(config.normalized())
    }

    /// Clamps values into the ranges the rest of the stack relies on.
    pub fn normalized(mut self) -> Self {
        self.cache_buffers = self.cache_buffers.max(1);
        self.cache_buckets = self
            .cache_buckets
            .max(MIN_CACHE_BUCKETS)
            .checked_next_power_of_two()
            .unwrap_or(MIN_CACHE_BUCKETS);
        self.read_retries = self.read_retries.max(1);
        self.max_open_files = self.max_open_files.max(self.first_fd + 1);
        self
    }
}

fn non_empty<'a>(key: &str, value: &'a str) -> FsResult<&'a str> {
    if value.is_empty() {
        log::warn!("empty value for kernel command line option {key}");
        return Err(FsError::InvalidParam);
    }
    Ok(value)
}

fn parse_number<T: core::str::FromStr>(key: &str, value: &str) -> FsResult<T> {
    value.parse().map_err(|_| {
        log::warn!("invalid value {value:?} for kernel command line option {key}");
        FsError::InvalidParam
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FsConfig::default();
        assert_eq!(config.cache_buffers, 128);
        assert_eq!(config.max_open_files, 64);
        assert_eq!(config.first_fd, 3);
        assert_eq!(config.root_device, "hdb");
        assert_eq!(config.root_fs, "FAT");
    }

    #[test]
    fn cmdline_overrides() {
        let config =
            FsConfig::from_cmdline("quiet root=hda rootfstype=FAT bcache.buffers=16 fd.max=8 x=y")
                .unwrap();
        assert_eq!(config.root_device, "hda");
        assert_eq!(config.cache_buffers, 16);
        assert_eq!(config.max_open_files, 8);
    }

    #[test]
    fn buckets_are_normalized() {
        let config = FsConfig::from_cmdline("bcache.buckets=100").unwrap();
        assert_eq!(config.cache_buckets, 128);
        let config = FsConfig::from_cmdline("bcache.buckets=3").unwrap();
        assert_eq!(config.cache_buckets, 64);
        let config = FsConfig::from_cmdline("bcache.buffers=0").unwrap();
        assert_eq!(config.cache_buffers, 1);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(
            FsConfig::from_cmdline("bcache.buffers=lots"),
            Err(FsError::InvalidParam)
        );
        assert_eq!(FsConfig::from_cmdline("root="), Err(FsError::InvalidParam));
    }
}
