use alloc::sync::Arc;
use core::ops::ControlFlow;

use ::fat::{Attributes, FatEntry, FatTable};

use crate::error::{FsError, FsResult};
use crate::vfs::{DirEntryRecord, DirectoryEntryType, FilePath, OpenFlags, Whence};

use super::file_system::{EntryLocation, FatFs, FatState, Lookup};

/// Where the last `readdir` call stopped, so sequential listing does not
/// rescan the directory from the start.
#[derive(Debug, Default, Clone, Copy)]
struct ReaddirCursor {
    next_slot: usize,
    last_index: Option<usize>,
}

/// Bytes handed to [`FatFile::write_at`].
#[derive(Clone, Copy)]
enum Source<'a> {
    Bytes(&'a [u8]),
    Zeros(usize),
}

impl Source<'_> {
    fn len(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Zeros(len) => *len,
        }
    }

    fn fill(&self, at: usize, dst: &mut [u8]) {
        match self {
            Self::Bytes(bytes) => dst.copy_from_slice(&bytes[at..at + dst.len()]),
            Self::Zeros(_) => dst.fill(0),
        }
    }
}

/// An open file or directory on a FAT volume.
///
/// Size and first cluster are kept here while the file is open and written
/// to the directory entry on close.
#[derive(Debug)]
pub struct FatFile {
    fs: Arc<FatFs>,
    flags: OpenFlags,
    /// The 8.3 entry describing this file. `None` for the root directory.
    entry: Option<EntryLocation>,
    is_directory: bool,
    first_cluster: u32,
    size: u32,
    /// Last cluster looked up, as (index within the file, cluster number).
    position: Option<(u32, u32)>,
    dirty_metadata: bool,
    readdir: ReaddirCursor,
}

impl FatFile {
    /// Opens `path` (relative to the volume root) with POSIX `open` semantics
    /// for `CREAT`, `EXCL` and `TRUNC`.
    pub fn open(fs: Arc<FatFs>, path: &FilePath, flags: OpenFlags) -> FsResult<Self> {
        let writable = flags.writable();
        let fat32 = fs.is_fat32();
        let mut state = fs.state.lock();

        let found = match fs.lookup(&state.table, path) {
            Ok(Lookup::Root) => {
                if writable {
                    return Err(FsError::IsADirectory);
                }
                drop(state);
                fs.track_open(None)?;
                return Ok(Self::new(fs, flags, None, true, 0, 0));
            }
            Ok(Lookup::Entry(mut found)) => {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(FsError::FileExists);
                }
                if found.entry.is_directory() {
                    if writable {
                        return Err(FsError::IsADirectory);
                    }
                } else if writable {
                    if found.entry.attributes().contains(Attributes::READ_ONLY) {
                        return Err(FsError::PermissionDenied);
                    }
                    if flags.contains(OpenFlags::TRUNC) {
                        fs.truncate(&mut state, &found)?;
                        found.entry.file_size = 0;
                        found.entry.set_first_cluster(0, fat32);
                    }
                }
                found
            }
            Err(FsError::NotFound) if flags.contains(OpenFlags::CREAT) => {
                let (parent, name) = path
                    .split_dirname_filename()
                    .ok_or(FsError::NotFound)?;
                let dir = fs.resolve_directory(&state.table, &parent)?;
                fs.create(&mut state, dir, name.as_str())?
            }
            Err(err) => return Err(err),
        };
        drop(state);

        let location = Some(found.location);
        fs.track_open(location)?;
        Ok(Self::new(
            fs,
            flags,
            location,
            found.entry.is_directory(),
            found.entry.first_cluster(fat32),
            found.entry.file_size,
        ))
    }

    fn new(
        fs: Arc<FatFs>,
        flags: OpenFlags,
        entry: Option<EntryLocation>,
        is_directory: bool,
        first_cluster: u32,
        size: u32,
    ) -> Self {
        Self {
            fs,
            flags,
            entry,
            is_directory,
            first_cluster,
            size,
            position: None,
            dirty_metadata: false,
            readdir: ReaddirCursor::default(),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// Follows one link, treating anything but a link to a data cluster as
    /// the end of the chain.
    fn next_in_chain(&self, table: &FatTable, cluster: u32) -> Option<u32> {
        match table.decode(cluster)? {
            FatEntry::Next(next) if self.fs.geometry().is_data_cluster(next) => Some(next),
            _ => None,
        }
    }

    /// The cluster holding the `index`-th cluster's worth of the file. Walks
    /// forward from the cached position when possible.
    fn cluster_at(&mut self, table: &FatTable, index: u32) -> FsResult<u32> {
        let (mut current, mut cluster) = match self.position {
            Some((at, cluster)) if at <= index => (at, cluster),
            _ if self.first_cluster >= 2 => (0, self.first_cluster),
            _ => return Err(FsError::Corrupt),
        };
        while current < index {
            cluster = self.next_in_chain(table, cluster).ok_or_else(|| {
                log::warn!(
                    "fat: chain from cluster {} ends before cluster index {index}",
                    self.first_cluster
                );
                FsError::Corrupt
            })?;
            current += 1;
        }
        self.position = Some((index, cluster));
        Ok(cluster)
    }

    /// Like `cluster_at`, but grows the chain up to `index`.
    fn cluster_for_write(&mut self, state: &mut FatState, index: u32) -> FsResult<u32> {
        if self.first_cluster < 2 {
            self.first_cluster = state.allocate_cluster(0)?;
            self.position = None;
            self.dirty_metadata = true;
        }
        let (mut current, mut cluster) = match self.position {
            Some((at, cluster)) if at <= index => (at, cluster),
            _ => (0, self.first_cluster),
        };
        while current < index {
            cluster = match self.next_in_chain(&state.table, cluster) {
                Some(next) => next,
                None => state.allocate_cluster(cluster)?,
            };
            current += 1;
            self.position = Some((current, cluster));
        }
        self.position = Some((index, cluster));
        Ok(cluster)
    }

    pub fn read_bytes(&mut self, offset: &mut u64, buf: &mut [u8]) -> FsResult<usize> {
        if self.is_directory {
            return Err(FsError::IsADirectory);
        }
        if !self.flags.readable() {
            return Err(FsError::PermissionDenied);
        }
        let size = u64::from(self.size);
        if *offset >= size || buf.is_empty() {
            return Ok(0);
        }

        let len = (size - *offset).min(buf.len() as u64) as usize;
        let cluster_size = u64::from(self.fs.geometry().cluster_size());
        let fs = Arc::clone(&self.fs);
        let state = fs.state.lock();
        let mut done = 0;
        while done < len {
            let position = *offset + done as u64;
            let within = position % cluster_size;
            let chunk = (len - done).min((cluster_size - within) as usize);
            let outcome = self
                .cluster_at(&state.table, (position / cluster_size) as u32)
                .and_then(|cluster| {
                    fs.read_cluster(cluster, within as u32, &mut buf[done..done + chunk])
                });
            if let Err(err) = outcome {
                if done == 0 {
                    return Err(err);
                }
                log::debug!("fat: short read after {done} bytes: {err}");
                break;
            }
            done += chunk;
        }
        *offset += done as u64;
        Ok(done)
    }

    pub fn write_bytes(&mut self, offset: &mut u64, data: &[u8]) -> FsResult<usize> {
        if self.is_directory {
            return Err(FsError::IsADirectory);
        }
        if !self.flags.writable() {
            return Err(FsError::PermissionDenied);
        }
        if self.flags.contains(OpenFlags::APPEND) {
            *offset = u64::from(self.size);
        }
        if data.is_empty() {
            return Ok(0);
        }
        offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= u64::from(u32::MAX))
            .ok_or(FsError::Overflow)?;

        let fs = Arc::clone(&self.fs);
        let mut state = fs.state.lock();
        let result = self.write_with_gap(&mut state, *offset, data);
        if let Err(err) = fs.flush_fat(&mut state) {
            log::warn!("fat: FAT write-back after write failed: {err}");
        }
        let written = result?;
        *offset += written as u64;
        Ok(written)
    }

    /// Zero-fills from the current end of file up to `start` when writing
    /// past it, then writes `data`.
    fn write_with_gap(&mut self, state: &mut FatState, start: u64, data: &[u8]) -> FsResult<usize> {
        let size = u64::from(self.size);
        if start > size {
            let gap = (start - size) as usize;
            if self.write_at(state, size, Source::Zeros(gap))? < gap {
                return Err(FsError::NoSpace);
            }
        }
        self.write_at(state, start, Source::Bytes(data))
    }

    /// Writes cluster by cluster, growing the chain as needed. Stops early
    /// and returns the count written so far when the volume fills up.
    fn write_at(&mut self, state: &mut FatState, start: u64, source: Source<'_>) -> FsResult<usize> {
        let len = source.len();
        let cluster_size = u64::from(self.fs.geometry().cluster_size());
        let fs = Arc::clone(&self.fs);
        let mut done = 0;
        while done < len {
            let position = start + done as u64;
            let within = position % cluster_size;
            let chunk = (len - done).min((cluster_size - within) as usize);
            let outcome = self
                .cluster_for_write(state, (position / cluster_size) as u32)
                .and_then(|cluster| {
                    fs.write_cluster(cluster, within as u32, chunk, |at, dst| {
                        source.fill(done + at, dst);
                    })
                });
            if let Err(err) = outcome {
                if done == 0 {
                    return Err(err);
                }
                log::debug!("fat: short write after {done} bytes: {err}");
                break;
            }
            done += chunk;
            self.dirty_metadata = true;
            let end = (position + chunk as u64) as u32;
            if end > self.size {
                self.size = end;
            }
        }
        Ok(done)
    }

    pub fn seek(&mut self, offset: &mut u64, delta: i64, whence: Whence) -> FsResult<u64> {
        *offset = whence.apply(*offset, u64::from(self.size), delta)?;
        Ok(*offset)
    }

    /// The `index`-th entry of this directory, counting `.` and `..` but not
    /// deleted slots, long-name slots or the volume label.
    pub fn dir_entry(&mut self, index: usize) -> FsResult<DirEntryRecord> {
        if !self.is_directory {
            return Err(FsError::NotADirectory);
        }
        let sequential = self
            .readdir
            .last_index
            .is_some_and(|last| last + 1 == index);
        let (start_slot, mut skip) = if sequential {
            (self.readdir.next_slot, 0)
        } else {
            (0, index)
        };

        let fs = Arc::clone(&self.fs);
        let state = fs.state.lock();
        let dir = fs.dir_of(self.first_cluster);
        let found = fs.scan_directory(&state.table, dir, start_slot, |scanned| {
            if skip == 0 {
                ControlFlow::Break(scanned)
            } else {
                skip -= 1;
                ControlFlow::Continue(())
            }
        })?;
        drop(state);

        let Some(scanned) = found else {
            self.readdir = ReaddirCursor::default();
            return Err(FsError::NotFound);
        };
        self.readdir = ReaddirCursor {
            next_slot: scanned.slot + 1,
            last_index: Some(index),
        };
        let entry_type = if scanned.entry.is_directory() {
            DirectoryEntryType::Directory
        } else {
            DirectoryEntryType::File
        };
        Ok(DirEntryRecord {
            name: scanned.name,
            inode: scanned.entry.first_cluster(fs.is_fat32()),
            entry_type,
            size: scanned.entry.file_size,
        })
    }

    /// Writes size, first cluster and modification time back to the
    /// directory entry, then pushes everything for the volume to the device.
    pub fn write_back(&mut self) -> FsResult<()> {
        let fs = Arc::clone(&self.fs);
        let mut state = fs.state.lock();
        if self.dirty_metadata {
            if let Some(location) = self.entry {
                let (size, first_cluster) = (self.size, self.first_cluster);
                let fat32 = fs.is_fat32();
                let now = fs.now();
                fs.update_entry(location, |entry| {
                    entry.file_size = size;
                    entry.set_first_cluster(first_cluster, fat32);
                    entry.attr |= Attributes::ARCHIVE.bits();
                    if let Some(now) = now {
                        entry.set_modified(now);
                    }
                })?;
            }
            self.dirty_metadata = false;
        }
        fs.flush_fat(&mut state)?;
        drop(state);
        fs.cache().sync_device(fs.device())
    }

    /// Closes the file. Write-back problems are logged; the handle is gone
    /// either way.
    pub fn close_file(mut self) {
        if let Err(err) = self.write_back() {
            log::error!("fat: write-back on close failed: {err}");
        }
    }
}

impl Drop for FatFile {
    fn drop(&mut self) {
        if self.dirty_metadata {
            if let Err(err) = self.write_back() {
                log::error!("fat: write-back of dropped file failed: {err}");
            }
        }
        self.fs.track_close(self.entry);
    }
}
