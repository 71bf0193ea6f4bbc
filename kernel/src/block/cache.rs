use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::{FsConfig, MIN_CACHE_BUCKETS};
use crate::error::{FsError, FsResult};
use crate::sync::SpinLock;

use super::{BlockDeviceDriver, BlockIndex, DeviceId};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(mut hash: u32, bytes: &[u8]) -> u32 {
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Sector contents. Shared between the cache and outstanding handles so that
/// callers can touch the data without holding the cache lock.
type SectorData = Arc<SpinLock<Box<[u8]>>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct BufferKey {
    device: DeviceId,
    lba: u64,
}

/// Header for one resident sector. The links are indices into
/// `CacheInner::buffers`.
#[derive(Debug)]
struct Buffer {
    key: BufferKey,
    refcount: u32,
    valid: bool,
    dirty: bool,
    /// A device read is in flight. The filler holds the data lock for the
    /// whole read.
    filling: bool,
    data: SectorData,
    hash_next: Option<usize>,
    lru_prev: Option<usize>,
    lru_next: Option<usize>,
}

#[derive(Debug)]
struct RegisteredDevice {
    driver: Arc<dyn BlockDeviceDriver>,
    name_hash: u32,
    sector_size: usize,
}

/// Counters for the cache. `dirty` and `resident` are current values, the
/// rest only ever grow.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub reads: u64,
    pub writes: u64,
    pub evictions: u64,
    pub alloc_failures: u64,
    pub io_errors: u64,
    pub dirty: usize,
    pub resident: usize,
}

#[derive(Debug)]
struct CacheInner {
    devices: Vec<Option<RegisteredDevice>>,
    buffers: Vec<Option<Buffer>>,
    free_slots: Vec<usize>,
    buckets: Vec<Option<usize>>,
    /// Most recently used.
    lru_head: Option<usize>,
    /// Least recently used, first eviction candidate.
    lru_tail: Option<usize>,
    resident: usize,
    stats: CacheStats,
}

impl CacheInner {
    fn device(&self, id: DeviceId) -> FsResult<&RegisteredDevice> {
        self.devices
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(FsError::InvalidParam)
    }

    fn bucket(&self, key: BufferKey) -> FsResult<usize> {
        let device = self.device(key.device)?;
        let hash = fnv1a(device.name_hash, &key.lba.to_le_bytes());
        Ok(hash as usize & (self.buckets.len() - 1))
    }

    fn buffer(&self, slot: usize) -> Option<&Buffer> {
        self.buffers.get(slot)?.as_ref()
    }

    fn buffer_mut(&mut self, slot: usize) -> Option<&mut Buffer> {
        self.buffers.get_mut(slot)?.as_mut()
    }

    fn find(&self, key: BufferKey) -> FsResult<Option<usize>> {
        let mut cursor = self.buckets[self.bucket(key)?];
        while let Some(slot) = cursor {
            let buffer = self.buffer(slot).ok_or(FsError::Internal)?;
            if buffer.key == key {
                return Ok(Some(slot));
            }
            cursor = buffer.hash_next;
        }
        Ok(None)
    }

    /// Installs a buffer with one reference held by the caller.
    fn insert(&mut self, key: BufferKey, data: SectorData, valid: bool) -> FsResult<usize> {
        let bucket = self.bucket(key)?;
        let buffer = Buffer {
            key,
            refcount: 1,
            valid,
            dirty: false,
            filling: !valid,
            data,
            hash_next: self.buckets[bucket],
            lru_prev: None,
            lru_next: None,
        };
        let slot = if let Some(slot) = self.free_slots.pop() {
            self.buffers[slot] = Some(buffer);
            slot
        } else {
            self.buffers.push(Some(buffer));
            self.buffers.len() - 1
        };
        self.buckets[bucket] = Some(slot);
        self.lru_push_front(slot);
        self.resident += 1;
        Ok(slot)
    }

    fn remove(&mut self, slot: usize) -> Option<Buffer> {
        let key = self.buffer(slot)?.key;
        self.hash_unlink(slot, key);
        self.lru_unlink(slot);
        let buffer = self.buffers.get_mut(slot)?.take()?;
        self.free_slots.push(slot);
        self.resident -= 1;
        Some(buffer)
    }

    fn hash_unlink(&mut self, slot: usize, key: BufferKey) {
        let Ok(bucket) = self.bucket(key) else {
            return;
        };
        let next = self.buffer(slot).and_then(|buffer| buffer.hash_next);
        if self.buckets[bucket] == Some(slot) {
            self.buckets[bucket] = next;
            return;
        }
        let mut cursor = self.buckets[bucket];
        while let Some(current) = cursor {
            let Some(buffer) = self.buffer_mut(current) else {
                return;
            };
            if buffer.hash_next == Some(slot) {
                buffer.hash_next = next;
                return;
            }
            cursor = buffer.hash_next;
        }
    }

    fn lru_unlink(&mut self, slot: usize) {
        let Some(buffer) = self.buffer_mut(slot) else {
            return;
        };
        let (prev, next) = (buffer.lru_prev.take(), buffer.lru_next.take());
        match prev.and_then(|prev| self.buffer_mut(prev)) {
            Some(prev) => prev.lru_next = next,
            None => self.lru_head = next,
        }
        match next.and_then(|next| self.buffer_mut(next)) {
            Some(next) => next.lru_prev = prev,
            None => self.lru_tail = prev,
        }
    }

    fn lru_push_front(&mut self, slot: usize) {
        let old_head = self.lru_head;
        if let Some(buffer) = self.buffer_mut(slot) {
            buffer.lru_prev = None;
            buffer.lru_next = old_head;
        }
        match old_head.and_then(|head| self.buffer_mut(head)) {
            Some(head) => head.lru_prev = Some(slot),
            None => self.lru_tail = Some(slot),
        }
        self.lru_head = Some(slot);
    }

    fn touch(&mut self, slot: usize) {
        if self.lru_head != Some(slot) {
            self.lru_unlink(slot);
            self.lru_push_front(slot);
        }
    }

    fn release(&mut self, slot: usize) {
        match self.buffer_mut(slot) {
            Some(buffer) if buffer.refcount > 0 => buffer.refcount -= 1,
            Some(buffer) => log::warn!(
                "buffer cache: release of unreferenced buffer for lba {}",
                buffer.key.lba
            ),
            None => log::warn!("buffer cache: release of unknown buffer slot {slot}"),
        }
    }

    fn dirty_count(&self) -> usize {
        self.buffers
            .iter()
            .flatten()
            .filter(|buffer| buffer.dirty)
            .count()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Fill {
    /// Read the sector from the device on a miss.
    Read,
    /// The caller overwrites the whole sector, so a miss starts zeroed.
    Zero,
}

fn zeroed_sector(len: usize) -> Option<Box<[u8]>> {
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(len).ok()?;
    bytes.resize(len, 0);
    Some(bytes.into_boxed_slice())
}

/// Private copy of a sector taken under the cache lock so the write can run
/// without it.
fn stage(data: &SectorData) -> Option<Vec<u8>> {
    let sector = data.lock();
    let mut copy = Vec::new();
    copy.try_reserve_exact(sector.len()).ok()?;
    copy.extend_from_slice(&sector[..]);
    Some(copy)
}

/// Write-back cache of device sectors keyed by (device, LBA).
///
/// A single lock covers the hash table, the LRU list and every buffer header.
/// Device I/O always happens with that lock released; buffers involved in
/// I/O are pinned through their refcount, and a buffer with a non-zero
/// refcount is never evicted.
#[derive(Debug)]
pub struct BufferCache {
    inner: SpinLock<CacheInner>,
    capacity: usize,
    read_retries: u32,
}

impl BufferCache {
    /// `bucket_count` is rounded up to a power of two of at least 64.
    pub fn new(capacity: usize, bucket_count: usize, read_retries: u32) -> Self {
        let bucket_count = bucket_count
            .max(MIN_CACHE_BUCKETS)
            .checked_next_power_of_two()
            .unwrap_or(MIN_CACHE_BUCKETS);
        Self {
            inner: SpinLock::new(CacheInner {
                devices: Vec::new(),
                buffers: Vec::new(),
                free_slots: Vec::new(),
                buckets: alloc::vec![None; bucket_count],
                lru_head: None,
                lru_tail: None,
                resident: 0,
                stats: CacheStats::default(),
            }),
            capacity: capacity.max(1),
            read_retries: read_retries.max(1),
        }
    }

    pub fn from_config(config: &FsConfig) -> Self {
        Self::new(config.cache_buffers, config.cache_buckets, config.read_retries)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn register_device(&self, driver: Arc<dyn BlockDeviceDriver>) -> FsResult<DeviceId> {
        if !driver.initialized() {
            log::warn!("buffer cache: device {} is not initialized", driver.device_name());
            return Err(FsError::NotInit);
        }
        let block_size = driver.device_block_size();
        if !block_size.is_supported() {
            log::warn!(
                "buffer cache: device {} has unsupported sector size {}",
                driver.device_name(),
                block_size.bytes()
            );
            return Err(FsError::InvalidParam);
        }

        let mut inner = self.inner.lock_disable_interrupts();
        let name = driver.device_name();
        if inner
            .devices
            .iter()
            .flatten()
            .any(|device| device.driver.device_name() == name)
        {
            return Err(FsError::FileExists);
        }
        log::info!(
            "buffer cache: registered device {name} ({} byte sectors)",
            block_size.bytes()
        );

        let device = RegisteredDevice {
            name_hash: fnv1a(FNV_OFFSET_BASIS, name.as_bytes()),
            sector_size: block_size.bytes(),
            driver,
        };
        let index = if let Some(index) = inner.devices.iter().position(Option::is_none) {
            inner.devices[index] = Some(device);
            index
        } else {
            inner.devices.push(Some(device));
            inner.devices.len() - 1
        };
        Ok(DeviceId(index))
    }

    /// Writes back and drops every buffer of the device, then forgets it.
    /// Fails with `Busy` while any of its buffers is still referenced.
    pub fn unregister_device(&self, device: DeviceId) -> FsResult<()> {
        self.inner.lock_disable_interrupts().device(device)?;
        self.sync_device(device)?;
        if self.invalidate(device) > 0 {
            return Err(FsError::Busy);
        }
        let mut inner = self.inner.lock_disable_interrupts();
        if let Some(entry) = inner.devices.get_mut(device.index()) {
            if let Some(removed) = entry.take() {
                log::info!(
                    "buffer cache: unregistered device {}",
                    removed.driver.device_name()
                );
            }
        }
        Ok(())
    }

    pub fn device_id(&self, name: &str) -> Option<DeviceId> {
        let inner = self.inner.lock_disable_interrupts();
        inner
            .devices
            .iter()
            .position(|device| {
                device
                    .as_ref()
                    .is_some_and(|device| device.driver.device_name() == name)
            })
            .map(DeviceId)
    }

    pub fn sector_size(&self, device: DeviceId) -> FsResult<usize> {
        let inner = self.inner.lock_disable_interrupts();
        Ok(inner.device(device)?.sector_size)
    }

    /// Returns the sector with its refcount raised, reading it from the
    /// device on a miss.
    pub fn get(&self, device: DeviceId, lba: u64) -> FsResult<BufferHandle<'_>> {
        self.acquire(device, lba, Fill::Read)
    }

    /// Like `get`, but a miss hands out a zero-filled buffer without reading
    /// the device. For callers that are about to overwrite the whole sector.
    pub fn get_overwrite(&self, device: DeviceId, lba: u64) -> FsResult<BufferHandle<'_>> {
        self.acquire(device, lba, Fill::Zero)
    }

    fn acquire(&self, device: DeviceId, lba: u64, fill: Fill) -> FsResult<BufferHandle<'_>> {
        let key = BufferKey { device, lba };
        let mut skip = Vec::new();
        loop {
            let mut inner = self.inner.lock_disable_interrupts();
            let sector_size = inner.device(device)?.sector_size;

            if let Some(slot) = inner.find(key)? {
                let buffer = inner.buffer_mut(slot).ok_or(FsError::Internal)?;
                let data = Arc::clone(&buffer.data);
                if buffer.filling {
                    // Wait for the reader to finish, then look again.
                    drop(inner);
                    drop(data.lock());
                    continue;
                }
                buffer.refcount += 1;
                inner.touch(slot);
                inner.stats.hits += 1;
                return Ok(BufferHandle::new(self, slot, key, data));
            }

            if inner.resident >= self.capacity {
                drop(inner);
                self.evict_one(&mut skip)?;
                continue;
            }
            let Some(sector) = zeroed_sector(sector_size) else {
                inner.stats.alloc_failures += 1;
                drop(inner);
                self.evict_one(&mut skip)?;
                continue;
            };

            inner.stats.misses += 1;
            let data: SectorData = Arc::new(SpinLock::new(sector));
            if fill == Fill::Zero {
                let slot = inner.insert(key, Arc::clone(&data), true)?;
                return Ok(BufferHandle::new(self, slot, key, data));
            }

            let driver = Arc::clone(&inner.device(device)?.driver);
            let slot = inner.insert(key, Arc::clone(&data), false)?;
            let mut sector = data.lock();
            drop(inner);
            let result = self.read_with_retries(&*driver, lba, &mut sector[..]);
            drop(sector);

            let mut inner = self.inner.lock_disable_interrupts();
            return match result {
                Ok(()) => {
                    let buffer = inner.buffer_mut(slot).ok_or(FsError::Internal)?;
                    buffer.filling = false;
                    buffer.valid = true;
                    inner.stats.reads += 1;
                    Ok(BufferHandle::new(self, slot, key, data))
                }
                Err(err) => {
                    // Nobody else can hold a reference to a buffer that is
                    // still filling.
                    inner.remove(slot);
                    inner.stats.io_errors += 1;
                    log::error!(
                        "buffer cache: giving up on {} lba {lba}: {err}",
                        driver.device_name()
                    );
                    Err(err)
                }
            };
        }
    }

    fn read_with_retries(
        &self,
        driver: &dyn BlockDeviceDriver,
        lba: u64,
        buf: &mut [u8],
    ) -> FsResult<()> {
        for attempt in 1..=self.read_retries {
            match driver.read_device_blocks(BlockIndex::new(lba), buf) {
                Ok(()) => return Ok(()),
                Err(FsError::InvalidParam) => return Err(FsError::InvalidParam),
                Err(err) => log::warn!(
                    "buffer cache: read of {} lba {lba} failed (attempt {attempt}/{}): {err}",
                    driver.device_name(),
                    self.read_retries
                ),
            }
        }
        Err(FsError::IO)
    }

    /// Frees the least recently used unreferenced buffer, writing it back
    /// first if it is dirty. Buffers that cannot be written back end up in
    /// `skip` and are passed over on later calls. Returning `Ok` only means
    /// progress was made; the caller re-checks.
    fn evict_one(&self, skip: &mut Vec<usize>) -> FsResult<()> {
        let mut inner = self.inner.lock_disable_interrupts();
        let mut cursor = inner.lru_tail;
        while let Some(slot) = cursor {
            let buffer = inner.buffer(slot).ok_or(FsError::Internal)?;
            cursor = buffer.lru_prev;
            if buffer.refcount > 0 || buffer.filling || skip.contains(&slot) {
                continue;
            }
            let (key, dirty, data) = (buffer.key, buffer.dirty, Arc::clone(&buffer.data));

            if !dirty {
                inner.remove(slot);
                inner.stats.evictions += 1;
                return Ok(());
            }

            let Some(staged) = stage(&data) else {
                inner.stats.alloc_failures += 1;
                log::warn!("buffer cache: no memory to stage dirty lba {}", key.lba);
                skip.push(slot);
                continue;
            };
            let driver = Arc::clone(&inner.device(key.device)?.driver);
            if let Some(buffer) = inner.buffer_mut(slot) {
                buffer.refcount += 1;
                buffer.dirty = false;
            }
            drop(inner);

            let result = driver.write_device_blocks(BlockIndex::new(key.lba), &staged);

            let mut inner = self.inner.lock_disable_interrupts();
            inner.release(slot);
            match result {
                Ok(()) => {
                    inner.stats.writes += 1;
                    let evictable = inner
                        .buffer(slot)
                        .is_some_and(|buffer| buffer.refcount == 0 && !buffer.dirty);
                    if evictable {
                        inner.remove(slot);
                        inner.stats.evictions += 1;
                    }
                }
                Err(err) => {
                    if let Some(buffer) = inner.buffer_mut(slot) {
                        buffer.dirty = true;
                    }
                    inner.stats.io_errors += 1;
                    log::error!(
                        "buffer cache: write-back of {} lba {} failed during eviction: {err}",
                        driver.device_name(),
                        key.lba
                    );
                    skip.push(slot);
                }
            }
            return Ok(());
        }
        Err(FsError::NoResource)
    }

    /// Writes a pinned buffer back if it is dirty. On failure the buffer
    /// stays dirty so a later flush or sync retries it.
    fn flush_slot(&self, slot: usize) -> FsResult<()> {
        let mut inner = self.inner.lock_disable_interrupts();
        let buffer = inner.buffer(slot).ok_or(FsError::Internal)?;
        if !buffer.dirty {
            return Ok(());
        }
        let key = buffer.key;
        let data = Arc::clone(&buffer.data);
        let Some(staged) = stage(&data) else {
            inner.stats.alloc_failures += 1;
            return Err(FsError::OutOfMemory);
        };
        let driver = Arc::clone(&inner.device(key.device)?.driver);
        if let Some(buffer) = inner.buffer_mut(slot) {
            buffer.dirty = false;
        }
        drop(inner);

        let result = driver.write_device_blocks(BlockIndex::new(key.lba), &staged);

        let mut inner = self.inner.lock_disable_interrupts();
        match result {
            Ok(()) => {
                inner.stats.writes += 1;
                Ok(())
            }
            Err(err) => {
                if let Some(buffer) = inner.buffer_mut(slot) {
                    buffer.dirty = true;
                }
                inner.stats.io_errors += 1;
                log::error!(
                    "buffer cache: write-back of {} lba {} failed: {err}",
                    driver.device_name(),
                    key.lba
                );
                Err(err)
            }
        }
    }

    /// Writes back every dirty buffer. All of them are attempted; the first
    /// error is returned.
    pub fn sync(&self) -> FsResult<()> {
        self.sync_where(|_| true)
    }

    pub fn sync_device(&self, device: DeviceId) -> FsResult<()> {
        self.sync_where(|key_device| key_device == device)
    }

    fn sync_where(&self, filter: impl Fn(DeviceId) -> bool) -> FsResult<()> {
        let pinned: Vec<usize> = {
            let mut inner = self.inner.lock_disable_interrupts();
            let dirty: Vec<usize> = inner
                .buffers
                .iter()
                .enumerate()
                .filter_map(|(slot, buffer)| {
                    buffer
                        .as_ref()
                        .filter(|buffer| buffer.dirty && filter(buffer.key.device))
                        .map(|_| slot)
                })
                .collect();
            for &slot in &dirty {
                if let Some(buffer) = inner.buffer_mut(slot) {
                    buffer.refcount += 1;
                }
            }
            dirty
        };

        let mut result = Ok(());
        for &slot in &pinned {
            if let Err(err) = self.flush_slot(slot) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        let mut inner = self.inner.lock_disable_interrupts();
        for &slot in &pinned {
            inner.release(slot);
        }
        if !pinned.is_empty() {
            log::debug!("buffer cache: synced {} buffers", pinned.len());
        }
        result
    }

    /// Drops every unreferenced buffer of `device`, discarding dirty data.
    /// Returns how many buffers were skipped because they are in use.
    pub fn invalidate(&self, device: DeviceId) -> usize {
        let mut inner = self.inner.lock_disable_interrupts();
        let mut skipped = 0;
        for slot in 0..inner.buffers.len() {
            let Some(buffer) = inner.buffer(slot) else {
                continue;
            };
            if buffer.key.device != device {
                continue;
            }
            if buffer.refcount > 0 || buffer.filling {
                log::warn!(
                    "buffer cache: invalidate skipping in-use lba {}",
                    buffer.key.lba
                );
                skipped += 1;
                continue;
            }
            if buffer.dirty {
                log::warn!("buffer cache: discarding dirty lba {}", buffer.key.lba);
            }
            inner.remove(slot);
        }
        skipped
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock_disable_interrupts();
        CacheStats {
            dirty: inner.dirty_count(),
            resident: inner.resident,
            ..inner.stats
        }
    }
}

/// A referenced sector. The reference is dropped with the handle.
#[derive(Debug)]
pub struct BufferHandle<'a> {
    cache: &'a BufferCache,
    slot: usize,
    key: BufferKey,
    data: SectorData,
}

impl<'a> BufferHandle<'a> {
    fn new(cache: &'a BufferCache, slot: usize, key: BufferKey, data: SectorData) -> Self {
        Self {
            cache,
            slot,
            key,
            data,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.key.device
    }

    pub fn lba(&self) -> u64 {
        self.key.lba
    }

    pub fn read<V>(&self, f: impl FnOnce(&[u8]) -> V) -> V {
        let data = self.data.lock();
        f(&data[..])
    }

    /// Runs `f` on the sector contents and marks the buffer dirty.
    pub fn modify<V>(&self, f: impl FnOnce(&mut [u8]) -> V) -> V {
        let value = {
            let mut data = self.data.lock();
            f(&mut data[..])
        };
        self.mark_dirty();
        value
    }

    pub fn mark_dirty(&self) {
        let mut inner = self.cache.inner.lock_disable_interrupts();
        if let Some(buffer) = inner.buffer_mut(self.slot) {
            if buffer.valid {
                buffer.dirty = true;
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        let inner = self.cache.inner.lock_disable_interrupts();
        inner.buffer(self.slot).is_some_and(|buffer| buffer.dirty)
    }

    pub fn flush(&self) -> FsResult<()> {
        self.cache.flush_slot(self.slot)
    }
}

impl Drop for BufferHandle<'_> {
    fn drop(&mut self) {
        self.cache
            .inner
            .lock_disable_interrupts()
            .release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloc::vec;
    use proptest::prelude::*;

    use crate::block::{BlockSize, RamDisk};

    const SECTOR: usize = 512;

    /// Disk whose sector `n` is filled with byte `n`.
    fn numbered_disk(sectors: usize) -> Arc<RamDisk> {
        let mut image = vec![0; sectors * SECTOR];
        for (index, sector) in image.chunks_mut(SECTOR).enumerate() {
            sector.fill(index as u8);
        }
        Arc::new(RamDisk::from_image("hdb", BlockSize::new(512), image))
    }

    fn setup(capacity: usize, sectors: usize) -> (Arc<RamDisk>, BufferCache, DeviceId) {
        let disk = numbered_disk(sectors);
        let cache = BufferCache::new(capacity, 64, 3);
        let device = cache.register_device(disk.clone()).unwrap();
        (disk, cache, device)
    }

    #[test]
    fn hits_and_misses() {
        let (disk, cache, device) = setup(4, 8);
        let first = cache.get(device, 3).unwrap();
        first.read(|data| assert!(data.iter().all(|&b| b == 3)));
        drop(first);
        drop(cache.get(device, 3).unwrap());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.reads), (1, 1, 1));
        assert_eq!(stats.resident, 1);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn lru_buffer_is_evicted_first() {
        let capacity = 4;
        let (_disk, cache, device) = setup(capacity, 8);
        for lba in 0..=capacity as u64 {
            drop(cache.get(device, lba).unwrap());
        }
        let before = cache.stats();
        assert_eq!(before.evictions, 1);
        assert_eq!(before.resident, capacity);

        let buffer = cache.get(device, 0).unwrap();
        let after = cache.stats();
        assert_eq!(after.misses, before.misses + 1);
        assert_eq!(after.reads, before.reads + 1);
        buffer.read(|data| assert!(data.iter().all(|&b| b == 0)));
    }

    #[test]
    fn recently_used_buffer_survives() {
        let (_disk, cache, device) = setup(2, 8);
        drop(cache.get(device, 0).unwrap());
        drop(cache.get(device, 1).unwrap());
        drop(cache.get(device, 0).unwrap());
        drop(cache.get(device, 2).unwrap());

        let before = cache.stats();
        drop(cache.get(device, 0).unwrap());
        assert_eq!(cache.stats().hits, before.hits + 1);
    }

    #[test]
    fn referenced_buffers_are_never_evicted() {
        let (_disk, cache, device) = setup(2, 8);
        let a = cache.get(device, 0).unwrap();
        let b = cache.get(device, 1).unwrap();
        assert_eq!(cache.get(device, 2).err(), Some(FsError::NoResource));
        drop(b);
        assert!(cache.get(device, 2).is_ok());
        a.read(|data| assert_eq!(data[0], 0));
    }

    #[test]
    fn dirty_eviction_writes_back() {
        let (disk, cache, device) = setup(1, 8);
        cache
            .get(device, 5)
            .unwrap()
            .modify(|data| data.fill(0xAB));
        assert_eq!(cache.stats().dirty, 1);

        drop(cache.get(device, 6).unwrap());
        let stats = cache.stats();
        assert_eq!((stats.writes, stats.evictions, stats.dirty), (1, 1, 0));
        assert!(disk.snapshot()[5 * SECTOR..6 * SECTOR].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn failed_flush_stays_dirty_until_sync_succeeds() {
        let (disk, cache, device) = setup(4, 8);
        let buffer = cache.get(device, 1).unwrap();
        buffer.modify(|data| data[0] = 0x42);

        disk.fail_next_writes(1);
        assert_eq!(buffer.flush(), Err(FsError::IO));
        assert!(buffer.is_dirty());
        drop(buffer);

        cache.sync().unwrap();
        let stats = cache.stats();
        assert_eq!((stats.dirty, stats.io_errors), (0, 1));
        assert_eq!(disk.snapshot()[SECTOR], 0x42);
    }

    #[test]
    fn eviction_skips_buffers_that_fail_write_back() {
        let (disk, cache, device) = setup(2, 8);
        cache.get(device, 0).unwrap().modify(|data| data[0] = 0xEE);
        drop(cache.get(device, 1).unwrap());

        disk.fail_next_writes(1);
        drop(cache.get(device, 2).unwrap());
        let stats = cache.stats();
        assert_eq!(stats.io_errors, 1);
        assert_eq!(stats.dirty, 1);

        cache.sync().unwrap();
        assert_eq!(disk.snapshot()[0], 0xEE);
    }

    #[test]
    fn read_retries() {
        let (disk, cache, device) = setup(4, 8);
        disk.fail_next_reads(2);
        let buffer = cache.get(device, 2).unwrap();
        buffer.read(|data| assert_eq!(data[0], 2));
        drop(buffer);

        disk.fail_next_reads(3);
        assert_eq!(cache.get(device, 3).err(), Some(FsError::IO));
        let stats = cache.stats();
        assert_eq!(stats.resident, 1);
        assert_eq!(stats.io_errors, 1);

        assert!(cache.get(device, 3).is_ok());
    }

    #[test]
    fn sync_cleans_everything() {
        let (disk, cache, device) = setup(8, 8);
        for lba in 0..4 {
            cache.get(device, lba).unwrap().modify(|data| data[1] = 0x80 | lba as u8);
        }
        assert_eq!(cache.stats().dirty, 4);
        cache.sync().unwrap();
        assert_eq!(cache.stats().dirty, 0);
        let image = disk.snapshot();
        for lba in 0..4 {
            assert_eq!(image[lba * SECTOR + 1], 0x80 | lba as u8);
        }
    }

    #[test]
    fn invalidate_skips_referenced_buffers() {
        let (_disk, cache, device) = setup(8, 8);
        let held = cache.get(device, 0).unwrap();
        drop(cache.get(device, 1).unwrap());
        assert_eq!(cache.invalidate(device), 1);
        assert_eq!(cache.stats().resident, 1);
        drop(held);
        assert_eq!(cache.invalidate(device), 0);
        assert_eq!(cache.stats().resident, 0);
    }

    #[test]
    fn overwrite_does_not_read() {
        let (disk, cache, device) = setup(4, 8);
        let buffer = cache.get_overwrite(device, 7).unwrap();
        buffer.read(|data| assert!(data.iter().all(|&b| b == 0)));
        buffer.modify(|data| data.fill(1));
        drop(buffer);
        assert_eq!(disk.reads(), 0);

        cache.sync().unwrap();
        assert!(disk.snapshot()[7 * SECTOR..].iter().all(|&b| b == 1));
    }

    #[test]
    fn device_registry() {
        let (_disk, cache, device) = setup(4, 8);
        assert_eq!(cache.device_id("hdb"), Some(device));
        assert_eq!(cache.sector_size(device), Ok(512));
        assert_eq!(
            cache.register_device(numbered_disk(1)).err(),
            Some(FsError::FileExists)
        );

        let held = cache.get(device, 0).unwrap();
        assert_eq!(cache.unregister_device(device), Err(FsError::Busy));
        drop(held);
        cache.unregister_device(device).unwrap();
        assert_eq!(cache.device_id("hdb"), None);
        assert_eq!(cache.get(device, 0).err(), Some(FsError::InvalidParam));
    }

    #[test]
    fn rejects_odd_sector_sizes() {
        let cache = BufferCache::new(4, 64, 3);
        let disk = Arc::new(RamDisk::new("odd", BlockSize::new(520), 4));
        assert_eq!(cache.register_device(disk).err(), Some(FsError::InvalidParam));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(u64, u8),
        Read(u64),
        Sync,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..12_u64, any::<u8>()).prop_map(|(lba, byte)| Op::Write(lba, byte)),
            (0..12_u64).prop_map(Op::Read),
            Just(Op::Sync),
        ]
    }

    proptest! {
        #[test]
        fn behaves_like_plain_memory(ops in proptest::collection::vec(op(), 1..64)) {
            let (disk, cache, device) = setup(3, 12);
            let mut model: Vec<u8> = (0..12).map(|lba| lba as u8).collect();

            for op in ops {
                match op {
                    Op::Write(lba, byte) => {
                        cache.get(device, lba).unwrap().modify(|data| data.fill(byte));
                        model[lba as usize] = byte;
                    }
                    Op::Read(lba) => {
                        let first = cache.get(device, lba).unwrap().read(|data| data[0]);
                        prop_assert_eq!(first, model[lba as usize]);
                    }
                    Op::Sync => {
                        cache.sync().unwrap();
                        prop_assert_eq!(cache.stats().dirty, 0);
                    }
                }
                prop_assert!(cache.stats().resident <= 3);
            }

            cache.sync().unwrap();
            let image = disk.snapshot();
            for (lba, &byte) in model.iter().enumerate() {
                prop_assert_eq!(image[lba * SECTOR], byte);
            }
        }
    }
}
