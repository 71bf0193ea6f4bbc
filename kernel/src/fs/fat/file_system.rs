use alloc::collections::BTreeSet;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::{ControlFlow, Range};

use ::fat::{
    Attributes, ChainEnd, DirEntry, DirSlot, DirectorySector, DosDateTime, FatTable, FatType,
    Geometry, LfnEntry, LongNameBuilder, ShortName, DELETED_MARKER, DIR_ENTRY_SIZE, END_MARKER,
    MAX_NUMERIC_TAIL,
};

use crate::block::{BufferCache, DeviceId};
use crate::error::{FsError, FsResult};
use crate::fs::Clock;
use crate::sync::SpinLock;
use crate::vfs::FilePath;

/// Where the slots of a directory live.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum DirLocation {
    /// The FAT12/16 root area between the FATs and the data region.
    FixedRoot,
    Chain(u32),
}

/// Position of one 32-byte directory slot on the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct EntryLocation {
    pub(super) lba: u32,
    pub(super) offset: usize,
}

/// An 8.3 entry met while scanning a directory, with its long name if a
/// valid run preceded it.
#[derive(Debug, Clone)]
pub(super) struct ScannedEntry {
    pub(super) entry: DirEntry,
    pub(super) short_name: ShortName,
    /// Long name, or the `NAME.EXT` form of the 8.3 name.
    pub(super) name: String,
    pub(super) dir: DirLocation,
    pub(super) location: EntryLocation,
    /// Index of the 8.3 slot within its directory.
    pub(super) slot: usize,
    /// Slots of the long-name run in front of it. Empty without one.
    pub(super) lfn_slots: Range<usize>,
}

pub(super) enum Lookup {
    Root,
    Entry(ScannedEntry),
}

/// Everything guarded by the per-volume lock.
#[derive(Debug)]
pub(super) struct FatState {
    pub(super) table: FatTable,
    /// The in-memory FAT differs from what the cache holds.
    pub(super) fat_dirty: bool,
}

impl FatState {
    /// Takes the first free cluster, marks it end of chain and links it
    /// after `prev` when `prev` is a data cluster.
    pub(super) fn allocate_cluster(&mut self, prev: u32) -> FsResult<u32> {
        let cluster = self.table.find_free(2).ok_or(FsError::NoSpace)?;
        self.table.mark_eoc(cluster).ok_or(FsError::Internal)?;
        if prev >= 2 {
            self.table.set_entry(prev, cluster).ok_or(FsError::Corrupt)?;
        }
        self.fat_dirty = true;
        Ok(cluster)
    }

    /// Zeroes every entry of the chain starting at `start`. Freeing an
    /// already free chain does nothing.
    pub(super) fn free_chain(&mut self, start: u32) -> usize {
        let mut chain = self.table.chain(start);
        let clusters: Vec<u32> = chain.by_ref().collect();
        if let ChainEnd::Invalid(value) = chain.end() {
            if value != 0 || clusters.len() > 1 {
                log::warn!("fat: chain from cluster {start} ends in invalid entry {value:#x}");
            }
        }
        let mut freed = 0;
        for &cluster in &clusters {
            if self.table.entry(cluster) != Some(0) {
                self.table.set_entry(cluster, 0);
                freed += 1;
            }
        }
        if freed > 0 {
            self.fat_dirty = true;
        }
        freed
    }
}

/// Files open on the volume. Once `detached` is set nothing new opens.
#[derive(Debug, Default)]
struct OpenFiles {
    /// Directory entry of every open file, `None` for an open root.
    entries: Vec<Option<EntryLocation>>,
    detached: bool,
}

enum ScanStep<T> {
    Next,
    End,
    Found(T),
}

/// A mounted FAT volume.
///
/// Lock order is the volume lock, then the open-file list, then the cache.
#[derive(Debug)]
pub struct FatFs {
    device: DeviceId,
    device_name: String,
    cache: Arc<BufferCache>,
    clock: Option<Arc<dyn Clock>>,
    geometry: Geometry,
    pub(super) state: SpinLock<FatState>,
    open_files: SpinLock<OpenFiles>,
}

impl FatFs {
    /// Reads and checks the boot sector of `device_name`, then loads the
    /// first FAT into memory.
    pub fn mount(
        cache: Arc<BufferCache>,
        device_name: &str,
        clock: Option<Arc<dyn Clock>>,
    ) -> FsResult<Self> {
        let device = cache.device_id(device_name).ok_or_else(|| {
            log::warn!("fat: no block device named {device_name}");
            FsError::Mount
        })?;

        let geometry = cache.get(device, 0)?.read(Geometry::parse)?;
        let sector_size = cache.sector_size(device)?;
        if geometry.bytes_per_sector as usize != sector_size {
            log::warn!(
                "fat: {device_name} has {sector_size} byte sectors but the volume uses {}",
                geometry.bytes_per_sector
            );
            return Err(FsError::InvalidFormat);
        }

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(geometry.fat_size_bytes())?;
        for sector in 0..geometry.fat_size_sectors {
            let lba = u64::from(geometry.fat_start_lba + sector);
            cache.get(device, lba)?.read(|data| bytes.extend_from_slice(data));
        }
        let table = FatTable::new(geometry.fat_type, bytes, geometry.cluster_count);

        log::info!(
            "fat: mounted {device_name}: {}, {} clusters of {} bytes, {} free",
            geometry.fat_type,
            geometry.cluster_count,
            geometry.cluster_size(),
            table.free_count()
        );

        Ok(Self {
            device,
            device_name: device_name.to_string(),
            cache,
            clock,
            geometry,
            state: SpinLock::new(FatState {
                table,
                fat_dirty: false,
            }),
            open_files: SpinLock::new(OpenFiles::default()),
        })
    }

    /// Writes the FAT back and syncs the device. Refused with `Busy` while
    /// files are open. Write-back failures are logged, not returned. After
    /// this no file can be opened on the volume.
    pub fn detach(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        let mut open_files = self.open_files.lock();
        let open = open_files.entries.len();
        if open > 0 {
            log::warn!("fat: not unmounting {}, {open} files open", self.device_name);
            return Err(FsError::Busy);
        }
        open_files.detached = true;
        drop(open_files);

        if let Err(err) = self.flush_fat(&mut state) {
            log::error!("fat: could not write back FAT of {}: {err}", self.device_name);
        }
        drop(state);
        if let Err(err) = self.cache.sync_device(self.device) {
            log::error!("fat: sync of {} failed: {err}", self.device_name);
        }
        log::info!("fat: unmounted {}", self.device_name);
        Ok(())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn fat_type(&self) -> FatType {
        self.geometry.fat_type
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub(super) fn device(&self) -> DeviceId {
        self.device
    }

    pub(super) fn cache(&self) -> &BufferCache {
        &self.cache
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.lock().entries.len()
    }

    pub fn free_clusters(&self) -> u32 {
        self.state.lock().table.free_count()
    }

    /// Fails with `Mount` once the volume has been detached.
    pub(super) fn track_open(&self, location: Option<EntryLocation>) -> FsResult<()> {
        let mut open_files = self.open_files.lock();
        if open_files.detached {
            return Err(FsError::Mount);
        }
        open_files.entries.push(location);
        Ok(())
    }

    pub(super) fn track_close(&self, location: Option<EntryLocation>) {
        let mut open_files = self.open_files.lock();
        let entries = &mut open_files.entries;
        if let Some(index) = entries.iter().position(|open| *open == location) {
            entries.swap_remove(index);
        }
    }

    fn is_open(&self, location: EntryLocation) -> bool {
        self.open_files.lock().entries.contains(&Some(location))
    }

    pub(super) fn is_fat32(&self) -> bool {
        self.geometry.fat_type == FatType::Fat32
    }

    pub(super) fn now(&self) -> Option<DosDateTime> {
        let clock = self.clock.as_ref()?;
        Some(DosDateTime::from_calendar(clock.now()))
    }

    fn bytes_per_sector(&self) -> usize {
        self.geometry.bytes_per_sector as usize
    }

    fn slots_per_sector(&self) -> usize {
        self.bytes_per_sector() / DIR_ENTRY_SIZE
    }

    pub(super) fn root(&self) -> DirLocation {
        if self.geometry.has_fixed_root() {
            DirLocation::FixedRoot
        } else {
            DirLocation::Chain(self.geometry.root_cluster)
        }
    }

    /// Directory starting at `first_cluster`. Cluster 0 is how `..` entries
    /// refer to the root.
    pub(super) fn dir_of(&self, first_cluster: u32) -> DirLocation {
        if first_cluster == 0 {
            self.root()
        } else {
            DirLocation::Chain(first_cluster)
        }
    }

    /// Writes every FAT sector that differs from the cached copy, to every
    /// FAT on the volume. `fat_dirty` stays set if anything failed.
    pub(super) fn flush_fat(&self, state: &mut FatState) -> FsResult<()> {
        if !state.fat_dirty {
            return Ok(());
        }
        let bps = self.bytes_per_sector();
        let mut result = Ok(());
        let mut written = 0;
        for copy in 0..self.geometry.fat_count {
            let base = self.geometry.fat_start_lba + copy * self.geometry.fat_size_sectors;
            for (index, ours) in state.table.as_bytes().chunks(bps).enumerate() {
                let lba = u64::from(base) + index as u64;
                let outcome = self.cache.get(self.device, lba).map(|buffer| {
                    if buffer.read(|theirs| theirs != ours) {
                        buffer.modify(|theirs| theirs.copy_from_slice(ours));
                        written += 1;
                    }
                });
                if let Err(err) = outcome {
                    log::error!("fat: updating FAT sector {lba} failed: {err}");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        log::trace!("fat: flushed {written} FAT sectors");
        if result.is_ok() {
            state.fat_dirty = false;
        }
        result
    }

    /// Sector LBAs of a directory, in slot order.
    pub(super) fn directory_sectors(&self, table: &FatTable, dir: DirLocation) -> FsResult<Vec<u32>> {
        match dir {
            DirLocation::FixedRoot => {
                let start = self.geometry.root_dir_start_lba;
                Ok((start..start + self.geometry.root_dir_sectors).collect())
            }
            DirLocation::Chain(first) => {
                let spc = self.geometry.sectors_per_cluster;
                let mut sectors = Vec::new();
                let mut chain = table.chain(first);
                for cluster in chain.by_ref() {
                    let lba = self
                        .geometry
                        .cluster_to_lba(cluster)
                        .ok_or(FsError::Corrupt)?;
                    sectors.extend(lba..lba + spc);
                }
                if let ChainEnd::Invalid(value) = chain.end() {
                    log::warn!(
                        "fat: directory chain from cluster {first} ends in invalid entry {value:#x}"
                    );
                }
                Ok(sectors)
            }
        }
    }

    fn slot_location(&self, sectors: &[u32], slot: usize) -> FsResult<EntryLocation> {
        let per_sector = self.slots_per_sector();
        let lba = *sectors.get(slot / per_sector).ok_or(FsError::Internal)?;
        Ok(EntryLocation {
            lba,
            offset: (slot % per_sector) * DIR_ENTRY_SIZE,
        })
    }

    /// Walks the 8.3 entries of `dir` from slot `start_slot` on, pairing each
    /// with the long-name run in front of it. Deleted slots and volume labels
    /// are skipped, a 0x00 slot ends the walk.
    pub(super) fn scan_directory<T>(
        &self,
        table: &FatTable,
        dir: DirLocation,
        start_slot: usize,
        mut visit: impl FnMut(ScannedEntry) -> ControlFlow<T>,
    ) -> FsResult<Option<T>> {
        let sectors = self.directory_sectors(table, dir)?;
        let per_sector = self.slots_per_sector();
        let mut builder = LongNameBuilder::new();

        for (sector_index, &lba) in sectors.iter().enumerate().skip(start_slot / per_sector) {
            let buffer = self.cache.get(self.device, u64::from(lba))?;
            let step = buffer.read(|data| {
                for (index, slot) in DirectorySector(data).iter() {
                    let slot_index = sector_index * per_sector + index;
                    if slot_index < start_slot {
                        continue;
                    }
                    match slot {
                        DirSlot::End => return ScanStep::End,
                        DirSlot::Deleted | DirSlot::VolumeLabel(_) => builder.reset(),
                        DirSlot::LongName(lfn) => builder.push(&lfn),
                        DirSlot::Short(entry) => {
                            let short_name = entry.short_name();
                            let run = builder.len();
                            let (name, lfn_slots) = match builder.finish(short_name.checksum()) {
                                Some(long_name) => (long_name, slot_index - run..slot_index),
                                None => (short_name.to_string(), slot_index..slot_index),
                            };
                            let scanned = ScannedEntry {
                                entry,
                                short_name,
                                name,
                                dir,
                                location: EntryLocation {
                                    lba,
                                    offset: index * DIR_ENTRY_SIZE,
                                },
                                slot: slot_index,
                                lfn_slots,
                            };
                            if let ControlFlow::Break(value) = visit(scanned) {
                                return ScanStep::Found(value);
                            }
                        }
                    }
                }
                ScanStep::Next
            });
            match step {
                ScanStep::Next => {}
                ScanStep::End => return Ok(None),
                ScanStep::Found(value) => return Ok(Some(value)),
            }
        }
        Ok(None)
    }

    /// Finds `name` in `dir`, matching the long name or the 8.3 alias, both
    /// case-insensitively.
    fn find_in_directory(
        &self,
        table: &FatTable,
        dir: DirLocation,
        name: &str,
    ) -> FsResult<Option<ScannedEntry>> {
        self.scan_directory(table, dir, 0, |scanned| {
            if scanned.name.eq_ignore_ascii_case(name) || scanned.short_name.matches(name) {
                ControlFlow::Break(scanned)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    pub(super) fn lookup(&self, table: &FatTable, path: &FilePath) -> FsResult<Lookup> {
        let Some((last, parents)) = path.components().split_last() else {
            return Ok(Lookup::Root);
        };
        let mut dir = self.root();
        for component in parents {
            let found = self
                .find_in_directory(table, dir, component.as_str())?
                .ok_or(FsError::NotFound)?;
            if !found.entry.is_directory() {
                return Err(FsError::NotADirectory);
            }
            dir = self.dir_of(found.entry.first_cluster(self.is_fat32()));
        }
        let found = self
            .find_in_directory(table, dir, last.as_str())?
            .ok_or(FsError::NotFound)?;
        Ok(Lookup::Entry(found))
    }

    pub(super) fn resolve_directory(&self, table: &FatTable, path: &FilePath) -> FsResult<DirLocation> {
        match self.lookup(table, path)? {
            Lookup::Root => Ok(self.root()),
            Lookup::Entry(found) if found.entry.is_directory() => {
                Ok(self.dir_of(found.entry.first_cluster(self.is_fat32())))
            }
            Lookup::Entry(_) => Err(FsError::NotADirectory),
        }
    }

    /// Picks the 8.3 name for a new entry and whether it needs a long-name
    /// run. A name that already is a valid 8.3 name is used as is; anything
    /// else gets its basis name, or the first free `~N` variant of it.
    fn choose_short_name(
        &self,
        table: &FatTable,
        dir: DirLocation,
        name: &str,
    ) -> FsResult<(ShortName, bool)> {
        let mut taken = BTreeSet::new();
        self.scan_directory::<()>(table, dir, 0, |scanned| {
            taken.insert(scanned.short_name.0);
            ControlFlow::Continue(())
        })?;

        if let Some(exact) = ShortName::parse_exact(name) {
            if taken.contains(&exact.0) {
                return Err(FsError::FileExists);
            }
            return Ok((exact, false));
        }

        let (basis, lossy) = ShortName::from_long_name(name);
        if !lossy && !taken.contains(&basis.0) {
            return Ok((basis, true));
        }
        (1..=MAX_NUMERIC_TAIL)
            .filter_map(|n| basis.with_numeric_tail(n))
            .find(|candidate| !taken.contains(&candidate.0))
            .map(|candidate| (candidate, true))
            .ok_or_else(|| {
                log::warn!("fat: every short name for {name:?} is taken");
                FsError::NameTooLong
            })
    }

    /// Finds `needed` consecutive free slots in `dir`, growing a cluster
    /// chained directory when there are none. Returns the directory's
    /// sectors (including any new ones) and the first slot of the run.
    fn reserve_slots(
        &self,
        state: &mut FatState,
        dir: DirLocation,
        needed: usize,
    ) -> FsResult<(Vec<u32>, usize)> {
        let per_sector = self.slots_per_sector();
        let mut sectors = self.directory_sectors(&state.table, dir)?;
        let mut run_start = 0;
        let mut run_len = 0;
        let mut ended = false;

        for (sector_index, &lba) in sectors.iter().enumerate() {
            let buffer = self.cache.get(self.device, u64::from(lba))?;
            let found = buffer.read(|data| {
                for (index, slot) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                    // Everything after the end marker is free as well.
                    ended |= slot[0] == END_MARKER;
                    if ended || slot[0] == DELETED_MARKER {
                        if run_len == 0 {
                            run_start = sector_index * per_sector + index;
                        }
                        run_len += 1;
                        if run_len == needed {
                            return true;
                        }
                    } else {
                        run_len = 0;
                    }
                }
                false
            });
            if found {
                return Ok((sectors, run_start));
            }
        }

        let DirLocation::Chain(first) = dir else {
            log::debug!("fat: fixed root directory is full");
            return Err(FsError::NoSpace);
        };
        if run_len == 0 {
            run_start = sectors.len() * per_sector;
        }
        let mut last = state
            .table
            .chain(first)
            .last()
            .ok_or(FsError::Corrupt)?;
        let spc = self.geometry.sectors_per_cluster;
        while run_len < needed {
            let cluster = state.allocate_cluster(last)?;
            let lba = self
                .geometry
                .cluster_to_lba(cluster)
                .ok_or(FsError::Internal)?;
            for sector in lba..lba + spc {
                let buffer = self.cache.get_overwrite(self.device, u64::from(sector))?;
                buffer.modify(|data| data.fill(0));
                buffer.flush()?;
                sectors.push(sector);
            }
            log::debug!("fat: grew directory at cluster {first} by cluster {cluster}");
            run_len += spc as usize * per_sector;
            last = cluster;
        }
        Ok((sectors, run_start))
    }

    /// Writes whole slots, then flushes each touched sector.
    fn write_slots(&self, slots: &[(EntryLocation, [u8; DIR_ENTRY_SIZE])]) -> FsResult<()> {
        for (location, bytes) in slots {
            let buffer = self.cache.get(self.device, u64::from(location.lba))?;
            buffer.modify(|data| {
                data[location.offset..location.offset + DIR_ENTRY_SIZE].copy_from_slice(bytes);
            });
        }
        self.flush_sectors(slots.iter().map(|(location, _)| location.lba))
    }

    fn flush_sectors(&self, lbas: impl Iterator<Item = u32>) -> FsResult<()> {
        let mut lbas: Vec<u32> = lbas.collect();
        lbas.sort_unstable();
        lbas.dedup();
        for lba in lbas {
            self.cache.get(self.device, u64::from(lba))?.flush()?;
        }
        Ok(())
    }

    /// Read-modify-write of a single 8.3 entry, flushed straight away.
    pub(super) fn update_entry(
        &self,
        location: EntryLocation,
        update: impl FnOnce(&mut DirEntry),
    ) -> FsResult<()> {
        let buffer = self.cache.get(self.device, u64::from(location.lba))?;
        buffer
            .modify(|data| {
                let slot = data.get_mut(location.offset..location.offset + DIR_ENTRY_SIZE)?;
                let mut entry = DirEntry::read(slot)?;
                update(&mut entry);
                entry.write(slot)
            })
            .ok_or(FsError::Internal)?;
        buffer.flush()
    }

    /// Adds an empty file called `name` to `dir`: long-name run (if the name
    /// is not a plain 8.3 name) followed by the 8.3 entry.
    pub(super) fn create(
        &self,
        state: &mut FatState,
        dir: DirLocation,
        name: &str,
    ) -> FsResult<ScannedEntry> {
        ::fat::validate_long_name(name)?;
        let (short_name, needs_long_name) = self.choose_short_name(&state.table, dir, name)?;
        let long_entries = if needs_long_name {
            ::fat::long_name_entries(name, short_name.checksum())?
        } else {
            Vec::new()
        };

        let needed = long_entries.len() + 1;
        let reserved = self.reserve_slots(state, dir, needed);
        // A grown directory has already linked its new clusters.
        self.flush_fat(state)?;
        let (sectors, first_slot) = reserved?;

        let mut entry = DirEntry::new(short_name, Attributes::ARCHIVE);
        if let Some(now) = self.now() {
            entry.set_created(now);
        }

        let mut slots = Vec::with_capacity(needed);
        for (index, long_entry) in long_entries.iter().enumerate() {
            let location = self.slot_location(&sectors, first_slot + index)?;
            slots.push((location, lfn_bytes(long_entry)?));
        }
        let slot = first_slot + long_entries.len();
        let location = self.slot_location(&sectors, slot)?;
        let mut bytes = [0; DIR_ENTRY_SIZE];
        entry.write(&mut bytes).ok_or(FsError::Internal)?;
        slots.push((location, bytes));
        self.write_slots(&slots)?;

        log::debug!("fat: created {name:?} as {short_name}");
        Ok(ScannedEntry {
            entry,
            short_name,
            name: name.to_string(),
            dir,
            location,
            slot,
            lfn_slots: first_slot..slot,
        })
    }

    /// Frees the clusters of a file and zeroes its size and first cluster.
    pub(super) fn truncate(&self, state: &mut FatState, found: &ScannedEntry) -> FsResult<()> {
        let fat32 = self.is_fat32();
        state.free_chain(found.entry.first_cluster(fat32));
        let now = self.now();
        self.update_entry(found.location, |entry| {
            entry.file_size = 0;
            entry.set_first_cluster(0, fat32);
            if let Some(now) = now {
                entry.set_modified(now);
            }
        })?;
        self.flush_fat(state)
    }

    /// Deletes a regular file: frees its clusters and marks its 8.3 entry and
    /// long-name run deleted.
    pub fn remove_file(&self, path: &FilePath) -> FsResult<()> {
        let mut state = self.state.lock();
        let Lookup::Entry(found) = self.lookup(&state.table, path)? else {
            return Err(FsError::IsADirectory);
        };
        if found.entry.is_directory() {
            return Err(FsError::IsADirectory);
        }
        if found.entry.attributes().contains(Attributes::READ_ONLY) {
            return Err(FsError::PermissionDenied);
        }
        if self.is_open(found.location) {
            return Err(FsError::Busy);
        }

        state.free_chain(found.entry.first_cluster(self.is_fat32()));

        let sectors = self.directory_sectors(&state.table, found.dir)?;
        let mut locations = Vec::with_capacity(found.lfn_slots.len() + 1);
        for slot in found.lfn_slots.clone().chain(core::iter::once(found.slot)) {
            locations.push(self.slot_location(&sectors, slot)?);
        }
        for location in &locations {
            self.cache
                .get(self.device, u64::from(location.lba))?
                .modify(|data| data[location.offset] = DELETED_MARKER);
        }
        self.flush_sectors(locations.iter().map(|location| location.lba))?;
        self.flush_fat(&mut state)?;
        drop(state);

        log::debug!("fat: unlinked {path}");
        self.cache.sync_device(self.device)
    }

    /// Copies `out.len()` bytes starting `offset` bytes into `cluster`,
    /// touching only the sectors that overlap.
    pub(super) fn read_cluster(&self, cluster: u32, offset: u32, out: &mut [u8]) -> FsResult<()> {
        let bps = self.bytes_per_sector();
        let first = self
            .geometry
            .cluster_to_lba(cluster)
            .ok_or(FsError::Corrupt)?;
        let mut position = offset as usize;
        let mut done = 0;
        while done < out.len() {
            let (sector, in_sector) = (position / bps, position % bps);
            let chunk = (out.len() - done).min(bps - in_sector);
            let buffer = self
                .cache
                .get(self.device, u64::from(first) + sector as u64)?;
            buffer.read(|data| {
                out[done..done + chunk].copy_from_slice(&data[in_sector..in_sector + chunk]);
            });
            done += chunk;
            position += chunk;
        }
        Ok(())
    }

    /// Writes `len` bytes at `offset` into `cluster`. `fill(at, dst)` supplies
    /// the bytes for `dst`, `at` counting from the start of this write.
    /// Sectors that are overwritten completely are not read first.
    pub(super) fn write_cluster(
        &self,
        cluster: u32,
        offset: u32,
        len: usize,
        mut fill: impl FnMut(usize, &mut [u8]),
    ) -> FsResult<()> {
        let bps = self.bytes_per_sector();
        let first = self
            .geometry
            .cluster_to_lba(cluster)
            .ok_or(FsError::Corrupt)?;
        let mut position = offset as usize;
        let mut done = 0;
        while done < len {
            let (sector, in_sector) = (position / bps, position % bps);
            let chunk = (len - done).min(bps - in_sector);
            let lba = u64::from(first) + sector as u64;
            let buffer = if chunk == bps {
                self.cache.get_overwrite(self.device, lba)?
            } else {
                self.cache.get(self.device, lba)?
            };
            buffer.modify(|data| fill(done, &mut data[in_sector..in_sector + chunk]));
            done += chunk;
            position += chunk;
        }
        Ok(())
    }
}

pub(super) fn lfn_bytes(entry: &LfnEntry) -> FsResult<[u8; DIR_ENTRY_SIZE]> {
    let mut bytes = [0; DIR_ENTRY_SIZE];
    entry.write(&mut bytes).ok_or(FsError::Internal)?;
    Ok(bytes)
}
