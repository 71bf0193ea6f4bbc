use alloc::vec::Vec;

use crate::FatType;

/// Decoded meaning of one FAT entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    /// Value 1, never valid inside a chain.
    Reserved,
    Next(u32),
    Bad,
    EndOfChain,
}

/// In-memory image of one FAT. Entries are packed the way they are on disk
/// (12, 16 or 32 bits each, little-endian), so the image can be compared and
/// written back sector by sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatTable {
    fat_type: FatType,
    bytes: Vec<u8>,
    /// Number of addressable entries, including the two reserved ones.
    entry_count: u32,
}

impl FatTable {
    /// Wraps a raw FAT image. Only the first `cluster_count + 2` entries are
    /// addressable, even if the image has slack at the end.
    pub fn new(fat_type: FatType, bytes: Vec<u8>, cluster_count: u32) -> Self {
        let mut entry_count = cluster_count.saturating_add(2);
        while entry_count > 0 && fat_type.table_bytes(u64::from(entry_count)) > bytes.len() as u64 {
            entry_count -= 1;
        }
        Self {
            fat_type,
            bytes,
            entry_count,
        }
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw entry value, with the reserved top nibble stripped for FAT32.
    pub fn entry(&self, cluster: u32) -> Option<u32> {
        if cluster >= self.entry_count {
            return None;
        }
        let index = cluster as usize;
        let value = match self.fat_type {
            FatType::Fat12 => {
                let offset = index + index / 2;
                let pair = u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]]);
                if index & 1 == 0 {
                    u32::from(pair & 0x0FFF)
                } else {
                    u32::from(pair >> 4)
                }
            }
            FatType::Fat16 => {
                let offset = index * 2;
                u32::from(u16::from_le_bytes([
                    self.bytes[offset],
                    self.bytes[offset + 1],
                ]))
            }
            FatType::Fat32 => {
                let offset = index * 4;
                let raw = u32::from_le_bytes([
                    self.bytes[offset],
                    self.bytes[offset + 1],
                    self.bytes[offset + 2],
                    self.bytes[offset + 3],
                ]);
                raw & 0x0FFF_FFFF
            }
        };
        Some(value)
    }

    /// Writes an entry. For FAT32 the top four bits already on disk are
    /// preserved. Returns `None` if the cluster is out of range.
    pub fn set_entry(&mut self, cluster: u32, value: u32) -> Option<()> {
        if cluster >= self.entry_count {
            return None;
        }
        let index = cluster as usize;
        match self.fat_type {
            FatType::Fat12 => {
                let offset = index + index / 2;
                let old = u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]]);
                let value = (value & 0x0FFF) as u16;
                let new = if index & 1 == 0 {
                    (old & 0xF000) | value
                } else {
                    (old & 0x000F) | (value << 4)
                };
                self.bytes[offset..offset + 2].copy_from_slice(&new.to_le_bytes());
            }
            FatType::Fat16 => {
                let offset = index * 2;
                self.bytes[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            FatType::Fat32 => {
                let offset = index * 4;
                let old = u32::from_le_bytes([
                    self.bytes[offset],
                    self.bytes[offset + 1],
                    self.bytes[offset + 2],
                    self.bytes[offset + 3],
                ]);
                let new = (old & 0xF000_0000) | (value & 0x0FFF_FFFF);
                self.bytes[offset..offset + 4].copy_from_slice(&new.to_le_bytes());
            }
        }
        Some(())
    }

    pub fn decode(&self, cluster: u32) -> Option<FatEntry> {
        let value = self.entry(cluster)?;
        let entry = match value {
            0 => FatEntry::Free,
            1 => FatEntry::Reserved,
            v if v >= self.fat_type.eoc_threshold() => FatEntry::EndOfChain,
            v if v == self.fat_type.bad_cluster_marker() => FatEntry::Bad,
            v => FatEntry::Next(v),
        };
        Some(entry)
    }

    /// Follows one link of a chain. Any value at or above the EOC threshold
    /// is normalised to the canonical EOC marker for the FAT type.
    pub fn next_cluster(&self, cluster: u32) -> Option<u32> {
        let value = self.entry(cluster)?;
        if self.fat_type.is_eoc(value) {
            Some(self.fat_type.eoc_marker())
        } else {
            Some(value)
        }
    }

    /// Marks `cluster` as the last cluster of its chain.
    pub fn mark_eoc(&mut self, cluster: u32) -> Option<()> {
        self.set_entry(cluster, self.fat_type.eoc_marker())
    }

    /// Linear scan for the first free data cluster at or after `start`.
    pub fn find_free(&self, start: u32) -> Option<u32> {
        (start.max(2)..self.entry_count).find(|&cluster| self.entry(cluster) == Some(0))
    }

    pub fn free_count(&self) -> u32 {
        (2..self.entry_count)
            .filter(|&cluster| self.entry(cluster) == Some(0))
            .count() as u32
    }

    /// Iterates over the clusters of the chain starting at `start`. The walk
    /// ends at an EOC marker or at the first value that cannot continue a
    /// chain (free, reserved, bad, out of range). Cycles are cut off after
    /// `entry_count` steps.
    pub fn chain(&self, start: u32) -> ClusterChain<'_> {
        ClusterChain {
            table: self,
            next: Some(start),
            remaining: self.entry_count,
            end: ChainEnd::Open,
        }
    }

    /// Indexes of the `sector_size` chunks that differ from `on_disk`.
    pub fn changed_sectors(&self, on_disk: &[u8], sector_size: usize) -> Vec<usize> {
        self.bytes
            .chunks(sector_size)
            .zip(on_disk.chunks(sector_size))
            .enumerate()
            .filter(|(_, (ours, theirs))| ours != theirs)
            .map(|(index, _)| index)
            .collect()
    }
}

/// How a [`ClusterChain`] walk terminated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChainEnd {
    /// Still walking.
    Open,
    EndOfChain,
    /// Hit a value that is not a valid link (0, 1, bad marker, out of range)
    /// or a cycle.
    Invalid(u32),
}

#[derive(Debug)]
pub struct ClusterChain<'a> {
    table: &'a FatTable,
    next: Option<u32>,
    remaining: u32,
    end: ChainEnd,
}

impl ClusterChain<'_> {
    pub fn end(&self) -> ChainEnd {
        self.end
    }
}

impl Iterator for ClusterChain<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let cluster = self.next.take()?;
        if cluster < 2 || cluster >= self.table.entry_count || self.remaining == 0 {
            self.end = ChainEnd::Invalid(cluster);
            return None;
        }
        self.remaining -= 1;
        match self.table.decode(cluster) {
            Some(FatEntry::Next(next)) => self.next = Some(next),
            Some(FatEntry::EndOfChain) => self.end = ChainEnd::EndOfChain,
            Some(FatEntry::Free | FatEntry::Reserved | FatEntry::Bad) | None => {
                self.end = ChainEnd::Invalid(self.table.entry(cluster).unwrap_or(0));
            }
        }
        Some(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn table(fat_type: FatType, clusters: u32) -> FatTable {
        let bytes = vec![0; fat_type.table_bytes(u64::from(clusters) + 2) as usize];
        FatTable::new(fat_type, bytes, clusters)
    }

    #[test]
    fn fat12_packs_neighbouring_entries() {
        let mut fat = table(FatType::Fat12, 10);
        fat.set_entry(2, 0xABC).unwrap();
        fat.set_entry(3, 0x123).unwrap();
        assert_eq!(fat.entry(2), Some(0xABC));
        assert_eq!(fat.entry(3), Some(0x123));
        // Entry 2 starts at byte 3, entry 3 shares byte 4.
        assert_eq!(&fat.as_bytes()[3..6], &[0xBC, 0x3A, 0x12]);
    }

    #[test]
    fn fat32_preserves_reserved_nibble() {
        let mut bytes = vec![0; 4 * 8];
        bytes[4 * 5 + 3] = 0xA0;
        let mut fat = FatTable::new(FatType::Fat32, bytes, 6);
        fat.set_entry(5, 0xFFFF_FFFF).unwrap();
        assert_eq!(fat.entry(5), Some(0x0FFF_FFFF));
        assert_eq!(fat.as_bytes()[4 * 5 + 3], 0xAF);
    }

    #[test]
    fn chain_stops_at_eoc() {
        let mut fat = table(FatType::Fat16, 20);
        fat.set_entry(2, 5).unwrap();
        fat.set_entry(5, 9).unwrap();
        fat.mark_eoc(9).unwrap();
        let mut chain = fat.chain(2);
        assert_eq!(chain.by_ref().collect::<Vec<_>>(), vec![2, 5, 9]);
        assert_eq!(chain.end(), ChainEnd::EndOfChain);
    }

    #[test]
    fn chain_stops_at_free_entry() {
        let mut fat = table(FatType::Fat16, 20);
        fat.set_entry(2, 3).unwrap();
        let mut chain = fat.chain(2);
        assert_eq!(chain.by_ref().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(chain.end(), ChainEnd::Invalid(0));
    }

    #[test]
    fn chain_cuts_cycles() {
        let mut fat = table(FatType::Fat32, 8);
        fat.set_entry(2, 3).unwrap();
        fat.set_entry(3, 2).unwrap();
        let mut chain = fat.chain(2);
        assert_eq!(chain.by_ref().count(), 10);
        assert!(matches!(chain.end(), ChainEnd::Invalid(_)));
    }

    #[test]
    fn next_cluster_normalises_eoc() {
        let mut fat = table(FatType::Fat12, 10);
        fat.set_entry(4, 0xFF9).unwrap();
        assert_eq!(fat.next_cluster(4), Some(0xFFF));
    }

    #[test]
    fn find_free_skips_reserved_entries() {
        let mut fat = table(FatType::Fat16, 10);
        fat.set_entry(0, 0xFFF8).unwrap();
        fat.set_entry(1, 0xFFFF).unwrap();
        fat.mark_eoc(2).unwrap();
        assert_eq!(fat.find_free(0), Some(3));
        assert_eq!(fat.free_count(), 9);
    }

    #[test]
    fn changed_sectors_reports_dirty_chunks() {
        let mut fat = table(FatType::Fat16, 600);
        let original = fat.as_bytes().to_vec();
        fat.set_entry(300, 7).unwrap();
        assert_eq!(fat.changed_sectors(&original, 512), vec![1]);
    }

    fn fat_type_strategy() -> impl Strategy<Value = FatType> {
        prop_oneof![
            Just(FatType::Fat12),
            Just(FatType::Fat16),
            Just(FatType::Fat32),
        ]
    }

    proptest! {
        #[test]
        fn set_then_get(
            fat_type in fat_type_strategy(),
            writes in prop::collection::vec((2..200_u32, any::<u32>()), 1..50),
        ) {
            let mut fat = table(fat_type, 198);
            let mut model = std::collections::BTreeMap::new();
            for (cluster, value) in writes {
                fat.set_entry(cluster, value).unwrap();
                model.insert(cluster, value & fat_type.entry_mask());
            }
            for (cluster, value) in model {
                prop_assert_eq!(fat.entry(cluster), Some(value));
            }
        }
    }
}
