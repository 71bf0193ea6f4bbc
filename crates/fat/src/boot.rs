use core::fmt;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Offset of the `0x55 0xAA` boot sector signature.
pub const BOOT_SIGNATURE_OFFSET: usize = 510;
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Minimum number of bytes we need to decode a boot sector.
pub const BOOT_SECTOR_SIZE: usize = 512;

/// The BIOS parameter block is the first part of the boot sector. It is shared
/// by all three FAT variants.
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct BIOSParameterBlock {
    pub jmp_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_dir_entries: u16,
    pub total_sectors: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub head_count: u16,
    pub hidden_sectors: u32,
    pub total_sectors_large: u32,
}

impl BIOSParameterBlock {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

/// Extended BPB used by FAT12 and FAT16 volumes. Starts right after the
/// common [`BIOSParameterBlock`].
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct Fat16Extension {
    pub drive_number: u8,
    pub reserved_nt: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

/// Extended BPB used by FAT32 volumes. Starts right after the common
/// [`BIOSParameterBlock`].
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct Fat32Extension {
    pub sectors_per_fat: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub reserved: [u8; 12],
    pub drive_number: u8,
    pub reserved_nt: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

/// The three FAT variants. The variant is never read from the volume label;
/// it is derived from the number of data clusters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Classify a volume by its data cluster count. Below 4085 clusters is
    /// FAT12, below 65525 is FAT16.
    pub fn from_cluster_count(cluster_count: u32) -> Self {
        if cluster_count < 4085 {
            Self::Fat12
        } else if cluster_count < 65525 {
            Self::Fat16
        } else {
            Self::Fat32
        }
    }

    /// Number of significant bits in one FAT entry. FAT32 entries occupy 32
    /// bits on disk but only the low 28 are meaningful.
    pub fn bits(self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 28,
        }
    }

    /// Mask of the meaningful bits of an entry.
    pub fn entry_mask(self) -> u32 {
        match self {
            Self::Fat12 => 0x0FFF,
            Self::Fat16 => 0xFFFF,
            Self::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// Any entry value at or above this threshold terminates a chain.
    pub fn eoc_threshold(self) -> u32 {
        match self {
            Self::Fat12 => 0x0FF8,
            Self::Fat16 => 0xFFF8,
            Self::Fat32 => 0x0FFF_FFF8,
        }
    }

    /// The value we write when marking the end of a chain.
    pub fn eoc_marker(self) -> u32 {
        self.entry_mask()
    }

    /// Most data clusters a volume of this type can address. Higher cluster
    /// numbers collide with the bad-cluster and end-of-chain markers.
    pub fn max_cluster_count(self) -> u32 {
        self.bad_cluster_marker() - 2
    }

    pub fn bad_cluster_marker(self) -> u32 {
        self.eoc_threshold() - 1
    }

    pub fn is_eoc(self, value: u32) -> bool {
        value & self.entry_mask() >= self.eoc_threshold()
    }

    /// Size in bytes of the on-disk region holding `entries` FAT entries.
    pub fn table_bytes(self, entries: u64) -> u64 {
        match self {
            Self::Fat12 => entries + entries.div_ceil(2),
            Self::Fat16 => entries * 2,
            Self::Fat32 => entries * 4,
        }
    }
}

impl fmt::Display for FatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fat12 => write!(f, "FAT12"),
            Self::Fat16 => write!(f, "FAT16"),
            Self::Fat32 => write!(f, "FAT32"),
        }
    }
}

/// Reasons a boot sector is rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootSectorError {
    TooShort(usize),
    BadSignature([u8; 2]),
    BadBytesPerSector(u16),
    BadSectorsPerCluster(u8),
    NoFats,
    NoReservedSectors,
    ZeroTotalSectors,
    ZeroFatSize,
    /// The metadata regions extend past the end of the volume.
    DataRegionOutOfBounds,
    /// The FAT is too small to describe every data cluster.
    FatTooSmall,
    /// More data clusters than the FAT type can number.
    TooManyClusters(u32),
    BadRootCluster(u32),
}

impl fmt::Display for BootSectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "boot sector too short ({len} bytes)"),
            Self::BadSignature(sig) => {
                write!(f, "bad boot signature {:#04x} {:#04x}", sig[0], sig[1])
            }
            Self::BadBytesPerSector(bps) => write!(f, "unsupported bytes per sector {bps}"),
            Self::BadSectorsPerCluster(spc) => write!(f, "invalid sectors per cluster {spc}"),
            Self::NoFats => write!(f, "volume has no FAT copies"),
            Self::NoReservedSectors => write!(f, "reserved sector count is zero"),
            Self::ZeroTotalSectors => write!(f, "total sector count is zero"),
            Self::ZeroFatSize => write!(f, "FAT size is zero"),
            Self::DataRegionOutOfBounds => write!(f, "data region starts past end of volume"),
            Self::FatTooSmall => write!(f, "FAT too small for cluster count"),
            Self::TooManyClusters(count) => {
                write!(f, "{count} clusters is more than the FAT can address")
            }
            Self::BadRootCluster(c) => write!(f, "invalid FAT32 root cluster {c}"),
        }
    }
}

/// Everything we derive from the boot sector at mount time. All sector
/// numbers are LBAs relative to the start of the volume.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub fat_type: FatType,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    pub fat_size_sectors: u32,
    pub total_sectors: u32,
    pub fat_start_lba: u32,
    /// First sector of the fixed root directory (FAT12/16 only).
    pub root_dir_start_lba: u32,
    /// Sectors occupied by the fixed root directory (zero for FAT32).
    pub root_dir_sectors: u32,
    pub root_entry_count: u32,
    pub first_data_sector: u32,
    pub cluster_count: u32,
    /// First cluster of the root directory (FAT32 only, zero otherwise).
    pub root_cluster: u32,
    pub media_descriptor: u8,
}

impl Geometry {
    /// Validates a boot sector and derives the volume geometry from it.
    pub fn parse(boot_sector: &[u8]) -> Result<Self, BootSectorError> {
        if boot_sector.len() < BOOT_SECTOR_SIZE {
            return Err(BootSectorError::TooShort(boot_sector.len()));
        }
        let signature = [
            boot_sector[BOOT_SIGNATURE_OFFSET],
            boot_sector[BOOT_SIGNATURE_OFFSET + 1],
        ];
        if signature != BOOT_SIGNATURE {
            return Err(BootSectorError::BadSignature(signature));
        }

        let bpb = BIOSParameterBlock::read_from_prefix(boot_sector)
            .ok_or(BootSectorError::TooShort(boot_sector.len()))?;
        let ext32 = Fat32Extension::read_from_prefix(&boot_sector[BIOSParameterBlock::SIZE..])
            .ok_or(BootSectorError::TooShort(boot_sector.len()))?;

        let bytes_per_sector = bpb.bytes_per_sector;
        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(BootSectorError::BadBytesPerSector(bytes_per_sector));
        }
        let sectors_per_cluster = bpb.sectors_per_cluster;
        if sectors_per_cluster == 0
            || sectors_per_cluster > 128
            || !sectors_per_cluster.is_power_of_two()
        {
            return Err(BootSectorError::BadSectorsPerCluster(sectors_per_cluster));
        }
        if bpb.fat_count == 0 {
            return Err(BootSectorError::NoFats);
        }
        if bpb.reserved_sectors == 0 {
            return Err(BootSectorError::NoReservedSectors);
        }

        let total_sectors = if bpb.total_sectors != 0 {
            u32::from(bpb.total_sectors)
        } else {
            bpb.total_sectors_large
        };
        if total_sectors == 0 {
            return Err(BootSectorError::ZeroTotalSectors);
        }

        let fat_size_sectors = if bpb.sectors_per_fat != 0 {
            u32::from(bpb.sectors_per_fat)
        } else {
            ext32.sectors_per_fat
        };
        if fat_size_sectors == 0 {
            return Err(BootSectorError::ZeroFatSize);
        }

        let bps = u32::from(bytes_per_sector);
        let root_entry_count = u32::from(bpb.root_dir_entries);
        let root_dir_sectors = (root_entry_count * 32).div_ceil(bps);
        let reserved_sectors = u32::from(bpb.reserved_sectors);
        let fat_count = u32::from(bpb.fat_count);

        let first_data_sector = u64::from(reserved_sectors)
            + u64::from(fat_count) * u64::from(fat_size_sectors)
            + u64::from(root_dir_sectors);
        if first_data_sector >= u64::from(total_sectors) {
            return Err(BootSectorError::DataRegionOutOfBounds);
        }
        let first_data_sector = first_data_sector as u32;

        let cluster_count = (total_sectors - first_data_sector) / u32::from(sectors_per_cluster);
        let fat_type = FatType::from_cluster_count(cluster_count);
        if cluster_count > fat_type.max_cluster_count() {
            return Err(BootSectorError::TooManyClusters(cluster_count));
        }

        // Entries 0 and 1 are reserved, so the table needs two extra slots.
        let table_bytes = fat_type.table_bytes(u64::from(cluster_count) + 2);
        if table_bytes > u64::from(fat_size_sectors) * u64::from(bps) {
            return Err(BootSectorError::FatTooSmall);
        }

        let root_cluster = if fat_type == FatType::Fat32 {
            let root_cluster = ext32.root_cluster;
            if root_cluster < 2 || root_cluster > cluster_count + 1 {
                return Err(BootSectorError::BadRootCluster(root_cluster));
            }
            root_cluster
        } else {
            0
        };

        let fat_start_lba = reserved_sectors;
        Ok(Self {
            fat_type,
            bytes_per_sector: bps,
            sectors_per_cluster: u32::from(sectors_per_cluster),
            reserved_sectors,
            fat_count,
            fat_size_sectors,
            total_sectors,
            fat_start_lba,
            root_dir_start_lba: fat_start_lba + fat_count * fat_size_sectors,
            root_dir_sectors,
            root_entry_count,
            first_data_sector,
            cluster_count,
            root_cluster,
            media_descriptor: bpb.media_descriptor,
        })
    }

    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Highest valid data cluster number.
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        (2..=self.max_cluster()).contains(&cluster)
    }

    /// First sector of a data cluster. Returns `None` for clusters 0 and 1 and
    /// anything past the end of the volume.
    pub fn cluster_to_lba(&self, cluster: u32) -> Option<u32> {
        if !self.is_data_cluster(cluster) {
            return None;
        }
        Some(self.first_data_sector + (cluster - 2) * self.sectors_per_cluster)
    }

    pub fn fat_size_bytes(&self) -> usize {
        self.fat_size_sectors as usize * self.bytes_per_sector as usize
    }

    /// Whether the root directory lives in the fixed area between the FATs
    /// and the data region.
    pub fn has_fixed_root(&self) -> bool {
        self.fat_type != FatType::Fat32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_sector(total: u16, spc: u8, root_entries: u16, fat_size: u16) -> Vec<u8> {
        let mut sector = vec![0; 512];
        let bpb = BIOSParameterBlock {
            jmp_boot: [0xEB, 0x3C, 0x90],
            oem_name: *b"MSWIN4.1",
            bytes_per_sector: 512,
            sectors_per_cluster: spc,
            reserved_sectors: 1,
            fat_count: 2,
            root_dir_entries: root_entries,
            total_sectors: total,
            media_descriptor: 0xF8,
            sectors_per_fat: fat_size,
            sectors_per_track: 32,
            head_count: 64,
            hidden_sectors: 0,
            total_sectors_large: 0,
        };
        bpb.write_to_prefix(&mut sector[..]).unwrap();
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    #[test]
    fn classifies_by_cluster_count() {
        assert_eq!(FatType::from_cluster_count(4084), FatType::Fat12);
        assert_eq!(FatType::from_cluster_count(4085), FatType::Fat16);
        assert_eq!(FatType::from_cluster_count(65524), FatType::Fat16);
        assert_eq!(FatType::from_cluster_count(65525), FatType::Fat32);
    }

    #[test]
    fn parses_floppy_geometry() {
        let geometry = Geometry::parse(&boot_sector(2880, 1, 224, 9)).unwrap();
        assert_eq!(geometry.fat_type, FatType::Fat12);
        assert_eq!(geometry.fat_start_lba, 1);
        assert_eq!(geometry.root_dir_start_lba, 19);
        assert_eq!(geometry.root_dir_sectors, 14);
        assert_eq!(geometry.first_data_sector, 33);
        assert_eq!(geometry.cluster_count, 2847);
        assert_eq!(geometry.cluster_to_lba(2), Some(33));
        assert_eq!(geometry.cluster_to_lba(3), Some(34));
        assert_eq!(geometry.cluster_to_lba(1), None);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut sector = boot_sector(2880, 1, 224, 9);
        sector[511] = 0;
        assert_eq!(
            Geometry::parse(&sector),
            Err(BootSectorError::BadSignature([0x55, 0]))
        );
    }

    #[test]
    fn rejects_non_power_of_two_cluster() {
        let sector = boot_sector(2880, 3, 224, 9);
        assert_eq!(
            Geometry::parse(&sector),
            Err(BootSectorError::BadSectorsPerCluster(3))
        );
    }

    #[test]
    fn rejects_undersized_fat() {
        let sector = boot_sector(2880, 1, 224, 1);
        assert_eq!(Geometry::parse(&sector), Err(BootSectorError::FatTooSmall));
    }

    #[test]
    fn table_size_does_not_wrap() {
        assert_eq!(FatType::Fat32.table_bytes(0xFFFF_FFFE), 0x3_FFFF_FFF8);
        assert_eq!(FatType::Fat16.table_bytes(0x1_0000), 0x2_0000);
        assert_eq!(FatType::Fat12.table_bytes(5), 8);
    }

    #[test]
    fn rejects_more_clusters_than_fat32_can_address() {
        // Four billion one-sector clusters described by a one-sector FAT.
        let mut sector = boot_sector(0, 1, 0, 1);
        sector[32..36].copy_from_slice(&0xFFFF_FFFF_u32.to_le_bytes());
        assert_eq!(
            Geometry::parse(&sector),
            Err(BootSectorError::TooManyClusters(0xFFFF_FFFC))
        );

        // Just inside the limit, the one-sector FAT is what gets rejected.
        let total = 3 + 0x0FFF_FFF5_u32;
        sector[32..36].copy_from_slice(&total.to_le_bytes());
        assert_eq!(Geometry::parse(&sector), Err(BootSectorError::FatTooSmall));
        assert_eq!(FatType::Fat32.max_cluster_count(), 0x0FFF_FFF5);
    }

    #[test]
    fn eoc_detection_masks_reserved_bits() {
        assert!(FatType::Fat32.is_eoc(0xFFFF_FFFF));
        assert!(FatType::Fat32.is_eoc(0x0FFF_FFF8));
        assert!(!FatType::Fat32.is_eoc(0xF000_0003));
        assert!(FatType::Fat12.is_eoc(0xFF8));
        assert!(!FatType::Fat16.is_eoc(0xFFF7));
    }
}
