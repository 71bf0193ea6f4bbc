use core::fmt;

use zerocopy::AsBytes;

use crate::{
    BIOSParameterBlock, BootSectorError, Fat16Extension, Fat32Extension, FatTable, FatType,
    Geometry, BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET,
};

const FS_INFO_LEAD_SIGNATURE: u32 = 0x4161_5252;
const FS_INFO_STRUCT_SIGNATURE: u32 = 0x6141_7272;
const FS_INFO_TRAIL_SIGNATURE: u32 = 0xAA55_0000;

/// Parameters for [`format_volume`]. The volume size is the size of the
/// buffer handed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub fat_type: FatType,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub fat_count: u8,
    /// Must be zero for FAT32.
    pub root_entry_count: u16,
    pub media_descriptor: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
}

impl FormatOptions {
    /// A 1.44 MB floppy style layout.
    pub fn fat12() -> Self {
        Self {
            fat_type: FatType::Fat12,
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            fat_count: 2,
            root_entry_count: 224,
            media_descriptor: 0xF0,
            volume_id: 0x1234_5678,
            volume_label: *b"NO NAME    ",
        }
    }

    pub fn fat16() -> Self {
        Self {
            fat_type: FatType::Fat16,
            root_entry_count: 512,
            media_descriptor: 0xF8,
            ..Self::fat12()
        }
    }

    pub fn fat32() -> Self {
        Self {
            fat_type: FatType::Fat32,
            root_entry_count: 0,
            media_descriptor: 0xF8,
            ..Self::fat12()
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The buffer cannot hold the metadata plus at least one cluster.
    TooSmall,
    UnsupportedGeometry,
    /// The volume size and cluster size give a cluster count of another FAT
    /// type.
    ClusterCountMismatch { requested: FatType, actual: FatType },
    /// The freshly written boot sector did not parse back.
    Geometry(BootSectorError),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "volume too small"),
            Self::UnsupportedGeometry => write!(f, "unsupported volume geometry"),
            Self::ClusterCountMismatch { requested, actual } => write!(
                f,
                "cluster count gives {actual}, not the requested {requested}"
            ),
            Self::Geometry(err) => write!(f, "formatted boot sector is invalid: {err}"),
        }
    }
}

impl From<BootSectorError> for FormatError {
    fn from(err: BootSectorError) -> Self {
        Self::Geometry(err)
    }
}

/// Smallest FAT size (in sectors) that can describe every data cluster left
/// over once the FATs themselves are placed.
fn fat_size_for(options: &FormatOptions, data_sectors: u32) -> u32 {
    let bps = u64::from(options.bytes_per_sector);
    let spc = u64::from(options.sectors_per_cluster);
    let fats = u64::from(options.fat_count);
    let bits = u64::from(options.fat_type.bits());

    let estimate = (u64::from(data_sectors) + 2 * spc) * bits / (bps * 8 * spc + fats * bits);
    let mut fat_size = estimate.max(1) as u32;
    loop {
        let used = u64::from(fat_size) * fats;
        let clusters = u64::from(data_sectors).saturating_sub(used) / spc;
        let needed = options.fat_type.table_bytes(clusters + 2).div_ceil(bps);
        if needed <= u64::from(fat_size) {
            return fat_size;
        }
        fat_size += 1;
    }
}

/// Writes an empty FAT12/16/32 file system over `image`.
pub fn format_volume(image: &mut [u8], options: &FormatOptions) -> Result<Geometry, FormatError> {
    let bps = options.bytes_per_sector;
    if !matches!(bps, 512 | 1024 | 2048 | 4096)
        || options.sectors_per_cluster == 0
        || !options.sectors_per_cluster.is_power_of_two()
        || options.sectors_per_cluster > 128
        || options.fat_count == 0
        || (options.fat_type == FatType::Fat32) != (options.root_entry_count == 0)
    {
        return Err(FormatError::UnsupportedGeometry);
    }

    let sector_size = usize::from(bps);
    let total_sectors =
        u32::try_from(image.len() / sector_size).map_err(|_| FormatError::UnsupportedGeometry)?;
    let reserved_sectors: u32 = if options.fat_type == FatType::Fat32 { 32 } else { 1 };
    let root_dir_sectors = (u32::from(options.root_entry_count) * 32).div_ceil(u32::from(bps));

    let metadata = reserved_sectors + root_dir_sectors;
    if total_sectors <= metadata {
        return Err(FormatError::TooSmall);
    }
    let fat_size = fat_size_for(options, total_sectors - metadata);
    let first_data_sector = metadata + u32::from(options.fat_count) * fat_size;
    if first_data_sector + u32::from(options.sectors_per_cluster) > total_sectors {
        return Err(FormatError::TooSmall);
    }
    let cluster_count = (total_sectors - first_data_sector) / u32::from(options.sectors_per_cluster);
    let actual = FatType::from_cluster_count(cluster_count);
    if actual != options.fat_type {
        return Err(FormatError::ClusterCountMismatch {
            requested: options.fat_type,
            actual,
        });
    }

    // Everything up to the data region (plus the FAT32 root cluster) starts
    // out zeroed. The rest of the data region is left alone.
    let root_cluster_sectors = if options.fat_type == FatType::Fat32 {
        u32::from(options.sectors_per_cluster)
    } else {
        0
    };
    let clear_end = (first_data_sector + root_cluster_sectors) as usize * sector_size;
    image[..clear_end].fill(0);

    write_boot_sector(image, options, total_sectors, reserved_sectors, fat_size);

    let fat_start = reserved_sectors as usize * sector_size;
    let fat_bytes = fat_size as usize * sector_size;
    let mut fat = FatTable::new(
        options.fat_type,
        alloc::vec![0; fat_bytes],
        cluster_count,
    );
    let mask = options.fat_type.entry_mask();
    let _ = fat.set_entry(0, (mask & !0xFF) | u32::from(options.media_descriptor));
    let _ = fat.set_entry(1, options.fat_type.eoc_marker());
    if options.fat_type == FatType::Fat32 {
        let _ = fat.mark_eoc(2);
    }
    for copy in 0..usize::from(options.fat_count) {
        let start = fat_start + copy * fat_bytes;
        image[start..start + fat_bytes].copy_from_slice(fat.as_bytes());
    }

    if options.fat_type == FatType::Fat32 {
        write_fs_info(&mut image[sector_size..2 * sector_size], cluster_count - 1, 3);
        // Backup boot sector and FSInfo at sectors 6 and 7.
        let (primary, rest) = image.split_at_mut(6 * sector_size);
        rest[..2 * sector_size].copy_from_slice(&primary[..2 * sector_size]);
    }

    Ok(Geometry::parse(&image[..sector_size])?)
}

fn write_boot_sector(
    image: &mut [u8],
    options: &FormatOptions,
    total_sectors: u32,
    reserved_sectors: u32,
    fat_size: u32,
) {
    let fat32 = options.fat_type == FatType::Fat32;
    let small_total = u16::try_from(total_sectors).ok().filter(|_| !fat32);

    let bpb = BIOSParameterBlock {
        jmp_boot: [0xEB, if fat32 { 0x58 } else { 0x3C }, 0x90],
        oem_name: *b"RUSTOS  ",
        bytes_per_sector: options.bytes_per_sector,
        sectors_per_cluster: options.sectors_per_cluster,
        reserved_sectors: reserved_sectors as u16,
        fat_count: options.fat_count,
        root_dir_entries: options.root_entry_count,
        total_sectors: small_total.unwrap_or(0),
        media_descriptor: options.media_descriptor,
        sectors_per_fat: if fat32 { 0 } else { fat_size as u16 },
        sectors_per_track: 63,
        head_count: 255,
        hidden_sectors: 0,
        total_sectors_large: if small_total.is_some() { 0 } else { total_sectors },
    };
    let _ = bpb.write_to_prefix(image);

    let extension = &mut image[BIOSParameterBlock::SIZE..];
    if fat32 {
        let ext = Fat32Extension {
            sectors_per_fat: fat_size,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 2,
            fs_info_sector: 1,
            backup_boot_sector: 6,
            reserved: [0; 12],
            drive_number: 0x80,
            reserved_nt: 0,
            boot_signature: 0x29,
            volume_id: options.volume_id,
            volume_label: options.volume_label,
            fs_type: *b"FAT32   ",
        };
        let _ = ext.write_to_prefix(extension);
    } else {
        let ext = Fat16Extension {
            drive_number: if options.fat_type == FatType::Fat12 { 0 } else { 0x80 },
            reserved_nt: 0,
            boot_signature: 0x29,
            volume_id: options.volume_id,
            volume_label: options.volume_label,
            fs_type: if options.fat_type == FatType::Fat12 {
                *b"FAT12   "
            } else {
                *b"FAT16   "
            },
        };
        let _ = ext.write_to_prefix(extension);
    }

    image[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);
}

fn write_fs_info(sector: &mut [u8], free_count: u32, next_free: u32) {
    sector[0..4].copy_from_slice(&FS_INFO_LEAD_SIGNATURE.to_le_bytes());
    sector[484..488].copy_from_slice(&FS_INFO_STRUCT_SIGNATURE.to_le_bytes());
    sector[488..492].copy_from_slice(&free_count.to_le_bytes());
    sector[492..496].copy_from_slice(&next_free.to_le_bytes());
    sector[508..512].copy_from_slice(&FS_INFO_TRAIL_SIGNATURE.to_le_bytes());
}
