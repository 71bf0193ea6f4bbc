use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::{DosDateTime, ShortName};

/// Every directory slot is 32 bytes, both 8.3 and long-name ones.
pub const DIR_ENTRY_SIZE: usize = 32;

/// First name byte of a deleted slot.
pub const DELETED_MARKER: u8 = 0xE5;

/// First name byte of the slot that terminates a directory.
pub const END_MARKER: u8 = 0x00;

/// Stored in place of a leading 0xE5 (a valid KANJI lead byte) so that the
/// entry does not look deleted.
pub const KANJI_MARKER: u8 = 0x05;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    /// <https://en.wikipedia.org/wiki/Design_of_the_FAT_file_system#DIR_OFS_0Bh>
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;

        /// Combination used to mark long-name slots.
        const LONG_NAME = 0x0F;
    }
}

/// A classic 8.3 directory entry.
///
/// See <https://wiki.osdev.org/FAT#Standard_8.3_format>
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct DirEntry {
    pub name: [u8; 11],
    pub attr: u8,
    pub nt_reserved: u8,
    pub create_time_tenths: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub first_cluster_high: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster_low: u16,
    pub file_size: u32,
}

impl DirEntry {
    pub fn new(name: ShortName, attributes: Attributes) -> Self {
        Self {
            name: name.0,
            attr: attributes.bits(),
            ..Self::new_zeroed()
        }
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes)
    }

    pub fn write(&self, bytes: &mut [u8]) -> Option<()> {
        self.write_to_prefix(bytes)
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_retain(self.attr)
    }

    pub fn is_directory(&self) -> bool {
        self.attributes().contains(Attributes::DIRECTORY)
    }

    pub fn short_name(&self) -> ShortName {
        let mut name = self.name;
        if name[0] == KANJI_MARKER {
            name[0] = DELETED_MARKER;
        }
        ShortName(name)
    }

    /// On FAT12/16 the high word is not part of the cluster number, so it is
    /// only honoured when the caller says so.
    pub fn first_cluster(&self, fat32: bool) -> u32 {
        let low = u32::from(self.first_cluster_low);
        if fat32 {
            (u32::from(self.first_cluster_high) << 16) | low
        } else {
            low
        }
    }

    pub fn set_first_cluster(&mut self, cluster: u32, fat32: bool) {
        self.first_cluster_low = cluster as u16;
        self.first_cluster_high = if fat32 { (cluster >> 16) as u16 } else { 0 };
    }

    pub fn set_created(&mut self, stamp: DosDateTime) {
        self.create_time_tenths = stamp.tenths;
        self.create_time = stamp.time;
        self.create_date = stamp.date;
        self.access_date = stamp.date;
        self.set_modified(stamp);
    }

    pub fn set_modified(&mut self, stamp: DosDateTime) {
        self.write_time = stamp.time;
        self.write_date = stamp.date;
        self.access_date = stamp.date;
    }

    pub fn modified(&self) -> DosDateTime {
        DosDateTime {
            date: self.write_date,
            time: self.write_time,
            tenths: 0,
        }
    }
}

/// Sequence byte flag on the first physical (last logical) long-name slot.
pub const LFN_LAST_ENTRY: u8 = 0x40;

/// Mask for the 1-based sequence number in a long-name slot.
pub const LFN_SEQUENCE_MASK: u8 = 0x1F;

/// UTF-16 code units held by one long-name slot.
pub const LFN_CHARS_PER_ENTRY: usize = 13;

/// A VFAT long-name slot.
///
/// See <https://wiki.osdev.org/FAT#Long_File_Names>
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct LfnEntry {
    pub sequence: u8,
    pub name1: [u16; 5],
    pub attr: u8,
    pub kind: u8,
    pub checksum: u8,
    pub name2: [u16; 6],
    pub first_cluster: u16,
    pub name3: [u16; 2],
}

impl LfnEntry {
    pub fn read(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes)
    }

    pub fn write(&self, bytes: &mut [u8]) -> Option<()> {
        self.write_to_prefix(bytes)
    }

    pub fn ordinal(&self) -> u8 {
        self.sequence & LFN_SEQUENCE_MASK
    }

    pub fn is_last(&self) -> bool {
        self.sequence & LFN_LAST_ENTRY != 0
    }

    /// The 13 code units of this slot, in name order.
    pub fn units(&self) -> [u16; LFN_CHARS_PER_ENTRY] {
        let (name1, name2, name3) = (self.name1, self.name2, self.name3);
        let mut units = [0; LFN_CHARS_PER_ENTRY];
        units[..5].copy_from_slice(&name1);
        units[5..11].copy_from_slice(&name2);
        units[11..].copy_from_slice(&name3);
        units
    }

    pub fn set_units(&mut self, units: &[u16; LFN_CHARS_PER_ENTRY]) {
        let mut name1 = [0; 5];
        let mut name2 = [0; 6];
        let mut name3 = [0; 2];
        name1.copy_from_slice(&units[..5]);
        name2.copy_from_slice(&units[5..11]);
        name3.copy_from_slice(&units[11..]);
        self.name1 = name1;
        self.name2 = name2;
        self.name3 = name3;
    }
}

/// What a raw 32-byte slot holds.
#[derive(Debug, Clone)]
pub enum DirSlot {
    /// 0x00 in the first byte. Nothing after this slot is in use.
    End,
    Deleted,
    LongName(LfnEntry),
    VolumeLabel(DirEntry),
    Short(DirEntry),
}

impl DirSlot {
    pub fn classify(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DIR_ENTRY_SIZE {
            return None;
        }
        let slot = match bytes[0] {
            END_MARKER => Self::End,
            DELETED_MARKER => Self::Deleted,
            _ if bytes[11] & 0x3F == Attributes::LONG_NAME.bits() => {
                Self::LongName(LfnEntry::read(bytes)?)
            }
            _ if bytes[11] & Attributes::VOLUME_ID.bits() != 0 => {
                Self::VolumeLabel(DirEntry::read(bytes)?)
            }
            _ => Self::Short(DirEntry::read(bytes)?),
        };
        Some(slot)
    }
}

/// A sector (or cluster) worth of directory slots.
#[derive(Debug, Clone)]
pub struct DirectorySector<'a>(pub &'a [u8]);

impl DirectorySector<'_> {
    pub fn iter(&self) -> DirectorySectorIterator<'_> {
        DirectorySectorIterator {
            bytes: self.0,
            index: 0,
        }
    }
}

pub struct DirectorySectorIterator<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl Iterator for DirectorySectorIterator<'_> {
    /// Slot index within the sector, and the slot itself.
    type Item = (usize, DirSlot);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.index * DIR_ENTRY_SIZE;
        let slot = DirSlot::classify(self.bytes.get(start..start + DIR_ENTRY_SIZE)?)?;
        let index = self.index;
        self.index += 1;
        Some((index, slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layouts_are_32_bytes() {
        assert_eq!(core::mem::size_of::<DirEntry>(), DIR_ENTRY_SIZE);
        assert_eq!(core::mem::size_of::<LfnEntry>(), DIR_ENTRY_SIZE);
    }

    #[test]
    fn first_cluster_ignores_high_word_below_fat32() {
        let mut entry = DirEntry::new_zeroed();
        entry.first_cluster_high = 0x0001;
        entry.first_cluster_low = 0x0203;
        assert_eq!(entry.first_cluster(true), 0x0001_0203);
        assert_eq!(entry.first_cluster(false), 0x0203);

        entry.set_first_cluster(0x0004_0005, false);
        let high = entry.first_cluster_high;
        assert_eq!(high, 0);
    }

    #[test]
    fn classify_slots() {
        let mut sector = [0_u8; 128];
        let short = DirEntry::new(ShortName(*b"HELLO   TXT"), Attributes::ARCHIVE);
        short.write(&mut sector[0..]).unwrap();
        sector[32] = DELETED_MARKER;
        sector[64] = 0x41;
        sector[64 + 11] = Attributes::LONG_NAME.bits();

        let slots: Vec<_> = DirectorySector(&sector).iter().collect();
        assert_eq!(slots.len(), 4);
        assert!(matches!(&slots[0].1, DirSlot::Short(e) if e.name == *b"HELLO   TXT"));
        assert!(matches!(slots[1].1, DirSlot::Deleted));
        assert!(matches!(&slots[2].1, DirSlot::LongName(l) if l.ordinal() == 1 && l.is_last()));
        assert!(matches!(slots[3].1, DirSlot::End));
    }

    #[test]
    fn kanji_marker_reads_back_as_e5() {
        let mut entry = DirEntry::new(ShortName(*b"\x05ABC    TXT"), Attributes::empty());
        assert_eq!(entry.short_name().0[0], 0xE5);
        entry.name[0] = b'X';
        assert_eq!(entry.short_name().0[0], b'X');
    }

    #[test]
    fn lfn_units_round_trip_through_fields() {
        let mut entry = LfnEntry::new_zeroed();
        let units: [u16; 13] = core::array::from_fn(|i| i as u16 + 1);
        entry.set_units(&units);
        assert_eq!(entry.units(), units);
        let name3 = entry.name3;
        assert_eq!(name3, [12, 13]);
    }
}
