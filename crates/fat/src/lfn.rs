use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::{Attributes, LfnEntry, LFN_CHARS_PER_ENTRY, LFN_LAST_ENTRY, LFN_SEQUENCE_MASK};
use zerocopy::FromZeroes;

/// Longest name, in UTF-16 code units, that a long-name run can hold.
pub const LFN_MAX_UNITS: usize = 255;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong,
    InvalidCharacter(char),
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty file name"),
            Self::TooLong => write!(f, "file name longer than {LFN_MAX_UNITS} characters"),
            Self::InvalidCharacter(c) => write!(f, "invalid character {c:?} in file name"),
        }
    }
}

/// Checksum of an 8.3 name, stored in every long-name slot of its run.
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name.iter().fold(0_u8, |sum, &byte| {
        let rotated: u8 = if sum & 1 == 0 { 0 } else { 0x80 };
        rotated.wrapping_add(sum >> 1).wrapping_add(byte)
    })
}

fn is_valid_long_name_char(c: char) -> bool {
    !(c < ' ' || matches!(c, '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|' | '\u{7f}'))
}

/// Checks that `name` can be stored as a long name.
pub fn validate_long_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(NameError::Empty);
    }
    if let Some(c) = name.chars().find(|&c| !is_valid_long_name_char(c)) {
        return Err(NameError::InvalidCharacter(c));
    }
    if name.encode_utf16().count() > LFN_MAX_UNITS {
        return Err(NameError::TooLong);
    }
    Ok(())
}

/// Builds the long-name slots for `name`, in the order they are stored on
/// disk: highest sequence number (flagged with 0x40) first, sequence 1 last,
/// directly followed by the 8.3 entry the caller writes.
pub fn long_name_entries(name: &str, checksum: u8) -> Result<Vec<LfnEntry>, NameError> {
    validate_long_name(name)?;
    let units: Vec<u16> = name.encode_utf16().collect();
    let count = units.len().div_ceil(LFN_CHARS_PER_ENTRY);

    let mut entries = Vec::with_capacity(count);
    for (index, chunk) in units.chunks(LFN_CHARS_PER_ENTRY).enumerate() {
        // One 0x0000 terminator, then 0xFFFF padding.
        let mut slot = [0xFFFF_u16; LFN_CHARS_PER_ENTRY];
        slot[..chunk.len()].copy_from_slice(chunk);
        if chunk.len() < LFN_CHARS_PER_ENTRY {
            slot[chunk.len()] = 0x0000;
        }

        let mut sequence = (index + 1) as u8;
        if index + 1 == count {
            sequence |= LFN_LAST_ENTRY;
        }

        let mut entry = LfnEntry::new_zeroed();
        entry.sequence = sequence;
        entry.attr = Attributes::LONG_NAME.bits();
        entry.checksum = checksum;
        entry.set_units(&slot);
        entries.push(entry);
    }
    entries.reverse();
    Ok(entries)
}

/// Collects a run of long-name slots as they are met while scanning a
/// directory and rebuilds the name once the 8.3 entry shows up.
///
/// Any slot that does not continue the run (wrong sequence, checksum change,
/// missing 0x40 flag on the first slot) discards what was collected, so a
/// stale run never attaches to an unrelated 8.3 entry.
#[derive(Debug, Default, Clone)]
pub struct LongNameBuilder {
    /// Slots indexed by `ordinal - 1`.
    slots: Vec<[u16; LFN_CHARS_PER_ENTRY]>,
    checksum: u8,
    /// Ordinal we expect next; 0 means no run is in progress.
    expected: u8,
    /// Number of slots pushed since the run started.
    len: usize,
}

impl LongNameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.expected = 0;
        self.len = 0;
    }

    /// Number of slots in the current run.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, entry: &LfnEntry) {
        let ordinal = entry.ordinal();
        if entry.is_last() {
            self.reset();
            if ordinal == 0 || entry.sequence & !(LFN_LAST_ENTRY | LFN_SEQUENCE_MASK) != 0 {
                return;
            }
            self.slots.resize(ordinal as usize, [0; LFN_CHARS_PER_ENTRY]);
            self.checksum = entry.checksum;
        } else if self.expected == 0
            || ordinal != self.expected
            || entry.checksum != self.checksum
        {
            self.reset();
            return;
        }
        self.slots[ordinal as usize - 1] = entry.units();
        self.expected = ordinal - 1;
        self.len += 1;
    }

    /// Returns the collected name if the run is complete and belongs to the
    /// 8.3 name with `checksum`. Resets the builder either way.
    pub fn finish(&mut self, checksum: u8) -> Option<String> {
        let complete = self.len > 0 && self.expected == 0 && self.checksum == checksum;
        let name = if complete {
            let units: Vec<u16> = self
                .slots
                .iter()
                .flatten()
                .copied()
                .take_while(|&unit| unit != 0x0000 && unit != 0xFFFF)
                .collect();
            Some(
                char::decode_utf16(units)
                    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            )
        } else {
            None
        };
        self.reset();
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn rebuild(entries: &[LfnEntry], checksum: u8) -> Option<String> {
        let mut builder = LongNameBuilder::new();
        for entry in entries {
            builder.push(entry);
        }
        builder.finish(checksum)
    }

    #[test]
    fn checksum_matches_known_values() {
        assert_eq!(lfn_checksum(b"LONGFI~1TXT"), 0xD4);
        assert_eq!(lfn_checksum(b"HELLO   TXT"), 0xF1);
    }

    #[test]
    fn generation_orders_and_pads_slots() {
        let entries = long_name_entries("LONG FILE NAME.TXT", 0x42).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].sequence, 0x42);
        assert_eq!(entries[1].sequence, 0x01);
        for entry in &entries {
            let (attr, checksum, first_cluster) =
                (entry.attr, entry.checksum, entry.first_cluster);
            assert_eq!(attr, 0x0F);
            assert_eq!(checksum, 0x42);
            assert_eq!(first_cluster, 0);
        }

        // 18 units: slot 2 holds 5 characters, a terminator and 7 pads.
        let tail = entries[0].units();
        assert_eq!(tail[4], u16::from(b'T'));
        assert_eq!(tail[5], 0x0000);
        assert!(tail[6..].iter().all(|&unit| unit == 0xFFFF));
    }

    #[test]
    fn exact_multiple_of_13_has_no_terminator() {
        let entries = long_name_entries("ABCDEFGHIJKLM", 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].units().iter().all(|&unit| unit != 0 && unit != 0xFFFF));
        assert_eq!(rebuild(&entries, 1).as_deref(), Some("ABCDEFGHIJKLM"));
    }

    #[test]
    fn checksum_mismatch_drops_name() {
        let entries = long_name_entries("some long name", 7).unwrap();
        assert_eq!(rebuild(&entries, 8), None);
    }

    #[test]
    fn out_of_order_run_is_discarded() {
        let mut entries = long_name_entries("a name that spans three slots!!", 3).unwrap();
        entries.swap(1, 2);
        assert_eq!(rebuild(&entries, 3), None);
    }

    #[test]
    fn orphaned_tail_is_discarded() {
        let entries = long_name_entries("a name spanning two slots", 9).unwrap();
        assert_eq!(rebuild(&entries[1..], 9), None);
    }

    #[test]
    fn rejects_invalid_names() {
        assert_eq!(validate_long_name(""), Err(NameError::Empty));
        assert_eq!(validate_long_name(".."), Err(NameError::Empty));
        assert_eq!(validate_long_name("a*b"), Err(NameError::InvalidCharacter('*')));
        assert_eq!(validate_long_name(&"x".repeat(256)), Err(NameError::TooLong));
        assert!(validate_long_name(&"x".repeat(255)).is_ok());
    }

    proptest! {
        #[test]
        fn long_name_round_trip(name in "[ !#-)+-.0-9;=@-\\[\\]-{}~]{1,255}", checksum: u8) {
            prop_assume!(name != "." && name != "..");
            let entries = long_name_entries(&name, checksum).unwrap();
            prop_assert_eq!(entries.len(), name.len().div_ceil(13));
            prop_assert_eq!(rebuild(&entries, checksum), Some(name));
        }
    }
}
