use core::fmt;

use crate::lfn_checksum;

/// Largest `~N` numeric tail we try before giving up on a name.
pub const MAX_NUMERIC_TAIL: u32 = 999_999;

/// The raw 11-byte 8.3 name: 8 bytes of base name and 3 of extension, both
/// space padded, no dot.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShortName(pub [u8; 11]);

fn is_short_name_char(byte: u8) -> bool {
    byte.is_ascii_uppercase()
        || byte.is_ascii_digit()
        || b"!#$%&'()-@^_`{}~".contains(&byte)
        || byte >= 0x80
}

impl ShortName {
    /// Parses a name that is already a valid upper-case 8.3 name, like
    /// `HELLO.TXT`. Anything else (lower case, too long, odd characters)
    /// needs a long-name run and returns `None`.
    pub fn parse_exact(name: &str) -> Option<Self> {
        let (base, extension) = match name.split_once('.') {
            Some((base, extension)) => (base, extension),
            None => (name, ""),
        };
        let valid = |part: &str, max: usize| {
            part.len() <= max && part.bytes().all(is_short_name_char) && part.is_ascii()
        };
        if base.is_empty() || !valid(base, 8) || !valid(extension, 3) {
            return None;
        }
        if name.ends_with('.') {
            return None;
        }

        let mut raw = [b' '; 11];
        raw[..base.len()].copy_from_slice(base.as_bytes());
        raw[8..8 + extension.len()].copy_from_slice(extension.as_bytes());
        Some(Self(raw))
    }

    /// Derives the basis 8.3 name for a long name: upper case, spaces and
    /// embedded dots dropped, the last dot separates the extension, anything
    /// that is not a legal 8.3 character becomes `_`.
    ///
    /// The flag is true when information was lost on the way (truncation or
    /// replaced characters), in which case the caller should use a numeric
    /// tail straight away.
    pub fn from_long_name(name: &str) -> (Self, bool) {
        let trimmed = name.trim_start_matches('.');
        let mut lossy = trimmed.len() != name.len();

        let (base, extension) = match trimmed.rfind('.') {
            Some(dot) => (&trimmed[..dot], &trimmed[dot + 1..]),
            None => (trimmed, ""),
        };

        let mut raw = [b' '; 11];
        let mut fill = |part: &str, range: core::ops::Range<usize>| {
            let mut index = range.start;
            for c in part.chars() {
                if c == ' ' || c == '.' {
                    lossy = true;
                    continue;
                }
                if index == range.end {
                    lossy = true;
                    break;
                }
                let upper = c.to_ascii_uppercase();
                raw[index] = if upper.is_ascii() && is_short_name_char(upper as u8) {
                    upper as u8
                } else {
                    lossy = true;
                    b'_'
                };
                index += 1;
            }
        };
        fill(base, 0..8);
        fill(extension, 8..11);

        if raw[0] == b' ' {
            raw[0] = b'_';
            lossy = true;
        }
        if raw[0] == crate::DELETED_MARKER {
            raw[0] = crate::KANJI_MARKER;
        }
        (Self(raw), lossy)
    }

    /// Replaces the end of the base name with `~n`, keeping the extension.
    /// Returns `None` for `n == 0` or `n > MAX_NUMERIC_TAIL`.
    pub fn with_numeric_tail(&self, n: u32) -> Option<Self> {
        if n == 0 || n > MAX_NUMERIC_TAIL {
            return None;
        }
        let mut digits = [0_u8; 7];
        let mut len = 0;
        let mut rest = n;
        while rest > 0 {
            digits[len] = b'0' + (rest % 10) as u8;
            rest /= 10;
            len += 1;
        }
        let tail_len = len + 1;

        let base_len = self.0[..8].iter().position(|&b| b == b' ').unwrap_or(8);
        let keep = base_len.min(8 - tail_len).max(1);

        let mut raw = [b' '; 11];
        raw[..keep].copy_from_slice(&self.0[..keep]);
        raw[keep] = b'~';
        let tail = raw[keep + 1..keep + tail_len].iter_mut();
        for (slot, &digit) in tail.zip(digits[..len].iter().rev()) {
            *slot = digit;
        }
        raw[8..].copy_from_slice(&self.0[8..]);
        Some(Self(raw))
    }

    pub fn checksum(&self) -> u8 {
        lfn_checksum(&self.0)
    }

    /// Case-insensitive comparison against a path component like `readme.txt`.
    pub fn matches(&self, component: &str) -> bool {
        let mut buffer = [0_u8; 12];
        let len = self.write_display(&mut buffer);
        component.as_bytes().eq_ignore_ascii_case(&buffer[..len])
    }

    /// Writes the `NAME.EXT` form into `out`, returning its length.
    fn write_display(&self, out: &mut [u8; 12]) -> usize {
        let base = trim_padding(&self.0[..8]);
        let extension = trim_padding(&self.0[8..]);
        let mut len = base.len();
        out[..len].copy_from_slice(base);
        if !extension.is_empty() {
            out[len] = b'.';
            out[len + 1..len + 1 + extension.len()].copy_from_slice(extension);
            len += 1 + extension.len();
        }
        len
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &bytes[..end]
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = [0_u8; 12];
        let len = self.write_display(&mut buffer);
        for &byte in &buffer[..len] {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName(\"{self}\")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_exact_accepts_canonical_names() {
        assert_eq!(ShortName::parse_exact("HELLO.TXT"), Some(ShortName(*b"HELLO   TXT")));
        assert_eq!(ShortName::parse_exact("KERNEL"), Some(ShortName(*b"KERNEL     ")));
        assert_eq!(ShortName::parse_exact("A~1.C"), Some(ShortName(*b"A~1     C  ")));
    }

    #[test]
    fn parse_exact_rejects_names_needing_lfn() {
        let names = [
            "hello.txt",
            "LONGFILENAME.TXT",
            "A.B.C",
            "A.TEXT",
            ".HIDDEN",
            "",
            "TRAIL.",
            "MY FILE",
        ];
        for name in names {
            assert_eq!(ShortName::parse_exact(name), None, "{name}");
        }
    }

    #[test]
    fn basis_name_from_long_name() {
        assert_eq!(
            ShortName::from_long_name("LONG FILE NAME.TXT"),
            (ShortName(*b"LONGFILETXT"), true)
        );
        assert_eq!(ShortName::from_long_name("hello.txt"), (ShortName(*b"HELLO   TXT"), false));
        assert_eq!(
            ShortName::from_long_name("archive.tar.gz"),
            (ShortName(*b"ARCHIVETGZ "), true)
        );
        assert_eq!(ShortName::from_long_name("a+b.c"), (ShortName(*b"A_B     C  "), true));
        assert_eq!(ShortName::from_long_name(".profile"), (ShortName(*b"PROFILE    "), true));
    }

    #[test]
    fn numeric_tail_shortens_base() {
        let basis = ShortName(*b"LONGFILETXT");
        assert_eq!(basis.with_numeric_tail(1), Some(ShortName(*b"LONGFI~1TXT")));
        assert_eq!(basis.with_numeric_tail(42), Some(ShortName(*b"LONGF~42TXT")));
        assert_eq!(basis.with_numeric_tail(999_999), Some(ShortName(*b"L~999999TXT")));
        assert_eq!(basis.with_numeric_tail(1_000_000), None);
        assert_eq!(basis.with_numeric_tail(0), None);

        let short = ShortName(*b"AB      C  ");
        assert_eq!(short.with_numeric_tail(3), Some(ShortName(*b"AB~3    C  ")));
    }

    #[test]
    fn display_and_match() {
        let name = ShortName(*b"README  MD ");
        assert_eq!(name.to_string(), "README.MD");
        assert!(name.matches("readme.md"));
        assert!(!name.matches("readme"));
        assert_eq!(ShortName(*b"NOEXT      ").to_string(), "NOEXT");
    }
}
