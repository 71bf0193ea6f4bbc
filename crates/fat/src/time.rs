use core::fmt;

/// Broken-down wall clock time, as handed to us by whatever clock the kernel
/// has.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CalendarTime {
    pub year: u16,
    /// 1..=12
    pub month: u8,
    /// 1..=31
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Packed DOS timestamp as stored in directory entries.
///
/// - date: bits 15-9 year since 1980, 8-5 month, 4-0 day
/// - time: bits 15-11 hour, 10-5 minute, 4-0 seconds / 2
/// - tenths: 10 ms units 0..=199 for the odd second (creation time only)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
    pub tenths: u8,
}

/// 1980-01-01 00:00:00, the earliest representable time.
pub const DOS_EPOCH: DosDateTime = DosDateTime {
    date: (1 << 5) | 1,
    time: 0,
    tenths: 0,
};

impl DosDateTime {
    /// Years outside 1980..=2107 are clamped to the representable range.
    pub fn from_calendar(t: CalendarTime) -> Self {
        if t.year < 1980 {
            return DOS_EPOCH;
        }
        let year = (t.year - 1980).min(127);
        let month = t.month.clamp(1, 12);
        let day = t.day.clamp(1, 31);
        let date = (year << 9) | (u16::from(month) << 5) | u16::from(day);
        let time = (u16::from(t.hour.min(23)) << 11)
            | (u16::from(t.minute.min(59)) << 5)
            | u16::from(t.second.min(59) / 2);
        let tenths = (t.second.min(59) % 2) * 100;
        Self { date, time, tenths }
    }

    pub fn to_calendar(self) -> CalendarTime {
        CalendarTime {
            year: 1980 + (self.date >> 9),
            month: ((self.date >> 5) & 0x0F) as u8,
            day: (self.date & 0x1F) as u8,
            hour: (self.time >> 11) as u8,
            minute: ((self.time >> 5) & 0x3F) as u8,
            second: ((self.time & 0x1F) * 2) as u8 + self.tenths / 100,
        }
    }
}

impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.to_calendar();
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            t.year, t.month, t.day, t.hour, t.minute, t.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> CalendarTime {
        CalendarTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    #[test]
    fn encodes_known_timestamp() {
        let stamp = DosDateTime::from_calendar(calendar(2024, 3, 15, 13, 45, 31));
        assert_eq!(stamp.date, (44 << 9) | (3 << 5) | 15);
        assert_eq!(stamp.time, (13 << 11) | (45 << 5) | 15);
        assert_eq!(stamp.tenths, 100);
        assert_eq!(stamp.to_calendar(), calendar(2024, 3, 15, 13, 45, 31));
        assert_eq!(stamp.to_string(), "2024-03-15 13:45:31");
    }

    #[test]
    fn clamps_out_of_range_years() {
        assert_eq!(DosDateTime::from_calendar(calendar(1970, 1, 1, 0, 0, 0)), DOS_EPOCH);
        let late = DosDateTime::from_calendar(calendar(2200, 12, 31, 23, 59, 58));
        assert_eq!(late.to_calendar().year, 2107);
    }
}
