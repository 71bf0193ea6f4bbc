//! File system drivers.

pub mod fat;

use core::fmt::Debug;

/// Wall clock used for directory entry timestamps.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> ::fat::CalendarTime;
}
