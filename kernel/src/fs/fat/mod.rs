//! FAT12/16/32 driver on top of the buffer cache. The on-disk formats live in
//! the `fat` crate; this module does the I/O, cluster allocation and
//! directory updates.
//!
//! # Resources
//!
//! - <https://wiki.osdev.org/FAT>
//! - <https://en.wikipedia.org/wiki/Design_of_the_FAT_file_system>

mod file;
mod file_system;
mod vfs;


pub use file::*;
pub use file_system::*;
pub use vfs::*;
