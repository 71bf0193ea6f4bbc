mod init_cell;
mod spin_lock;

pub use init_cell::*;
pub use spin_lock::*;
