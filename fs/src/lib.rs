#![no_std]

extern crate alloc;

pub const MAX_PATH_LEN: usize = 256;
pub const SYMLOOP_MAX: usize = 10;

pub mod extfs;
pub mod fat;
pub mod fileio;
pub mod path;
pub mod ramfat;

pub mod tests;

pub use fat::{FatError, FatResult, FatVolume, fat_to_errno};
pub use fileio::{DirTable, FdTable};
pub use ramfat::RamFat;
