#![no_std]

extern crate alloc;

pub mod context;
pub mod elf;
pub mod posix;
pub mod process;
pub mod syscall;

pub mod tests;

pub use context::{Context, Stage, current_ctx, set_current_ctx, with_ctx};
pub use elf::{ElfLoadError, LoadedImage};
pub use process::{FileAction, SpawnAttr};
