//! rookOS shared ABI types.
//!
//! Everything that crosses a subsystem boundary — window handles, event
//! records, errno values, file flags, ELF structures, syscall slots —
//! lives here so the other crates agree on layout without depending on
//! each other.

#![no_std]

pub mod color;
pub mod elf;
pub mod errno;
pub mod event;
pub mod fs;
pub mod geom;
pub mod signal;
pub mod syscall;
pub mod task;
pub mod window;

pub use color::*;
pub use event::{KeyMods, MouseButtons, WindowEvent};
pub use geom::{Point, Rect};
pub use window::{HWND_NULL, HitZone, Hwnd, WM_MAX_WINDOWS, WindowFlags, WindowState};
