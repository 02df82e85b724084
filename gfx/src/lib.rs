#![no_std]

pub mod draw;
pub mod font;
pub mod primitives;

pub mod tests;

pub use draw::{wd_begin, wd_end};
pub use font::{FONT_CHAR_HEIGHT, FONT_CHAR_WIDTH, glyph_for, register_font};
pub use primitives::*;
