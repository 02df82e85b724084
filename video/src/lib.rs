#![no_std]

pub mod framebuffer;
pub mod palette;

pub mod tests;

pub use framebuffer::{
    DISPLAY_HEIGHT, DISPLAY_WIDTH, FB_HEIGHT, FB_STRIDE, blit_glyph_8wide, clear, hline_fast,
    hline_safe, mark_dirty, needs_composite, scanline_fill, set_pixel, swap_buffers, vline_safe,
};
