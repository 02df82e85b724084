//! Glyph source.
//!
//! The font bitmap itself ships with the board support package; it is
//! registered at boot. Glyph rows are one byte per scanline, bit 0
//! being the leftmost pixel, matching the fast blitter's lookup table.

use rookos_lib::StateCell;

pub const FONT_CHAR_WIDTH: i32 = 8;
pub const FONT_CHAR_HEIGHT: i32 = 16;

pub type Glyph = [u8; FONT_CHAR_HEIGHT as usize];

const BLANK: Glyph = [0; FONT_CHAR_HEIGHT as usize];

/// Fallback box glyph so text stays visible before the font registers.
const FALLBACK: Glyph = [
    0x00, 0x7E, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x7E, 0x00,
    0x00,
];

static FONT: StateCell<Option<&'static [Glyph; 256]>> = StateCell::new(None);

pub fn register_font(font: &'static [Glyph; 256]) {
    FONT.with_mut(|f| *f = Some(font));
}

pub fn glyph_for(ch: u8) -> &'static Glyph {
    match FONT.with(|f| *f) {
        Some(font) => &font[ch as usize],
        None => {
            if ch == b' ' || ch == 0 {
                &BLANK
            } else {
                &FALLBACK
            }
        }
    }
}
