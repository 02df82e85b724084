//! Drawing primitives over the pair-encoded framebuffer.
//!
//! The screen-space functions are what the window manager paints
//! decorations and overlays with. The `client_*` variants run inside a
//! paint callback: coordinates are client-relative and output is
//! clipped to the window's client rectangle.

use rookos_abi::Rect;
use rookos_video as video;

use crate::draw;
use crate::font::{FONT_CHAR_HEIGHT, FONT_CHAR_WIDTH, glyph_for};

pub fn fill_rect(x: i32, y: i32, w: i32, h: i32, color: u8) {
    for row in y..y + h.max(0) {
        video::hline_safe(x, row, w, color);
    }
}

/// Rectangle outline, one pixel wide.
pub fn rect(x: i32, y: i32, w: i32, h: i32, color: u8) {
    if w <= 0 || h <= 0 {
        return;
    }
    video::hline_safe(x, y, w, color);
    video::hline_safe(x, y + h - 1, w, color);
    video::vline_safe(x, y, h, color);
    video::vline_safe(x + w - 1, y, h, color);
}

/// Raised/sunken bevel edges: light on top/left, dark on bottom/right.
pub fn bevel_rect(x: i32, y: i32, w: i32, h: i32, light: u8, dark: u8) {
    video::hline_safe(x, y, w, light);
    video::vline_safe(x, y, h, light);
    video::hline_safe(x, y + h - 1, w, dark);
    video::vline_safe(x + w - 1, y, h, dark);
}

fn draw_char_clipped(x: i32, y: i32, ch: u8, fg: u8, bg: u8, clip: &Rect) {
    let glyph = glyph_for(ch);
    let cell = Rect::new(x, y, FONT_CHAR_WIDTH, FONT_CHAR_HEIGHT);
    let visible = cell.intersect(clip);
    if visible.is_empty() {
        return;
    }

    // Fast path: even x and fully visible -> whole-byte blit.
    if x & 1 == 0 && visible == cell {
        video::blit_glyph_8wide(x, y, glyph, fg, bg);
        return;
    }
    for (r, &bits) in glyph.iter().enumerate() {
        let py = y + r as i32;
        for c in 0..FONT_CHAR_WIDTH {
            let px = x + c;
            if !visible.contains(px, py) {
                continue;
            }
            let color = if bits & (1 << c) != 0 { fg } else { bg };
            video::set_pixel(px, py, color);
        }
    }
}

/// Unclipped text at a screen position.
pub fn text(x: i32, y: i32, s: &str, fg: u8, bg: u8) {
    let clip = Rect::new(0, 0, video::DISPLAY_WIDTH, video::DISPLAY_HEIGHT);
    text_clipped(x, y, s, fg, bg, &clip);
}

/// Text clipped to an arbitrary screen rectangle (title bars, menu
/// rows).
pub fn text_clipped(x: i32, y: i32, s: &str, fg: u8, bg: u8, clip: &Rect) {
    let mut cx = x;
    for &ch in s.as_bytes() {
        if ch == 0 {
            break;
        }
        if cx >= clip.right() {
            break;
        }
        draw_char_clipped(cx, y, ch, fg, bg, clip);
        cx += FONT_CHAR_WIDTH;
    }
}

pub fn text_width(s: &str) -> i32 {
    s.len() as i32 * FONT_CHAR_WIDTH
}

// ---------------------------------------------------------------------------
// Client-relative primitives (valid inside a paint callback)
// ---------------------------------------------------------------------------

pub fn client_set_pixel(x: i32, y: i32, color: u8) {
    let Some(ctx) = draw::current() else {
        return;
    };
    let px = ctx.origin.x + x;
    let py = ctx.origin.y + y;
    if ctx.clip.contains(px, py) {
        video::set_pixel(px, py, color);
    }
}

pub fn client_fill_rect(x: i32, y: i32, w: i32, h: i32, color: u8) {
    let Some(ctx) = draw::current() else {
        return;
    };
    let target = Rect::new(ctx.origin.x + x, ctx.origin.y + y, w, h).intersect(&ctx.clip);
    fill_rect(target.x, target.y, target.w, target.h, color);
}

pub fn client_text(x: i32, y: i32, s: &str, fg: u8, bg: u8) {
    let Some(ctx) = draw::current() else {
        return;
    };
    text_clipped(ctx.origin.x + x, ctx.origin.y + y, s, fg, bg, &ctx.clip);
}

pub fn client_hline(x: i32, y: i32, w: i32, color: u8) {
    let Some(ctx) = draw::current() else {
        return;
    };
    let target = Rect::new(ctx.origin.x + x, ctx.origin.y + y, w, 1).intersect(&ctx.clip);
    video::hline_safe(target.x, target.y, target.w, color);
}
