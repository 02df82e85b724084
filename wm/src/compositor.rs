//! Frame assembly.
//!
//! Runs as a dedicated task: drain the event queue, then, when the
//! dirty flag is set, repaint the whole scene back-to-front and swap.
//! Clean frames do no work at all, which keeps SRAM bus pressure away
//! from the scanline DMA.

use rookos_abi::event::WindowEvent;
use rookos_abi::geom::Rect;
use rookos_abi::window::{Hwnd, WM_MAX_WINDOWS, WindowFlags, WindowState};
use rookos_gfx as gfx;
use rookos_lib::services;
use rookos_lib::services::task;
use rookos_video as video;

use crate::theme;
use crate::window::{self, Window};
use crate::{event, menu, startmenu, sysmenu, taskbar};

const BLINK_PERIOD_MS: u64 = 500;

fn draw_close_glyph(btn: &Rect) {
    let cx = btn.x + btn.w / 2;
    let cy = btn.y + btn.h / 2;
    for d in -3..=3 {
        video::set_pixel(cx + d, cy + d, rookos_abi::color::COLOR_BLACK);
        video::set_pixel(cx + d, cy - d, rookos_abi::color::COLOR_BLACK);
    }
}

fn draw_maximize_glyph(btn: &Rect) {
    let black = rookos_abi::color::COLOR_BLACK;
    gfx::rect(btn.x + 3, btn.y + 3, btn.w - 6, btn.h - 6, black);
    video::hline_safe(btn.x + 3, btn.y + 4, btn.w - 6, black); // thick top edge
}

fn draw_restore_glyph(btn: &Rect) {
    let black = rookos_abi::color::COLOR_BLACK;
    let bx = btn.x + 3;
    let by = btn.y + 2;
    let bw = btn.w - 7;
    let bh = btn.h - 5;
    // Back rectangle, then the front one overlapping it.
    gfx::rect(bx + 2, by, bw, bh, black);
    video::hline_safe(bx + 2, by + 1, bw, black);
    gfx::fill_rect(bx, by + 2, bw, bh, theme::BUTTON_FACE);
    gfx::rect(bx, by + 2, bw, bh, black);
    video::hline_safe(bx, by + 3, bw, black);
}

fn draw_minimize_glyph(btn: &Rect) {
    video::hline_safe(
        btn.x + 3,
        btn.y + btn.h - 5,
        btn.w - 6,
        rookos_abi::color::COLOR_BLACK,
    );
}

fn draw_button(r: &Rect, pressed: bool) {
    gfx::fill_rect(r.x, r.y, r.w, r.h, theme::BUTTON_FACE);
    if pressed {
        gfx::bevel_rect(r.x, r.y, r.w, r.h, theme::BEVEL_DARK, theme::BEVEL_LIGHT);
    } else {
        gfx::bevel_rect(r.x, r.y, r.w, r.h, theme::BEVEL_LIGHT, theme::BEVEL_DARK);
    }
}

fn draw_decorations(hwnd: Hwnd, win: &Window) {
    let f = win.frame;
    if !win.flags.contains(WindowFlags::BORDER) {
        gfx::fill_rect(f.x, f.y, f.w, f.h, win.bg_color);
        return;
    }
    let focused = win.flags.contains(WindowFlags::FOCUSED);
    let border = if focused { theme::ACTIVE_BORDER } else { theme::INACTIVE_BORDER };
    let title_bg = if focused { theme::ACTIVE_TITLE_BG } else { theme::INACTIVE_TITLE_BG };
    let title_fg = if focused { theme::ACTIVE_TITLE_FG } else { theme::INACTIVE_TITLE_FG };

    let bw = theme::BORDER_WIDTH;
    gfx::fill_rect(f.x, f.y, f.w, bw, border);
    gfx::fill_rect(f.x, f.bottom() - bw, f.w, bw, border);
    gfx::fill_rect(f.x, f.y, bw, f.h, border);
    gfx::fill_rect(f.right() - bw, f.y, bw, f.h, border);

    // Title bar and its text, clipped short of the buttons.
    let tb = Rect::new(f.x + bw, f.y + bw, f.w - 2 * bw, theme::TITLE_HEIGHT);
    gfx::fill_rect(tb.x, tb.y, tb.w, tb.h, title_bg);
    let mut text_w = tb.w - 8;
    if win.flags.contains(WindowFlags::CLOSABLE) {
        text_w -= theme::BUTTON_SIZE + theme::BUTTON_PAD;
    }
    if win.flags.contains(WindowFlags::RESIZABLE) {
        text_w -= 2 * (theme::BUTTON_SIZE + theme::BUTTON_PAD);
    }
    if text_w > 0 {
        let clip = Rect::new(tb.x + 4, tb.y, text_w, tb.h);
        gfx::text_clipped(
            tb.x + 4,
            tb.y + (tb.h - 16) / 2,
            win.title_str(),
            title_fg,
            title_bg,
            &clip,
        );
    }

    if win.flags.contains(WindowFlags::CLOSABLE) {
        let btn = theme::close_btn_rect(&f);
        draw_button(&btn, false);
        draw_close_glyph(&btn);
    }
    if win.flags.contains(WindowFlags::RESIZABLE) {
        let max = theme::max_btn_rect(&f);
        draw_button(&max, false);
        if win.state == WindowState::Maximized {
            draw_restore_glyph(&max);
        } else {
            draw_maximize_glyph(&max);
        }
        let min = theme::min_btn_rect(&f);
        draw_button(&min, false);
        draw_minimize_glyph(&min);
    }

    if win.flags.contains(WindowFlags::MENUBAR) {
        menu::paint_bar(hwnd);
    }

    let client = theme::client_rect(&f, win.flags);
    gfx::fill_rect(client.x, client.y, client.w, client.h, win.bg_color);
}

/// Arrow cursor bitmap: bit 0 of each row is the leftmost pixel.
const CURSOR_ROWS: [(u8, u8); 10] = [
    (0b0000_0001, 0b0000_0001),
    (0b0000_0011, 0b0000_0011),
    (0b0000_0111, 0b0000_0101),
    (0b0000_1111, 0b0000_1001),
    (0b0001_1111, 0b0001_0001),
    (0b0011_1111, 0b0010_0001),
    (0b0111_1111, 0b0111_1111),
    (0b0000_1100, 0b0000_1100),
    (0b0001_1000, 0b0001_1000),
    (0b0001_1000, 0b0001_1000),
];

fn draw_cursor(x: i32, y: i32) {
    for (row, &(fill, outline)) in CURSOR_ROWS.iter().enumerate() {
        for bit in 0..8 {
            let px = x + bit;
            let py = y + row as i32;
            if outline & (1 << bit) != 0 {
                video::set_pixel(px, py, rookos_abi::color::COLOR_BLACK);
            } else if fill & (1 << bit) != 0 {
                video::set_pixel(px, py, rookos_abi::color::COLOR_WHITE);
            }
        }
    }
}

/// Paint one full frame: desktop, windows bottom-to-top, the overlay
/// stack in fixed order, then swap.
pub fn composite() {
    video::clear(theme::DESKTOP_COLOR);

    let (z_stack, z_count) = window::z_snapshot();
    for &hwnd in z_stack.iter().take(z_count) {
        let Some(win) = window::window_snapshot(hwnd) else {
            continue;
        };
        if !win.flags.contains(WindowFlags::VISIBLE) {
            continue;
        }
        draw_decorations(hwnd, &win);
        if let Some(paint) = win.paint_handler {
            let clip = theme::client_rect(&win.frame, win.flags);
            gfx::wd_begin(rookos_abi::geom::Point::new(clip.x, clip.y), clip);
            paint(hwnd);
            gfx::wd_end();
        }
        window::clear_window_dirty(hwnd);
    }

    // Overlays above every window, below the cursor.
    menu::paint_dropdown();
    menu::paint_popup();
    sysmenu::paint();
    startmenu::paint();
    taskbar::paint();

    if let Some(outline) = event::drag_outline() {
        gfx::rect(outline.x, outline.y, outline.w, outline.h, rookos_abi::color::COLOR_BLACK);
        gfx::rect(
            outline.x + 1,
            outline.y + 1,
            outline.w - 2,
            outline.h - 2,
            rookos_abi::color::COLOR_WHITE,
        );
    }

    let cursor = event::cursor_pos();
    draw_cursor(cursor.x, cursor.y);

    video::swap_buffers();
}

/// Compositor task body: dispatch, blink, composite when dirty, yield
/// a tick when clean.
pub fn compositor_task(_arg: usize) {
    let mut last_blink = services::clock_ms();
    loop {
        event::dispatch_all();

        let now = services::clock_ms();
        if now.saturating_sub(last_blink) >= BLINK_PERIOD_MS {
            last_blink = now;
            for hwnd in 1..=WM_MAX_WINDOWS as Hwnd {
                if window::window_snapshot(hwnd).is_some() {
                    event::post(hwnd, WindowEvent::Timer { id: 1 });
                }
            }
        }

        if video::needs_composite() {
            composite();
        } else {
            task::sleep_ms(1);
        }
    }
}
