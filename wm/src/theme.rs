//! Window chrome metrics, colors, and the hit-test decomposition.

use rookos_abi::color::*;
use rookos_abi::geom::{Point, Rect};
use rookos_abi::window::{HitZone, WindowFlags};

pub const BORDER_WIDTH: i32 = 4;
pub const TITLE_HEIGHT: i32 = 20;
pub const MENUBAR_HEIGHT: i32 = 16;
pub const BUTTON_SIZE: i32 = 16;
pub const BUTTON_PAD: i32 = 2;
/// Corner-grab reach along each border; larger than the border width so
/// diagonal resizes stay usable when the title bar is short.
pub const CORNER_GRAB: i32 = 12;
pub const MIN_W: i32 = 64;
pub const MIN_H: i32 = 48;

pub const DESKTOP_COLOR: u8 = COLOR_CYAN;
pub const ACTIVE_BORDER: u8 = COLOR_LIGHT_GRAY;
pub const INACTIVE_BORDER: u8 = COLOR_LIGHT_GRAY;
pub const ACTIVE_TITLE_BG: u8 = COLOR_BLUE;
pub const ACTIVE_TITLE_FG: u8 = COLOR_WHITE;
pub const INACTIVE_TITLE_BG: u8 = COLOR_DARK_GRAY;
pub const INACTIVE_TITLE_FG: u8 = COLOR_LIGHT_GRAY;
pub const BUTTON_FACE: u8 = COLOR_LIGHT_GRAY;
pub const BEVEL_LIGHT: u8 = COLOR_WHITE;
pub const BEVEL_DARK: u8 = COLOR_DARK_GRAY;
pub const MENU_BG: u8 = COLOR_LIGHT_GRAY;
pub const MENU_FG: u8 = COLOR_BLACK;
pub const MENU_HILITE_BG: u8 = COLOR_BLUE;
pub const MENU_HILITE_FG: u8 = COLOR_WHITE;

/// Screen coordinates of the client area's upper-left corner.
pub fn client_origin(frame: &Rect, flags: WindowFlags) -> Point {
    if !flags.contains(WindowFlags::BORDER) {
        return Point::new(frame.x, frame.y);
    }
    let mut y = frame.y + BORDER_WIDTH + TITLE_HEIGHT;
    if flags.contains(WindowFlags::MENUBAR) {
        y += MENUBAR_HEIGHT;
    }
    Point::new(frame.x + BORDER_WIDTH, y)
}

/// Client rectangle in screen coordinates.
pub fn client_rect(frame: &Rect, flags: WindowFlags) -> Rect {
    if !flags.contains(WindowFlags::BORDER) {
        return *frame;
    }
    let origin = client_origin(frame, flags);
    let w = frame.w - 2 * BORDER_WIDTH;
    let h = frame.bottom() - BORDER_WIDTH - origin.y;
    Rect::new(origin.x, origin.y, w.max(0), h.max(0))
}

pub fn close_btn_rect(frame: &Rect) -> Rect {
    Rect::new(
        frame.right() - BORDER_WIDTH - BUTTON_SIZE - BUTTON_PAD,
        frame.y + BORDER_WIDTH + (TITLE_HEIGHT - BUTTON_SIZE) / 2,
        BUTTON_SIZE,
        BUTTON_SIZE,
    )
}

pub fn max_btn_rect(frame: &Rect) -> Rect {
    close_btn_rect(frame).offset(-(BUTTON_SIZE + BUTTON_PAD), 0)
}

pub fn min_btn_rect(frame: &Rect) -> Rect {
    close_btn_rect(frame).offset(-2 * (BUTTON_SIZE + BUTTON_PAD), 0)
}

/// Decompose a screen point against a window frame.
///
/// Border points near a corner classify as that corner; this outranks
/// the title bar so a short title bar does not swallow the top corner
/// grips.
pub fn hit_test(frame: &Rect, flags: WindowFlags, x: i32, y: i32) -> HitZone {
    if !frame.contains(x, y) {
        return HitZone::Nowhere;
    }
    if !flags.contains(WindowFlags::BORDER) {
        return HitZone::Client;
    }

    let in_l = x < frame.x + BORDER_WIDTH;
    let in_r = x >= frame.right() - BORDER_WIDTH;
    let in_t = y < frame.y + BORDER_WIDTH;
    let in_b = y >= frame.bottom() - BORDER_WIDTH;

    if in_l || in_r || in_t || in_b {
        let near_l = x < frame.x + CORNER_GRAB;
        let near_r = x >= frame.right() - CORNER_GRAB;
        let near_t = y < frame.y + CORNER_GRAB;
        let near_b = y >= frame.bottom() - CORNER_GRAB;

        if near_t && near_l {
            return HitZone::BorderTL;
        }
        if near_t && near_r {
            return HitZone::BorderTR;
        }
        if near_b && near_l {
            return HitZone::BorderBL;
        }
        if near_b && near_r {
            return HitZone::BorderBR;
        }
        if in_t {
            return HitZone::BorderT;
        }
        if in_b {
            return HitZone::BorderB;
        }
        if in_l {
            return HitZone::BorderL;
        }
        return HitZone::BorderR;
    }

    if y < frame.y + BORDER_WIDTH + TITLE_HEIGHT {
        if flags.contains(WindowFlags::CLOSABLE) && close_btn_rect(frame).contains(x, y) {
            return HitZone::Close;
        }
        if flags.contains(WindowFlags::RESIZABLE) {
            if max_btn_rect(frame).contains(x, y) {
                return HitZone::Maximize;
            }
            if min_btn_rect(frame).contains(x, y) {
                return HitZone::Minimize;
            }
        }
        return HitZone::TitleBar;
    }

    if flags.contains(WindowFlags::MENUBAR)
        && y < frame.y + BORDER_WIDTH + TITLE_HEIGHT + MENUBAR_HEIGHT
    {
        return HitZone::MenuBar;
    }

    HitZone::Client
}
