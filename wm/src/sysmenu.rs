//! System menu overlay (top-right corner chord) with the About dialog.

use rookos_abi::event::{WindowEvent, scancode};
use rookos_abi::geom::Rect;
use rookos_abi::window::{HWND_NULL, Hwnd, WindowFlags};
use rookos_gfx as gfx;
use rookos_lib::{StateCell, services};
use rookos_video as video;

use crate::event::MouseInput;
use crate::theme;
use crate::window;

const MENU_W: i32 = 120;
const ITEM_H: i32 = 20;
const PAD: i32 = 4;

const ITEMS: [&str; 2] = ["About", "Reboot"];

struct SysMenuState {
    open: bool,
    selected: usize,
    about_hwnd: Hwnd,
}

static STATE: StateCell<SysMenuState> = StateCell::new(SysMenuState {
    open: false,
    selected: 0,
    about_hwnd: HWND_NULL,
});

pub fn is_open() -> bool {
    STATE.with(|s| s.open)
}

pub fn open() {
    STATE.with_mut(|s| {
        s.open = true;
        s.selected = 0;
    });
    video::mark_dirty();
}

pub fn close() {
    STATE.with_mut(|s| s.open = false);
    video::mark_dirty();
}

fn menu_rect() -> Rect {
    Rect::new(
        video::DISPLAY_WIDTH - MENU_W - PAD,
        PAD,
        MENU_W,
        ITEMS.len() as i32 * ITEM_H + 2 * PAD,
    )
}

fn item_at(x: i32, y: i32) -> Option<usize> {
    let r = menu_rect();
    if !r.contains(x, y) {
        return None;
    }
    let idx = (y - r.y - PAD) / ITEM_H;
    if (0..ITEMS.len() as i32).contains(&idx) {
        Some(idx as usize)
    } else {
        None
    }
}

fn about_event(hwnd: Hwnd, event: &WindowEvent) -> bool {
    match event {
        WindowEvent::Close
        | WindowEvent::KeyDown { scancode: scancode::KEY_ESC, .. }
        | WindowEvent::KeyDown { scancode: scancode::KEY_ENTER, .. } => {
            window::clear_modal();
            window::destroy_window(hwnd);
            STATE.with_mut(|s| s.about_hwnd = HWND_NULL);
            true
        }
        _ => false,
    }
}

fn about_paint(_hwnd: Hwnd) {
    gfx::client_fill_rect(0, 0, 240, 72, theme::MENU_BG);
    gfx::client_text(12, 10, "rookOS", theme::MENU_FG, theme::MENU_BG);
    gfx::client_text(12, 30, "a small windowing OS", theme::MENU_FG, theme::MENU_BG);
    gfx::client_text(12, 50, "press Esc to close", theme::MENU_FG, theme::MENU_BG);
}

/// Open the About box as a modal dialog; a second request refocuses
/// the live one.
fn open_about() {
    let existing = STATE.with(|s| s.about_hwnd);
    if existing != HWND_NULL && window::window_snapshot(existing).is_some() {
        window::set_focus(existing);
        return;
    }
    let hwnd = window::create_window(
        video::DISPLAY_WIDTH / 2 - 124,
        video::DISPLAY_HEIGHT / 2 - 60,
        248,
        104,
        "About",
        WindowFlags::STYLE_DIALOG,
        Some(about_event),
        Some(about_paint),
    );
    if hwnd != HWND_NULL {
        window::set_focus(hwnd);
        window::set_modal(hwnd);
        STATE.with_mut(|s| s.about_hwnd = hwnd);
    }
}

fn run(idx: usize) {
    match idx {
        0 => open_about(),
        _ => services::board_reboot(),
    }
}

pub fn mouse(kind: MouseInput, x: i32, y: i32) -> bool {
    match kind {
        MouseInput::Move => match item_at(x, y) {
            Some(idx) => {
                STATE.with_mut(|s| s.selected = idx);
                video::mark_dirty();
                true
            }
            None => false,
        },
        MouseInput::LeftDown => match item_at(x, y) {
            Some(idx) => {
                close();
                run(idx);
                true
            }
            None => false,
        },
        _ => menu_rect().contains(x, y),
    }
}

pub fn key(sc: u8) -> bool {
    match sc {
        scancode::KEY_ESC => {
            close();
            true
        }
        scancode::KEY_UP => {
            STATE.with_mut(|s| s.selected = s.selected.saturating_sub(1));
            true
        }
        scancode::KEY_DOWN => {
            STATE.with_mut(|s| s.selected = (s.selected + 1).min(ITEMS.len() - 1));
            true
        }
        scancode::KEY_ENTER => {
            let idx = STATE.with(|s| s.selected);
            close();
            run(idx);
            true
        }
        _ => true,
    }
}

pub fn paint() {
    if !is_open() {
        return;
    }
    let r = menu_rect();
    let selected = STATE.with(|s| s.selected);
    gfx::fill_rect(r.x, r.y, r.w, r.h, theme::MENU_BG);
    gfx::bevel_rect(r.x, r.y, r.w, r.h, theme::BEVEL_LIGHT, theme::BEVEL_DARK);
    for (i, label) in ITEMS.iter().enumerate() {
        let iy = r.y + PAD + i as i32 * ITEM_H;
        let (fg, bg) = if i == selected {
            (theme::MENU_HILITE_FG, theme::MENU_HILITE_BG)
        } else {
            (theme::MENU_FG, theme::MENU_BG)
        };
        gfx::fill_rect(r.x + PAD, iy, r.w - 2 * PAD, ITEM_H, bg);
        gfx::text(r.x + PAD + 4, iy + (ITEM_H - 16) / 2, label, fg, bg);
    }
}
