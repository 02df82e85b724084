//! Start menu overlay.

use rookos_abi::event::scancode;
use rookos_abi::geom::Rect;
use rookos_lib::{StateCell, services};
use rookos_gfx as gfx;
use rookos_video as video;

use crate::event::MouseInput;
use crate::taskbar;
use crate::terminal;
use crate::theme;

const MENU_W: i32 = 150;
const ITEM_H: i32 = 20;
const PAD: i32 = 4;

#[derive(Copy, Clone)]
enum Action {
    NewTerminal,
    Reboot,
}

const ITEMS: [(&str, Action); 2] = [
    ("New Terminal", Action::NewTerminal),
    ("Reboot", Action::Reboot),
];

struct StartMenuState {
    open: bool,
    selected: usize,
}

static STATE: StateCell<StartMenuState> = StateCell::new(StartMenuState {
    open: false,
    selected: 0,
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

pub fn toggle() {
    if is_open() { close() } else { open() }
}

pub fn menu_rect() -> Rect {
    let bar = taskbar::bar_rect();
    let h = ITEMS.len() as i32 * ITEM_H + 2 * PAD;
    Rect::new(PAD, bar.y - h, MENU_W, h)
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

fn run(action: Action) {
    match action {
        Action::NewTerminal => terminal::spawn_terminal_window(),
        Action::Reboot => services::board_reboot(),
    }
}

/// Mouse traffic while the menu is open. Consumed events return true;
/// a button-down outside falls back to the caller, which closes every
/// menu.
pub fn mouse(kind: MouseInput, x: i32, y: i32) -> bool {
    match kind {
        MouseInput::Move => {
            if let Some(idx) = item_at(x, y) {
                STATE.with_mut(|s| s.selected = idx);
                video::mark_dirty();
                return true;
            }
            false
        }
        MouseInput::LeftDown => match item_at(x, y) {
            Some(idx) => {
                close();
                run(ITEMS[idx].1);
                true
            }
            None => false,
        },
        _ => menu_rect().contains(x, y),
    }
}

/// Keys while open: Esc closes, arrows move, Enter runs.
pub fn key(sc: u8) -> bool {
    match sc {
        scancode::KEY_ESC => {
            close();
            true
        }
        scancode::KEY_UP => {
            STATE.with_mut(|s| s.selected = s.selected.saturating_sub(1));
            video::mark_dirty();
            true
        }
        scancode::KEY_DOWN => {
            STATE.with_mut(|s| s.selected = (s.selected + 1).min(ITEMS.len() - 1));
            video::mark_dirty();
            true
        }
        scancode::KEY_ENTER => {
            let idx = STATE.with(|s| s.selected);
            close();
            run(ITEMS[idx].1);
            true
        }
        _ => true, // swallow everything else while open
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
    for (i, (label, _)) in ITEMS.iter().enumerate() {
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
