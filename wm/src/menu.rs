//! Per-window dropdown menu bars and the popup context menu.
//!
//! A window created with the MENUBAR style registers its menus here;
//! selecting an item posts `WindowEvent::Command` with the item's id to
//! the owning window.

use rookos_abi::event::{WindowEvent, scancode};
use rookos_abi::geom::Rect;
use rookos_abi::window::{Hwnd, WM_MAX_WINDOWS};
use rookos_gfx as gfx;
use rookos_lib::StateCell;
use rookos_video as video;

use crate::event::{self, MouseInput};
use crate::theme;
use crate::window;

pub struct MenuItem {
    pub label: &'static str,
    pub command: u16,
}

pub struct Menu {
    pub title: &'static str,
    /// Alt+<accel> opens this menu while its window is focused.
    pub accel: u8,
    pub items: &'static [MenuItem],
}

const TITLE_PAD: i32 = 8;
const ITEM_H: i32 = 18;
const DROP_W: i32 = 160;

struct MenuState {
    bars: [Option<(Hwnd, &'static [Menu])>; WM_MAX_WINDOWS],
    /// Open dropdown: owner, menu index, selected item.
    open: Option<(Hwnd, usize, usize)>,
    /// Open popup: owner, origin, items, selected item.
    popup: Option<(Hwnd, i32, i32, &'static [MenuItem], usize)>,
}

static STATE: StateCell<MenuState> = StateCell::new(MenuState {
    bars: [None; WM_MAX_WINDOWS],
    open: None,
    popup: None,
});

pub fn set_menu_bar(hwnd: Hwnd, menus: &'static [Menu]) {
    STATE.with_mut(|s| {
        for slot in s.bars.iter_mut() {
            if let Some((h, _)) = slot {
                if *h == hwnd {
                    *slot = Some((hwnd, menus));
                    return;
                }
            }
        }
        if let Some(slot) = s.bars.iter_mut().find(|b| b.is_none()) {
            *slot = Some((hwnd, menus));
        }
    });
}

pub fn remove_menu_bar(hwnd: Hwnd) {
    STATE.with_mut(|s| {
        for slot in s.bars.iter_mut() {
            if matches!(slot, Some((h, _)) if *h == hwnd) {
                *slot = None;
            }
        }
        if matches!(s.open, Some((h, _, _)) if h == hwnd) {
            s.open = None;
        }
    });
}

fn bar_for(hwnd: Hwnd) -> Option<&'static [Menu]> {
    STATE.with(|s| {
        s.bars
            .iter()
            .flatten()
            .find(|(h, _)| *h == hwnd)
            .map(|(_, m)| *m)
    })
}

pub fn is_open() -> bool {
    STATE.with(|s| s.open.is_some())
}

pub fn close() {
    STATE.with_mut(|s| s.open = None);
    video::mark_dirty();
}

pub fn popup_is_open() -> bool {
    STATE.with(|s| s.popup.is_some())
}

pub fn popup_close() {
    STATE.with_mut(|s| s.popup = None);
    video::mark_dirty();
}

fn title_width(menu: &Menu) -> i32 {
    gfx::text_width(menu.title) + 2 * TITLE_PAD
}

/// Menu-bar strip of a window, in screen coordinates.
fn bar_rect(hwnd: Hwnd) -> Option<Rect> {
    let win = window::window_snapshot(hwnd)?;
    Some(Rect::new(
        win.frame.x + theme::BORDER_WIDTH,
        win.frame.y + theme::BORDER_WIDTH + theme::TITLE_HEIGHT,
        win.frame.w - 2 * theme::BORDER_WIDTH,
        theme::MENUBAR_HEIGHT,
    ))
}

fn dropdown_rect(hwnd: Hwnd, menu_idx: usize) -> Option<Rect> {
    let bar = bar_rect(hwnd)?;
    let menus = bar_for(hwnd)?;
    let mut x = bar.x;
    for menu in menus.iter().take(menu_idx) {
        x += title_width(menu);
    }
    let items = menus.get(menu_idx)?.items;
    Some(Rect::new(
        x,
        bar.bottom(),
        DROP_W,
        items.len() as i32 * ITEM_H + 4,
    ))
}

/// Click at `rel_x` pixels into a window's menu-bar strip: open (or
/// toggle) the menu under the cursor.
pub fn menu_bar_click(hwnd: Hwnd, rel_x: i32) {
    let Some(menus) = bar_for(hwnd) else { return };
    let mut x = 0;
    for (idx, menu) in menus.iter().enumerate() {
        let w = title_width(menu);
        if rel_x >= x && rel_x < x + w {
            STATE.with_mut(|s| {
                s.open = match s.open {
                    Some((h, open_idx, _)) if h == hwnd && open_idx == idx => None,
                    _ => Some((hwnd, idx, 0)),
                };
            });
            video::mark_dirty();
            return;
        }
        x += w;
    }
}

/// Alt+letter accelerator for the focused window's menu bar.
pub fn open_by_accelerator(hwnd: Hwnd, letter: u8) -> bool {
    let Some(menus) = bar_for(hwnd) else {
        return false;
    };
    for (idx, menu) in menus.iter().enumerate() {
        if menu.accel.eq_ignore_ascii_case(&letter) {
            STATE.with_mut(|s| s.open = Some((hwnd, idx, 0)));
            video::mark_dirty();
            return true;
        }
    }
    false
}

fn dropdown_item_at(x: i32, y: i32) -> Option<(Hwnd, usize, usize)> {
    let (hwnd, menu_idx, _) = STATE.with(|s| s.open)?;
    let rect = dropdown_rect(hwnd, menu_idx)?;
    if !rect.contains(x, y) {
        return None;
    }
    let item = (y - rect.y - 2) / ITEM_H;
    let items = bar_for(hwnd)?.get(menu_idx)?.items;
    if (0..items.len() as i32).contains(&item) {
        Some((hwnd, menu_idx, item as usize))
    } else {
        None
    }
}

pub fn dropdown_mouse(kind: MouseInput, x: i32, y: i32) -> bool {
    match kind {
        MouseInput::Move => match dropdown_item_at(x, y) {
            Some((hwnd, menu_idx, item)) => {
                STATE.with_mut(|s| s.open = Some((hwnd, menu_idx, item)));
                video::mark_dirty();
                true
            }
            None => false,
        },
        MouseInput::LeftDown => match dropdown_item_at(x, y) {
            Some((hwnd, menu_idx, item)) => {
                let command = bar_for(hwnd)
                    .and_then(|m| m.get(menu_idx))
                    .and_then(|m| m.items.get(item))
                    .map(|i| i.command);
                close();
                if let Some(command) = command {
                    event::post(hwnd, WindowEvent::Command { id: command });
                }
                true
            }
            None => false,
        },
        _ => false,
    }
}

pub fn key(sc: u8) -> bool {
    let Some((hwnd, menu_idx, selected)) = STATE.with(|s| s.open) else {
        return false;
    };
    let item_count = bar_for(hwnd)
        .and_then(|m| m.get(menu_idx))
        .map(|m| m.items.len())
        .unwrap_or(0);
    match sc {
        scancode::KEY_ESC => {
            close();
            true
        }
        scancode::KEY_UP => {
            STATE.with_mut(|s| s.open = Some((hwnd, menu_idx, selected.saturating_sub(1))));
            video::mark_dirty();
            true
        }
        scancode::KEY_DOWN => {
            let next = (selected + 1).min(item_count.saturating_sub(1));
            STATE.with_mut(|s| s.open = Some((hwnd, menu_idx, next)));
            video::mark_dirty();
            true
        }
        scancode::KEY_ENTER => {
            let command = bar_for(hwnd)
                .and_then(|m| m.get(menu_idx))
                .and_then(|m| m.items.get(selected))
                .map(|i| i.command);
            close();
            if let Some(command) = command {
                event::post(hwnd, WindowEvent::Command { id: command });
            }
            true
        }
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Popup context menu
// ---------------------------------------------------------------------------

pub fn open_popup(hwnd: Hwnd, x: i32, y: i32, items: &'static [MenuItem]) {
    STATE.with_mut(|s| s.popup = Some((hwnd, x, y, items, 0)));
    video::mark_dirty();
}

fn popup_rect(x: i32, y: i32, items: &[MenuItem]) -> Rect {
    Rect::new(x, y, DROP_W, items.len() as i32 * ITEM_H + 4)
}

pub fn popup_mouse(kind: MouseInput, x: i32, y: i32) -> bool {
    let Some((hwnd, px, py, items, _)) = STATE.with(|s| s.popup) else {
        return false;
    };
    let rect = popup_rect(px, py, items);
    let item = if rect.contains(x, y) {
        let idx = (y - rect.y - 2) / ITEM_H;
        if (0..items.len() as i32).contains(&idx) {
            Some(idx as usize)
        } else {
            None
        }
    } else {
        None
    };
    match kind {
        MouseInput::Move => match item {
            Some(idx) => {
                STATE.with_mut(|s| s.popup = Some((hwnd, px, py, items, idx)));
                video::mark_dirty();
                true
            }
            None => false,
        },
        MouseInput::LeftDown => match item {
            Some(idx) => {
                popup_close();
                event::post(hwnd, WindowEvent::Command { id: items[idx].command });
                true
            }
            None => false,
        },
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Painting (compositor overlays and the per-window bar strip)
// ---------------------------------------------------------------------------

/// Paint a window's menu-bar strip; called from decoration drawing.
pub fn paint_bar(hwnd: Hwnd) {
    let Some(bar) = bar_rect(hwnd) else { return };
    let Some(menus) = bar_for(hwnd) else { return };
    gfx::fill_rect(bar.x, bar.y, bar.w, bar.h, theme::MENU_BG);
    let open_idx = STATE.with(|s| match s.open {
        Some((h, idx, _)) if h == hwnd => Some(idx),
        _ => None,
    });
    let mut x = bar.x;
    for (idx, menu) in menus.iter().enumerate() {
        let w = title_width(menu);
        let (fg, bg) = if open_idx == Some(idx) {
            (theme::MENU_HILITE_FG, theme::MENU_HILITE_BG)
        } else {
            (theme::MENU_FG, theme::MENU_BG)
        };
        gfx::fill_rect(x, bar.y, w, bar.h, bg);
        gfx::text(x + TITLE_PAD, bar.y, menu.title, fg, bg);
        x += w;
    }
}

fn paint_item_list(rect: Rect, items: &[MenuItem], selected: usize) {
    gfx::fill_rect(rect.x, rect.y, rect.w, rect.h, theme::MENU_BG);
    gfx::bevel_rect(rect.x, rect.y, rect.w, rect.h, theme::BEVEL_LIGHT, theme::BEVEL_DARK);
    for (i, item) in items.iter().enumerate() {
        let iy = rect.y + 2 + i as i32 * ITEM_H;
        let (fg, bg) = if i == selected {
            (theme::MENU_HILITE_FG, theme::MENU_HILITE_BG)
        } else {
            (theme::MENU_FG, theme::MENU_BG)
        };
        gfx::fill_rect(rect.x + 2, iy, rect.w - 4, ITEM_H, bg);
        gfx::text(rect.x + 6, iy + 1, item.label, fg, bg);
    }
}

pub fn paint_dropdown() {
    let Some((hwnd, menu_idx, selected)) = STATE.with(|s| s.open) else {
        return;
    };
    let (Some(rect), Some(menus)) = (dropdown_rect(hwnd, menu_idx), bar_for(hwnd)) else {
        return;
    };
    if let Some(menu) = menus.get(menu_idx) {
        paint_item_list(rect, menu.items, selected);
    }
}

pub fn paint_popup() {
    let Some((_, px, py, items, selected)) = STATE.with(|s| s.popup) else {
        return;
    };
    paint_item_list(popup_rect(px, py, items), items, selected);
}

/// Drop any open menu owned by a dying window.
pub fn on_window_destroyed(hwnd: Hwnd) {
    STATE.with_mut(|s| {
        if matches!(s.open, Some((h, _, _)) if h == hwnd) {
            s.open = None;
        }
        if matches!(s.popup, Some((h, _, _, _, _)) if h == hwnd) {
            s.popup = None;
        }
    });
    remove_menu_bar(hwnd);
}
