//! Taskbar: start button plus one button per window.

use rookos_abi::geom::Rect;
use rookos_abi::window::{HWND_NULL, Hwnd, WM_MAX_WINDOWS, WindowState};
use rookos_gfx as gfx;
use rookos_video as video;

use crate::window;
use crate::{startmenu, theme};

pub const TASKBAR_HEIGHT: i32 = 28;
pub const START_BUTTON_W: i32 = 56;
pub const APP_BUTTON_W: i32 = 120;
const PAD: i32 = 3;

pub fn bar_rect() -> Rect {
    Rect::new(
        0,
        video::DISPLAY_HEIGHT - TASKBAR_HEIGHT,
        video::DISPLAY_WIDTH,
        TASKBAR_HEIGHT,
    )
}

pub fn start_button_rect() -> Rect {
    let bar = bar_rect();
    Rect::new(PAD, bar.y + PAD, START_BUTTON_W, TASKBAR_HEIGHT - 2 * PAD)
}

fn app_button_rect(position: usize) -> Rect {
    let bar = bar_rect();
    Rect::new(
        PAD * 2 + START_BUTTON_W + position as i32 * (APP_BUTTON_W + PAD),
        bar.y + PAD,
        APP_BUTTON_W,
        TASKBAR_HEIGHT - 2 * PAD,
    )
}

/// Alive windows in handle order, paired with their taskbar position.
fn buttons(mut f: impl FnMut(usize, Hwnd, &window::Window)) {
    let mut position = 0;
    for hwnd in 1..=WM_MAX_WINDOWS as Hwnd {
        if let Some(win) = window::window_snapshot(hwnd) {
            f(position, hwnd, &win);
            position += 1;
        }
    }
}

/// Handle a left-button-down in screen coordinates. Returns true when
/// the click landed on the bar (it never falls through to windows).
pub fn mouse_click(x: i32, y: i32) -> bool {
    if !bar_rect().contains(x, y) {
        return false;
    }
    if start_button_rect().contains(x, y) {
        startmenu::toggle();
        return true;
    }

    let mut clicked = HWND_NULL;
    buttons(|position, hwnd, _| {
        if app_button_rect(position).contains(x, y) {
            clicked = hwnd;
        }
    });
    if clicked != HWND_NULL {
        match window::window_snapshot(clicked) {
            Some(win) if win.state == WindowState::Minimized => {
                window::restore_window(clicked);
                window::set_focus(clicked);
            }
            Some(_) if window::get_focus() == clicked => {
                window::minimize_window(clicked);
            }
            Some(_) => window::set_focus(clicked),
            None => {}
        }
    }
    video::mark_dirty();
    true
}

pub fn paint() {
    let bar = bar_rect();
    gfx::fill_rect(bar.x, bar.y, bar.w, bar.h, theme::BUTTON_FACE);
    video::hline_safe(bar.x, bar.y, bar.w, theme::BEVEL_LIGHT);

    let start = start_button_rect();
    let start_open = startmenu::is_open();
    gfx::fill_rect(start.x, start.y, start.w, start.h, theme::BUTTON_FACE);
    if start_open {
        gfx::bevel_rect(start.x, start.y, start.w, start.h, theme::BEVEL_DARK, theme::BEVEL_LIGHT);
    } else {
        gfx::bevel_rect(start.x, start.y, start.w, start.h, theme::BEVEL_LIGHT, theme::BEVEL_DARK);
    }
    gfx::text(start.x + 8, start.y + (start.h - 16) / 2, "Start", theme::MENU_FG, theme::BUTTON_FACE);

    let focus = window::get_focus();
    buttons(|position, hwnd, win| {
        let r = app_button_rect(position);
        if r.right() > bar.w {
            return;
        }
        let pressed = hwnd == focus && win.state != WindowState::Minimized;
        gfx::fill_rect(r.x, r.y, r.w, r.h, theme::BUTTON_FACE);
        if pressed {
            gfx::bevel_rect(r.x, r.y, r.w, r.h, theme::BEVEL_DARK, theme::BEVEL_LIGHT);
        } else {
            gfx::bevel_rect(r.x, r.y, r.w, r.h, theme::BEVEL_LIGHT, theme::BEVEL_DARK);
        }
        let clip = Rect::new(r.x + 4, r.y, r.w - 8, r.h);
        gfx::text_clipped(
            r.x + 6,
            r.y + (r.h - 16) / 2,
            win.title_str(),
            theme::MENU_FG,
            theme::BUTTON_FACE,
            &clip,
        );
    });
}
