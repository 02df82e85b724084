//! Window table, z-stack, focus and modal state.
//!
//! Windows live in fixed slots; handle = slot index + 1, handle 0 is
//! the reserved null. The z-stack is a dense bottom-to-top list of live
//! handles. All mutation happens on scheduler-core tasks through short
//! `StateCell` scopes; the compositor takes snapshots before calling
//! out to paint handlers.

use rookos_abi::event::WindowEvent;
use rookos_abi::geom::Rect;
use rookos_abi::window::{
    HWND_NULL, Hwnd, WINDOW_TITLE_LEN, WM_MAX_WINDOWS, WindowFlags, WindowState,
};
use rookos_lib::{StateCell, string};
use rookos_video as video;

use crate::event;
use crate::theme;

pub type EventHandler = fn(Hwnd, &WindowEvent) -> bool;
pub type PaintHandler = fn(Hwnd);

#[derive(Copy, Clone)]
pub struct Window {
    pub flags: WindowFlags,
    pub state: WindowState,
    pub frame: Rect,
    /// Frame saved before maximize, restored afterwards.
    pub restore_rect: Rect,
    pub bg_color: u8,
    pub z_order: u8,
    pub title: [u8; WINDOW_TITLE_LEN],
    pub event_handler: Option<EventHandler>,
    pub paint_handler: Option<PaintHandler>,
    pub user_data: *mut (),
}

impl Window {
    const fn empty() -> Self {
        Self {
            flags: WindowFlags::empty(),
            state: WindowState::Normal,
            frame: Rect::new(0, 0, 0, 0),
            restore_rect: Rect::new(0, 0, 0, 0),
            bg_color: 0,
            z_order: 0,
            title: [0; WINDOW_TITLE_LEN],
            event_handler: None,
            paint_handler: None,
            user_data: core::ptr::null_mut(),
        }
    }

    pub fn title_str(&self) -> &str {
        string::bytes_as_str(&self.title)
    }
}

struct WmState {
    windows: [Window; WM_MAX_WINDOWS],
    z_stack: [Hwnd; WM_MAX_WINDOWS],
    z_count: usize,
    focus: Hwnd,
    modal: Hwnd,
}

// SAFETY: the table is confined to scheduler-core tasks; user_data
// pointers are owned by whoever created the window.
unsafe impl Send for WmState {}

static WM: StateCell<WmState> = StateCell::new(WmState {
    windows: [Window::empty(); WM_MAX_WINDOWS],
    z_stack: [HWND_NULL; WM_MAX_WINDOWS],
    z_count: 0,
    focus: HWND_NULL,
    modal: HWND_NULL,
});

fn slot(hwnd: Hwnd) -> Option<usize> {
    if hwnd >= 1 && (hwnd as usize) <= WM_MAX_WINDOWS {
        Some(hwnd as usize - 1)
    } else {
        None
    }
}

fn alive(state: &WmState, hwnd: Hwnd) -> bool {
    slot(hwnd).is_some_and(|i| state.windows[i].flags.contains(WindowFlags::ALIVE))
}

pub fn init() {
    WM.with_mut(|s| {
        s.windows = [Window::empty(); WM_MAX_WINDOWS];
        s.z_stack = [HWND_NULL; WM_MAX_WINDOWS];
        s.z_count = 0;
        s.focus = HWND_NULL;
        s.modal = HWND_NULL;
    });
    event::init();
}

/// Allocate a slot, push it on top of the z-stack, and return its
/// handle. `HWND_NULL` when all slots are in use.
pub fn create_window(
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    title: &str,
    style: WindowFlags,
    event_handler: Option<EventHandler>,
    paint_handler: Option<PaintHandler>,
) -> Hwnd {
    WM.with_mut(|s| {
        for i in 0..WM_MAX_WINDOWS {
            if s.windows[i].flags.contains(WindowFlags::ALIVE) {
                continue;
            }
            let mut win = Window::empty();
            win.flags = WindowFlags::ALIVE
                | WindowFlags::VISIBLE
                | WindowFlags::DIRTY
                | (style & WindowFlags::STYLE_MASK);
            win.frame = Rect::new(x, y, w, h);
            win.restore_rect = win.frame;
            win.bg_color = rookos_abi::color::COLOR_WHITE;
            win.event_handler = event_handler;
            win.paint_handler = paint_handler;
            string::copy_padded(&mut win.title, title);

            let hwnd = (i + 1) as Hwnd;
            win.z_order = s.z_count as u8;
            s.windows[i] = win;
            s.z_stack[s.z_count] = hwnd;
            s.z_count += 1;
            video::mark_dirty();
            return hwnd;
        }
        HWND_NULL
    })
}

fn renumber_z(state: &mut WmState) {
    for i in 0..state.z_count {
        let hwnd = state.z_stack[i];
        if let Some(idx) = slot(hwnd) {
            state.windows[idx].z_order = i as u8;
        }
    }
}

fn remove_from_z(state: &mut WmState, hwnd: Hwnd) {
    if let Some(pos) = state.z_stack[..state.z_count].iter().position(|&h| h == hwnd) {
        for j in pos..state.z_count - 1 {
            state.z_stack[j] = state.z_stack[j + 1];
        }
        state.z_count -= 1;
        renumber_z(state);
    }
}

/// Destroy a window: drop it from the z-stack (dense renumbering),
/// move focus to the new top, cancel any drag it owned.
pub fn destroy_window(hwnd: Hwnd) {
    event::cancel_drag_of(hwnd);
    crate::menu::on_window_destroyed(hwnd);
    WM.with_mut(|s| {
        if !alive(s, hwnd) {
            return;
        }
        remove_from_z(s, hwnd);
        if s.modal == hwnd {
            s.modal = HWND_NULL;
        }
        if s.focus == hwnd {
            s.focus = if s.z_count > 0 {
                s.z_stack[s.z_count - 1]
            } else {
                HWND_NULL
            };
        }
        if let Some(i) = slot(hwnd) {
            s.windows[i] = Window::empty();
        }
        video::mark_dirty();
    });
}

pub fn show_window(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            s.windows[i].flags |= WindowFlags::VISIBLE | WindowFlags::DIRTY;
            video::mark_dirty();
        }
    });
}

pub fn hide_window(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            s.windows[hwnd as usize - 1].flags -= WindowFlags::VISIBLE;
            video::mark_dirty();
        }
    });
}

pub fn minimize_window(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            s.windows[i].state = WindowState::Minimized;
            s.windows[i].flags -= WindowFlags::VISIBLE;
            video::mark_dirty();
        }
    });
}

pub fn maximize_window(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            if s.windows[i].state == WindowState::Normal {
                s.windows[i].restore_rect = s.windows[i].frame;
            }
            s.windows[i].state = WindowState::Maximized;
            s.windows[i].frame =
                Rect::new(0, 0, video::DISPLAY_WIDTH, video::DISPLAY_HEIGHT);
            s.windows[i].flags |= WindowFlags::DIRTY;
            video::mark_dirty();
        }
    });
}

pub fn restore_window(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            if s.windows[i].state == WindowState::Maximized {
                s.windows[i].frame = s.windows[i].restore_rect;
            }
            s.windows[i].state = WindowState::Normal;
            s.windows[i].flags |= WindowFlags::VISIBLE | WindowFlags::DIRTY;
            video::mark_dirty();
        }
    });
}

pub fn move_window(hwnd: Hwnd, x: i32, y: i32) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            s.windows[i].frame.x = x;
            s.windows[i].frame.y = y;
            s.windows[i].flags |= WindowFlags::DIRTY;
            video::mark_dirty();
        }
    });
}

pub fn resize_window(hwnd: Hwnd, w: i32, h: i32) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            s.windows[i].frame.w = w;
            s.windows[i].frame.h = h;
            s.windows[i].flags |= WindowFlags::DIRTY;
            video::mark_dirty();
        }
    });
}

pub fn set_window_rect(hwnd: Hwnd, rect: Rect) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            s.windows[i].frame = rect;
            s.windows[i].flags |= WindowFlags::DIRTY;
            video::mark_dirty();
        }
    });
}

/// Focus a window, raising it to the top of the z-stack. Focus cannot
/// leave a live modal window.
pub fn set_focus(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if s.focus == hwnd {
            return;
        }
        if s.modal != HWND_NULL && hwnd != s.modal {
            return;
        }
        if alive(s, s.focus) {
            let i = s.focus as usize - 1;
            s.windows[i].flags -= WindowFlags::FOCUSED;
            s.windows[i].flags |= WindowFlags::DIRTY;
        }
        s.focus = hwnd;
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            s.windows[i].flags |= WindowFlags::FOCUSED | WindowFlags::DIRTY;
            // Raise to the top.
            if let Some(pos) = s.z_stack[..s.z_count].iter().position(|&h| h == hwnd) {
                for j in pos..s.z_count - 1 {
                    s.z_stack[j] = s.z_stack[j + 1];
                }
                s.z_stack[s.z_count - 1] = hwnd;
                renumber_z(s);
            }
        }
        video::mark_dirty();
    });
}

pub fn get_focus() -> Hwnd {
    WM.with(|s| s.focus)
}

/// Alt+Tab: focus the next visible window below the current top.
pub fn cycle_focus() {
    let next = WM.with(|s| {
        (0..s.z_count)
            .rev()
            .map(|i| s.z_stack[i])
            .find(|&h| {
                h != s.focus
                    && alive(s, h)
                    && s.windows[h as usize - 1].flags.contains(WindowFlags::VISIBLE)
            })
    });
    if let Some(hwnd) = next {
        set_focus(hwnd);
    }
}

pub fn set_modal(hwnd: Hwnd) {
    WM.with_mut(|s| s.modal = hwnd);
}

pub fn clear_modal() {
    WM.with_mut(|s| s.modal = HWND_NULL);
}

pub fn get_modal() -> Hwnd {
    WM.with(|s| s.modal)
}

pub fn invalidate(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            s.windows[hwnd as usize - 1].flags |= WindowFlags::DIRTY;
        }
    });
    video::mark_dirty();
}

pub fn set_title(hwnd: Hwnd, title: &str) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            let i = hwnd as usize - 1;
            string::copy_padded(&mut s.windows[i].title, title);
            s.windows[i].flags |= WindowFlags::DIRTY;
            video::mark_dirty();
        }
    });
}

pub fn set_user_data(hwnd: Hwnd, data: *mut ()) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            s.windows[hwnd as usize - 1].user_data = data;
        }
    });
}

pub fn user_data(hwnd: Hwnd) -> *mut () {
    WM.with(|s| {
        if alive(s, hwnd) {
            s.windows[hwnd as usize - 1].user_data
        } else {
            core::ptr::null_mut()
        }
    })
}

/// Copy of the window record, for hit-testing and painting outside the
/// state scope.
pub fn window_snapshot(hwnd: Hwnd) -> Option<Window> {
    WM.with(|s| {
        if alive(s, hwnd) {
            Some(s.windows[hwnd as usize - 1])
        } else {
            None
        }
    })
}

/// Client rectangle in window-local coordinates.
pub fn client_rect(hwnd: Hwnd) -> Rect {
    match window_snapshot(hwnd) {
        Some(win) => {
            let screen = theme::client_rect(&win.frame, win.flags);
            Rect::new(0, 0, screen.w, screen.h)
        }
        None => Rect::new(0, 0, 0, 0),
    }
}

/// Topmost visible window containing the point.
pub fn window_at_point(x: i32, y: i32) -> Hwnd {
    WM.with(|s| {
        for i in (0..s.z_count).rev() {
            let hwnd = s.z_stack[i];
            let Some(idx) = slot(hwnd) else { continue };
            let win = &s.windows[idx];
            if !win.flags.contains(WindowFlags::VISIBLE) {
                continue;
            }
            if win.frame.contains(x, y) {
                return hwnd;
            }
        }
        HWND_NULL
    })
}

/// Bottom-to-top z-order snapshot for the compositor.
pub fn z_snapshot() -> ([Hwnd; WM_MAX_WINDOWS], usize) {
    WM.with(|s| (s.z_stack, s.z_count))
}

/// Clear a window's dirty bit after paint.
pub fn clear_window_dirty(hwnd: Hwnd) {
    WM.with_mut(|s| {
        if alive(s, hwnd) {
            s.windows[hwnd as usize - 1].flags -= WindowFlags::DIRTY;
        }
    });
}

/// Structural invariants, checked by the test suite: dense z-stack of
/// unique live handles, z_order fields matching positions, focus in
/// the stack or null.
pub fn check_invariants() -> bool {
    WM.with(|s| {
        let mut seen = [false; WM_MAX_WINDOWS];
        for i in 0..s.z_count {
            let hwnd = s.z_stack[i];
            let Some(idx) = slot(hwnd) else { return false };
            if !s.windows[idx].flags.contains(WindowFlags::ALIVE) {
                return false;
            }
            if seen[idx] {
                return false;
            }
            seen[idx] = true;
            if s.windows[idx].z_order != i as u8 {
                return false;
            }
        }
        // Every alive window appears exactly once.
        for (idx, win) in s.windows.iter().enumerate() {
            if win.flags.contains(WindowFlags::ALIVE) && !seen[idx] {
                return false;
            }
        }
        if s.focus != HWND_NULL && !alive(s, s.focus) {
            return false;
        }
        true
    })
}
