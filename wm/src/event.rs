//! Event bus and input routing.
//!
//! The bus is a fixed ring of `(target, event)` records shared across
//! both cores under the hardware spinlock: a cross-core CAS lock that
//! never raises the scheduler's interrupt mask, because masking could
//! delay the scanline IRQ and tear the frame. Posting sets the
//! compositor dirty bit; draining takes one record per lock
//! acquisition so producers on the other core interleave freely.
//!
//! Mouse and keyboard routing implement the fixed priority ladder:
//! drag machine, open overlays, taskbar, modal gate, hit-tested window.

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use rookos_abi::event::{EVENT_QUEUE_SIZE, KeyMods, MouseButtons, WindowEvent, scancode};
use rookos_abi::geom::{Point, Rect};
use rookos_abi::window::{HWND_NULL, HitZone, Hwnd, WindowFlags, WindowState};
use rookos_lib::{HwSpinlock, RingBuffer, StateCell, klog_warn};
use rookos_video as video;

use crate::theme;
use crate::window;
use crate::{menu, startmenu, sysmenu, taskbar};

#[derive(Copy, Clone, Default)]
struct QueuedEvent {
    target: Hwnd,
    event: Option<WindowEvent>,
}

static QUEUE: HwSpinlock<RingBuffer<QueuedEvent, EVENT_QUEUE_SIZE>> =
    HwSpinlock::new(RingBuffer::new_with(QueuedEvent {
        target: HWND_NULL,
        event: None,
    }));

static DROPPED: AtomicU32 = AtomicU32::new(0);

/// Key-held bitmap for scancodes 0x00-0x7F.
static KEY_STATE: StateCell<[u8; 16]> = StateCell::new([0; 16]);
static MODIFIERS: AtomicU8 = AtomicU8::new(0);

/// Cursor position packed `(x << 16) | y` so the compositor can read
/// it from another task without locking.
static CURSOR_POS: AtomicU32 = AtomicU32::new(
    ((video::DISPLAY_WIDTH as u32 / 2) << 16) | (video::DISPLAY_HEIGHT as u32 / 2),
);
static MOUSE_BUTTONS: AtomicU8 = AtomicU8::new(0);

pub fn init() {
    QUEUE.lock().reset();
    DROPPED.store(0, Ordering::Relaxed);
    KEY_STATE.with_mut(|k| *k = [0; 16]);
    DRAG.with_mut(|d| d.mode = DragMode::None);
}

/// Post an event to a window. On a full ring the event is dropped and
/// `false` returned; the dirty bit is still set so the compositor keeps
/// running.
pub fn post(target: Hwnd, event: WindowEvent) -> bool {
    let ok = QUEUE.lock().try_push(QueuedEvent {
        target,
        event: Some(event),
    });
    video::mark_dirty();
    if !ok {
        DROPPED.fetch_add(1, Ordering::Relaxed);
    }
    ok
}

pub fn post_focused(event: WindowEvent) -> bool {
    let focus = window::get_focus();
    if focus == HWND_NULL {
        return false;
    }
    post(focus, event)
}

pub fn dropped_count() -> u32 {
    DROPPED.load(Ordering::Relaxed)
}

/// Drain the queue, one record per lock acquisition, dispatching each
/// to its target's event handler. Absent targets or handlers drop the
/// event silently.
pub fn dispatch_all() {
    loop {
        let record = QUEUE.lock().try_pop();
        let Some(record) = record else { break };
        let Some(event) = record.event else { continue };

        match event {
            WindowEvent::KeyDown { scancode, mods } => {
                key_state_set(scancode, true);
                MODIFIERS.store(mods.bits(), Ordering::Relaxed);
            }
            WindowEvent::KeyUp { scancode, mods } => {
                key_state_set(scancode, false);
                MODIFIERS.store(mods.bits(), Ordering::Relaxed);
            }
            _ => {}
        }

        let handler = window::window_snapshot(record.target).and_then(|w| w.event_handler);
        if let Some(handler) = handler {
            handler(record.target, &event);
        }
    }
}

fn key_state_set(sc: u8, down: bool) {
    if sc >= 128 {
        return;
    }
    KEY_STATE.with_mut(|k| {
        if down {
            k[(sc >> 3) as usize] |= 1 << (sc & 7);
        } else {
            k[(sc >> 3) as usize] &= !(1 << (sc & 7));
        }
    });
}

pub fn is_key_down(sc: u8) -> bool {
    if sc >= 128 {
        return false;
    }
    KEY_STATE.with(|k| k[(sc >> 3) as usize] & (1 << (sc & 7)) != 0)
}

pub fn modifiers() -> KeyMods {
    KeyMods::from_bits_truncate(MODIFIERS.load(Ordering::Relaxed))
}

pub fn set_cursor_pos(x: i32, y: i32) {
    CURSOR_POS.store(((x as u16 as u32) << 16) | (y as u16 as u32), Ordering::Relaxed);
    video::mark_dirty();
}

pub fn cursor_pos() -> Point {
    let packed = CURSOR_POS.load(Ordering::Relaxed);
    Point::new((packed >> 16) as u16 as i16 as i32, (packed & 0xFFFF) as u16 as i16 as i32)
}

pub fn set_mouse_buttons(buttons: MouseButtons) {
    MOUSE_BUTTONS.store(buttons.bits(), Ordering::Relaxed);
}

pub fn mouse_buttons() -> MouseButtons {
    MouseButtons::from_bits_truncate(MOUSE_BUTTONS.load(Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Drag / resize state machine
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, PartialEq, Eq)]
enum DragMode {
    None,
    Move,
    Resize,
}

struct DragState {
    mode: DragMode,
    hwnd: Hwnd,
    anchor_x: i32,
    anchor_y: i32,
    orig: Rect,
    rect: Rect,
    edge: HitZone,
}

static DRAG: StateCell<DragState> = StateCell::new(DragState {
    mode: DragMode::None,
    hwnd: HWND_NULL,
    anchor_x: 0,
    anchor_y: 0,
    orig: Rect::new(0, 0, 0, 0),
    rect: Rect::new(0, 0, 0, 0),
    edge: HitZone::Nowhere,
});

fn begin_drag(hwnd: Hwnd, mode: DragMode, edge: HitZone, mx: i32, my: i32) {
    let Some(win) = window::window_snapshot(hwnd) else {
        return;
    };
    DRAG.with_mut(|d| {
        d.mode = mode;
        d.hwnd = hwnd;
        d.anchor_x = mx;
        d.anchor_y = my;
        d.orig = win.frame;
        d.rect = win.frame;
        d.edge = edge;
    });
}

fn update_resize_rect(d: &mut DragState, mx: i32, my: i32) {
    let dx = mx - d.anchor_x;
    let dy = my - d.anchor_y;
    let mut r = d.orig;

    match d.edge {
        HitZone::BorderR => r.w += dx,
        HitZone::BorderB => r.h += dy,
        HitZone::BorderL => {
            r.x += dx;
            r.w -= dx;
        }
        HitZone::BorderT => {
            r.y += dy;
            r.h -= dy;
        }
        HitZone::BorderBR => {
            r.w += dx;
            r.h += dy;
        }
        HitZone::BorderBL => {
            r.x += dx;
            r.w -= dx;
            r.h += dy;
        }
        HitZone::BorderTR => {
            r.w += dx;
            r.y += dy;
            r.h -= dy;
        }
        HitZone::BorderTL => {
            r.x += dx;
            r.w -= dx;
            r.y += dy;
            r.h -= dy;
        }
        _ => {}
    }

    // Clamp to the minimum size, anchoring the far edge for left/top
    // grips.
    if r.w < theme::MIN_W {
        if matches!(d.edge, HitZone::BorderL | HitZone::BorderTL | HitZone::BorderBL) {
            r.x = d.orig.x + d.orig.w - theme::MIN_W;
        }
        r.w = theme::MIN_W;
    }
    if r.h < theme::MIN_H {
        if matches!(d.edge, HitZone::BorderT | HitZone::BorderTL | HitZone::BorderTR) {
            r.y = d.orig.y + d.orig.h - theme::MIN_H;
        }
        r.h = theme::MIN_H;
    }
    d.rect = r;
}

/// Outline rectangle while a drag/resize is live (compositor overlay).
pub fn drag_outline() -> Option<Rect> {
    DRAG.with(|d| {
        if d.mode == DragMode::None {
            None
        } else {
            Some(d.rect)
        }
    })
}

/// Called when a window dies mid-drag.
pub fn cancel_drag_of(hwnd: Hwnd) {
    DRAG.with_mut(|d| {
        if d.hwnd == hwnd {
            d.mode = DragMode::None;
            d.hwnd = HWND_NULL;
        }
    });
}

// ---------------------------------------------------------------------------
// Mouse routing
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MouseInput {
    Move,
    LeftDown,
    LeftUp,
    RightDown,
    RightUp,
}

fn forward_mouse_event(kind: MouseInput, x: i32, y: i32, buttons: MouseButtons, target: Hwnd) {
    let Some(win) = window::window_snapshot(target) else {
        return;
    };
    let origin = theme::client_origin(&win.frame, win.flags);
    let cx = (x - origin.x) as i16;
    let cy = (y - origin.y) as i16;
    let mods = modifiers();
    let event = match kind {
        MouseInput::Move => WindowEvent::MouseMove { x: cx, y: cy, buttons, mods },
        MouseInput::LeftDown => WindowEvent::ButtonDown { x: cx, y: cy, buttons, mods },
        MouseInput::LeftUp => WindowEvent::ButtonUp { x: cx, y: cy, buttons, mods },
        MouseInput::RightDown => WindowEvent::RButtonDown { x: cx, y: cy, buttons, mods },
        MouseInput::RightUp => WindowEvent::RButtonUp { x: cx, y: cy, buttons, mods },
    };
    if !post(target, event) {
        klog_warn!("event queue overflow, mouse event dropped");
    }
}

/// Single entry point for raw mouse input from the input task.
pub fn handle_mouse_input(kind: MouseInput, x: i32, y: i32, buttons: MouseButtons) {
    // An active drag or resize consumes everything until button-up.
    let drag_live = DRAG.with(|d| d.mode != DragMode::None);
    if drag_live {
        match kind {
            MouseInput::Move => {
                DRAG.with_mut(|d| {
                    if d.mode == DragMode::Move {
                        d.rect.x = d.orig.x + (x - d.anchor_x);
                        d.rect.y = d.orig.y + (y - d.anchor_y);
                    } else {
                        update_resize_rect(d, x, y);
                    }
                });
                video::mark_dirty();
            }
            MouseInput::LeftUp => {
                let (hwnd, mode, rect, orig) = DRAG.with_mut(|d| {
                    let out = (d.hwnd, d.mode, d.rect, d.orig);
                    d.mode = DragMode::None;
                    d.hwnd = HWND_NULL;
                    out
                });
                window::set_window_rect(hwnd, rect);
                if rect.x != orig.x || rect.y != orig.y {
                    post(hwnd, WindowEvent::Move { x: rect.x as i16, y: rect.y as i16 });
                }
                if mode == DragMode::Resize && (rect.w != orig.w || rect.h != orig.h) {
                    post(hwnd, WindowEvent::Size { w: rect.w as i16, h: rect.h as i16 });
                }
                video::mark_dirty();
            }
            _ => {}
        }
        return;
    }

    // Overlay routing, in fixed priority order.
    if startmenu::is_open() && startmenu::mouse(kind, x, y) {
        return;
    }
    if sysmenu::is_open() && sysmenu::mouse(kind, x, y) {
        return;
    }
    if menu::popup_is_open() && menu::popup_mouse(kind, x, y) {
        return;
    }
    if menu::is_open() && menu::dropdown_mouse(kind, x, y) {
        return;
    }
    if kind == MouseInput::LeftDown && taskbar::mouse_click(x, y) {
        return;
    }

    // A click on the desktop closes every open menu.
    if kind == MouseInput::LeftDown {
        startmenu::close();
        sysmenu::close();
        menu::close();
        menu::popup_close();
    }

    match kind {
        MouseInput::LeftDown => {
            let target = window::window_at_point(x, y);
            if target == HWND_NULL {
                return;
            }
            // Modal gate: clicks below the modal window flash it.
            let modal = window::get_modal();
            if modal != HWND_NULL && target != modal {
                window::invalidate(modal);
                return;
            }
            let Some(win) = window::window_snapshot(target) else {
                return;
            };
            window::set_focus(target);

            match theme::hit_test(&win.frame, win.flags, x, y) {
                HitZone::TitleBar => {
                    if win.flags.contains(WindowFlags::MOVABLE)
                        && win.state != WindowState::Maximized
                    {
                        begin_drag(target, DragMode::Move, HitZone::Nowhere, x, y);
                    }
                }
                HitZone::Close => {
                    if win.flags.contains(WindowFlags::CLOSABLE) {
                        post(target, WindowEvent::Close);
                    }
                }
                HitZone::Maximize => {
                    if win.flags.contains(WindowFlags::RESIZABLE) {
                        if win.state == WindowState::Maximized {
                            window::restore_window(target);
                        } else {
                            window::maximize_window(target);
                        }
                    }
                }
                HitZone::Minimize => {
                    window::minimize_window(target);
                }
                HitZone::MenuBar => {
                    if win.flags.contains(WindowFlags::MENUBAR) {
                        menu::menu_bar_click(target, x - (win.frame.x + theme::BORDER_WIDTH));
                    }
                }
                zone if zone.is_border() => {
                    if win.flags.contains(WindowFlags::RESIZABLE)
                        && win.state != WindowState::Maximized
                    {
                        begin_drag(target, DragMode::Resize, zone, x, y);
                    }
                }
                HitZone::Client => {
                    forward_mouse_event(kind, x, y, buttons, target);
                }
                _ => {}
            }
        }
        MouseInput::LeftUp | MouseInput::Move | MouseInput::RightDown | MouseInput::RightUp => {
            if kind == MouseInput::Move {
                // Hover pass for open menus.
                if startmenu::is_open() {
                    startmenu::mouse(kind, x, y);
                }
                if sysmenu::is_open() {
                    sysmenu::mouse(kind, x, y);
                }
                if menu::is_open() {
                    menu::dropdown_mouse(kind, x, y);
                }
            }
            let focus = window::get_focus();
            if focus != HWND_NULL {
                forward_mouse_event(kind, x, y, buttons, focus);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Keyboard routing
// ---------------------------------------------------------------------------

/// Keyboard ladder, mirroring the mouse priorities: open overlays
/// first, Alt chords next, then the focused (or modal) window.
pub fn handle_key_input(sc: u8, down: bool, mods: KeyMods, ch: Option<u8>) {
    key_state_set(sc, down);
    MODIFIERS.store(mods.bits(), Ordering::Relaxed);

    if down {
        if startmenu::is_open() && startmenu::key(sc) {
            return;
        }
        if sysmenu::is_open() && sysmenu::key(sc) {
            return;
        }
        if menu::is_open() && menu::key(sc) {
            return;
        }
        if mods.contains(KeyMods::ALT) && sc == scancode::KEY_TAB {
            window::cycle_focus();
            return;
        }
        if mods.contains(KeyMods::ALT) {
            if let Some(letter) = ch {
                let target = window::get_focus();
                if menu::open_by_accelerator(target, letter) {
                    return;
                }
            }
        }
    }

    let modal = window::get_modal();
    let target = if modal != HWND_NULL {
        modal
    } else {
        window::get_focus()
    };
    if target == HWND_NULL {
        return;
    }
    let event = if down {
        WindowEvent::KeyDown { scancode: sc, mods }
    } else {
        WindowEvent::KeyUp { scancode: sc, mods }
    };
    post(target, event);
    if down {
        if let Some(ch) = ch {
            post(target, WindowEvent::Char { ch, mods });
        }
    }
}
