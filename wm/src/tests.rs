use core::ffi::c_int;
use core::sync::atomic::Ordering;

use alloc::vec::Vec;

use rookos_abi::color::{COLOR_BLACK, attr_bg};
use rookos_abi::event::{EVENT_QUEUE_SIZE, MouseButtons, WindowEvent};
use rookos_abi::window::{HWND_NULL, HitZone, Hwnd, WM_MAX_WINDOWS, WindowFlags};
use rookos_lib::{StateCell, define_test_suite};

use rookos_fs::fat::{FatAttr, FatDirEntry};

use crate::event::{self, MouseInput};
use crate::shell;
use crate::terminal::{self, TERM_COLS, TERM_ROWS};
use crate::theme;
use crate::window;

fn fresh_wm() {
    window::init();
}

fn make_window(x: i32, y: i32, w: i32, h: i32) -> Hwnd {
    window::create_window(
        x,
        y,
        w,
        h,
        "test",
        WindowFlags::STYLE_DEFAULT,
        None,
        None,
    )
}

// ---------------------------------------------------------------------------
// Window manager
// ---------------------------------------------------------------------------

pub fn test_wm_slot_exhaustion() -> c_int {
    fresh_wm();
    let mut handles = Vec::new();
    for _ in 0..WM_MAX_WINDOWS {
        let h = make_window(0, 0, 100, 100);
        if h == HWND_NULL {
            return -1;
        }
        handles.push(h);
    }
    // The 17th create fails with no side effects.
    if make_window(0, 0, 100, 100) != HWND_NULL {
        return -1;
    }
    if !window::check_invariants() {
        return -1;
    }
    for h in handles {
        window::destroy_window(h);
    }
    if !window::check_invariants() {
        return -1;
    }
    0
}

pub fn test_wm_destroy_renumbers_z() -> c_int {
    fresh_wm();
    let a = make_window(0, 0, 100, 100);
    let b = make_window(10, 10, 100, 100);
    let c = make_window(20, 20, 100, 100);
    window::destroy_window(b);
    if !window::check_invariants() {
        return -1;
    }
    let (z, count) = window::z_snapshot();
    if count != 2 || z[0] != a || z[1] != c {
        return -1;
    }
    // Destroying the focused window passes focus to the new top.
    window::set_focus(a);
    window::destroy_window(a);
    if window::get_focus() != c {
        return -1;
    }
    0
}

pub fn test_wm_focus_raises() -> c_int {
    fresh_wm();
    let a = make_window(0, 0, 100, 100);
    let b = make_window(10, 10, 100, 100);
    window::set_focus(a);
    let (z, count) = window::z_snapshot();
    if count != 2 || z[count - 1] != a || z[0] != b {
        return -1;
    }
    if !window::check_invariants() {
        return -1;
    }
    0
}

pub fn test_wm_modal_blocks_focus() -> c_int {
    fresh_wm();
    let a = make_window(0, 0, 100, 100);
    let dialog = make_window(200, 200, 120, 80);
    window::set_focus(dialog);
    window::set_modal(dialog);
    window::set_focus(a);
    if window::get_focus() != dialog {
        return -1;
    }
    window::clear_modal();
    window::set_focus(a);
    if window::get_focus() != a {
        return -1;
    }
    0
}

pub fn test_wm_maximize_restore_rect() -> c_int {
    fresh_wm();
    let h = make_window(40, 30, 200, 150);
    window::maximize_window(h);
    let win = match window::window_snapshot(h) {
        Some(w) => w,
        None => return -1,
    };
    if win.frame.x != 0 || win.frame.w != rookos_video::DISPLAY_WIDTH {
        return -1;
    }
    window::restore_window(h);
    let win = match window::window_snapshot(h) {
        Some(w) => w,
        None => return -1,
    };
    if win.frame != rookos_abi::geom::Rect::new(40, 30, 200, 150) {
        return -1;
    }
    0
}

// ---------------------------------------------------------------------------
// Hit testing (S3 literals)
// ---------------------------------------------------------------------------

pub fn test_hit_test_s3() -> c_int {
    fresh_wm();
    let h = make_window(100, 80, 300, 200);
    if window::window_at_point(104, 84) != h {
        return -1;
    }
    let win = match window::window_snapshot(h) {
        Some(w) => w,
        None => return -1,
    };
    if theme::hit_test(&win.frame, win.flags, 104, 84) != HitZone::TitleBar {
        return -1;
    }
    if theme::hit_test(&win.frame, win.flags, 103, 83) != HitZone::BorderTL {
        return -1;
    }
    0
}

pub fn test_hit_test_zones() -> c_int {
    fresh_wm();
    let h = make_window(100, 80, 300, 200);
    let win = match window::window_snapshot(h) {
        Some(w) => w,
        None => return -1,
    };
    let f = &win.frame;
    // Exact corner pixel selects the corner, not an edge.
    if theme::hit_test(f, win.flags, 100, 80) != HitZone::BorderTL {
        return -1;
    }
    if theme::hit_test(f, win.flags, 399, 279) != HitZone::BorderBR {
        return -1;
    }
    // Mid-edges.
    if theme::hit_test(f, win.flags, 101, 180) != HitZone::BorderL {
        return -1;
    }
    if theme::hit_test(f, win.flags, 398, 180) != HitZone::BorderR {
        return -1;
    }
    if theme::hit_test(f, win.flags, 250, 81) != HitZone::BorderT {
        return -1;
    }
    if theme::hit_test(f, win.flags, 250, 278) != HitZone::BorderB {
        return -1;
    }
    // Buttons.
    let close = theme::close_btn_rect(f);
    if theme::hit_test(f, win.flags, close.x + 2, close.y + 2) != HitZone::Close {
        return -1;
    }
    // Client.
    if theme::hit_test(f, win.flags, 250, 200) != HitZone::Client {
        return -1;
    }
    // Outside.
    if theme::hit_test(f, win.flags, 50, 50) != HitZone::Nowhere {
        return -1;
    }
    0
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

static CAPTURED: StateCell<Vec<(Hwnd, WindowEvent)>> = StateCell::new(Vec::new());

fn capture_handler(hwnd: Hwnd, event: &WindowEvent) -> bool {
    CAPTURED.with_mut(|v| v.push((hwnd, *event)));
    true
}

pub fn test_event_bus_fifo() -> c_int {
    fresh_wm();
    CAPTURED.with_mut(|v| v.clear());
    let h = window::create_window(
        0,
        0,
        100,
        100,
        "events",
        WindowFlags::STYLE_DEFAULT,
        Some(capture_handler),
        None,
    );
    event::post(h, WindowEvent::Command { id: 1 });
    event::post(h, WindowEvent::Command { id: 2 });
    event::post(h, WindowEvent::Command { id: 3 });
    event::dispatch_all();
    let ok = CAPTURED.with(|v| {
        v.len() == 3
            && v[0].1 == WindowEvent::Command { id: 1 }
            && v[1].1 == WindowEvent::Command { id: 2 }
            && v[2].1 == WindowEvent::Command { id: 3 }
    });
    if !ok {
        return -1;
    }
    0
}

pub fn test_event_bus_overflow_drops() -> c_int {
    fresh_wm();
    let h = make_window(0, 0, 50, 50);
    let before = event::dropped_count();
    for i in 0..EVENT_QUEUE_SIZE {
        if !event::post(h, WindowEvent::Command { id: i as u16 }) {
            return -1;
        }
    }
    // The ring is full now; the next post drops and reports it.
    if event::post(h, WindowEvent::Command { id: 999 }) {
        return -1;
    }
    if event::dropped_count() != before + 1 {
        return -1;
    }
    event::dispatch_all();
    0
}

pub fn test_post_focused_without_focus() -> c_int {
    fresh_wm();
    if event::post_focused(WindowEvent::Command { id: 7 }) {
        return -1;
    }
    0
}

pub fn test_event_absent_target_dropped() -> c_int {
    fresh_wm();
    // No window 9 exists: delivery is a silent drop.
    event::post(9, WindowEvent::Command { id: 4 });
    event::dispatch_all();
    0
}

// ---------------------------------------------------------------------------
// Drag and resize
// ---------------------------------------------------------------------------

pub fn test_drag_moves_window() -> c_int {
    fresh_wm();
    let h = make_window(100, 80, 300, 200);
    let buttons = MouseButtons::LEFT;
    event::handle_mouse_input(MouseInput::LeftDown, 150, 90, buttons);
    if event::drag_outline().is_none() {
        return -1;
    }
    event::handle_mouse_input(MouseInput::Move, 170, 100, buttons);
    let outline = match event::drag_outline() {
        Some(r) => r,
        None => return -1,
    };
    if outline.x != 120 || outline.y != 90 {
        return -1;
    }
    event::handle_mouse_input(MouseInput::LeftUp, 170, 100, MouseButtons::empty());
    if event::drag_outline().is_some() {
        return -1;
    }
    let win = match window::window_snapshot(h) {
        Some(w) => w,
        None => return -1,
    };
    if win.frame.x != 120 || win.frame.y != 90 || win.frame.w != 300 {
        return -1;
    }
    0
}

pub fn test_resize_corner_and_min_clamp() -> c_int {
    fresh_wm();
    let h = make_window(100, 80, 300, 200);
    // Top-left corner grip.
    event::handle_mouse_input(MouseInput::LeftDown, 103, 83, MouseButtons::LEFT);
    event::handle_mouse_input(MouseInput::Move, 90, 70, MouseButtons::LEFT);
    event::handle_mouse_input(MouseInput::LeftUp, 90, 70, MouseButtons::empty());
    let win = match window::window_snapshot(h) {
        Some(w) => w,
        None => return -1,
    };
    if win.frame != rookos_abi::geom::Rect::new(87, 67, 313, 213) {
        return -1;
    }

    // Shrink through the right border: clamped to the minimum width.
    let right = win.frame.right();
    event::handle_mouse_input(MouseInput::LeftDown, right - 2, 160, MouseButtons::LEFT);
    event::handle_mouse_input(MouseInput::Move, 90, 160, MouseButtons::LEFT);
    event::handle_mouse_input(MouseInput::LeftUp, 90, 160, MouseButtons::empty());
    let win = match window::window_snapshot(h) {
        Some(w) => w,
        None => return -1,
    };
    if win.frame.w != theme::MIN_W {
        return -1;
    }
    0
}

pub fn test_modal_click_is_blocked() -> c_int {
    fresh_wm();
    let a = make_window(0, 0, 100, 100);
    let dialog = make_window(300, 300, 120, 80);
    window::set_focus(dialog);
    window::set_modal(dialog);
    // A click on the background window is swallowed; focus stays.
    event::handle_mouse_input(MouseInput::LeftDown, 50, 50, MouseButtons::LEFT);
    if window::get_focus() != dialog {
        return -1;
    }
    if event::drag_outline().is_some() {
        return -1;
    }
    window::clear_modal();
    event::handle_mouse_input(MouseInput::LeftDown, 50, 10, MouseButtons::LEFT);
    if window::get_focus() != a {
        return -1;
    }
    event::handle_mouse_input(MouseInput::LeftUp, 50, 10, MouseButtons::empty());
    0
}

pub fn test_cursor_packed_word() -> c_int {
    event::set_cursor_pos(321, 240);
    let p = event::cursor_pos();
    if p.x != 321 || p.y != 240 {
        return -1;
    }
    0
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

pub fn test_terminal_clear_s1() -> c_int {
    fresh_wm();
    let hwnd = terminal::create();
    let Some(term) = terminal::from_hwnd(hwnd) else {
        return -1;
    };
    term.puts("some text\n");
    term.clear(COLOR_BLACK);
    if term.cursor_col != 0 || term.cursor_row != 0 {
        return -1;
    }
    let buf = term.textbuf();
    for cell in 0..TERM_COLS * TERM_ROWS {
        if buf[cell * 2] != b' ' || attr_bg(buf[cell * 2 + 1]) != COLOR_BLACK {
            return -1;
        }
    }
    let term = terminal::from_hwnd(hwnd).unwrap();
    terminal::destroy(term);
    0
}

pub fn test_terminal_newline_law() -> c_int {
    fresh_wm();
    let hwnd = terminal::create();
    let Some(term) = terminal::from_hwnd(hwnd) else {
        return -1;
    };
    term.clear(COLOR_BLACK);
    term.set_cursor(5, 3);
    term.putc(b'\n');
    term.putc(b'X');
    if term.cursor_row != 4 || term.cursor_col != 1 {
        return -1;
    }
    terminal::destroy(term);
    0
}

pub fn test_terminal_scroll_and_tab() -> c_int {
    fresh_wm();
    let hwnd = terminal::create();
    let Some(term) = terminal::from_hwnd(hwnd) else {
        return -1;
    };
    term.clear(COLOR_BLACK);
    term.draw_text("AB", 0, 1, 7, 0);
    term.set_cursor(0, TERM_ROWS as i32 - 1);
    term.putc(b'\n'); // forces a scroll
    if term.cursor_row != TERM_ROWS as i32 - 1 {
        return -1;
    }
    let moved_up = term.textbuf()[0] == b'A';
    if !moved_up {
        return -1;
    }
    // Tab advances to the next multiple of 8.
    term.set_cursor(3, 0);
    term.putc(b'\t');
    if term.cursor_col != 8 {
        return -1;
    }
    // Backspace erases and retreats.
    term.set_cursor(2, 0);
    term.putc(0x08);
    if term.cursor_col != 1 {
        return -1;
    }
    terminal::destroy(term);
    0
}

pub fn test_terminal_input_ring() -> c_int {
    fresh_wm();
    let hwnd = terminal::create();
    let Some(term) = terminal::from_hwnd(hwnd) else {
        return -1;
    };
    if term.getch_now().is_some() {
        return -1;
    }
    term.push_input(b'h');
    term.push_input(b'i');
    if term.getch_now() != Some(b'h') || term.getch_now() != Some(b'i') {
        return -1;
    }
    if term.getch_now().is_some() {
        return -1;
    }
    terminal::destroy(term);
    0
}

pub fn test_terminal_close_event() -> c_int {
    fresh_wm();
    let hwnd = terminal::create();
    event::post(hwnd, WindowEvent::Close);
    event::dispatch_all();
    let Some(term) = terminal::from_hwnd(hwnd) else {
        return -1;
    };
    if !term.closing.load(Ordering::Acquire) {
        return -1;
    }
    terminal::destroy(term);
    0
}

// ---------------------------------------------------------------------------
// Shell parsing and formatting
// ---------------------------------------------------------------------------

pub fn test_tokenize_words_and_quotes() -> c_int {
    let parsed = shell::tokenize("cp \"my file.txt\" /tmp");
    if parsed.segments.len() != 1 || parsed.detached {
        return -1;
    }
    let argv = &parsed.segments[0];
    if argv.len() != 3 || argv[1] != "my file.txt" || argv[2] != "/tmp" {
        return -1;
    }
    0
}

pub fn test_tokenize_pipes_and_detach() -> c_int {
    let parsed = shell::tokenize("producer -x | consumer &");
    if parsed.segments.len() != 2 || !parsed.detached {
        return -1;
    }
    if parsed.segments[0] != ["producer", "-x"] || parsed.segments[1] != ["consumer"] {
        return -1;
    }
    let empty = shell::tokenize("   ");
    if !empty.segments.is_empty() {
        return -1;
    }
    0
}

pub fn test_ls_format_s2() -> c_int {
    let dir = FatDirEntry {
        name: "fos".into(),
        size: 0,
        attr: FatAttr::DIR,
    };
    let file = FatDirEntry {
        name: "readme.txt".into(),
        size: 42,
        attr: FatAttr::ARC,
    };
    if shell::format_ls_entry(&dir) != "  [fos]\n" {
        return -1;
    }
    if shell::format_ls_entry(&file) != "  readme.txt              42\n" {
        return -1;
    }
    0
}

define_test_suite!(
    wm,
    [
        test_wm_slot_exhaustion,
        test_wm_destroy_renumbers_z,
        test_wm_focus_raises,
        test_wm_modal_blocks_focus,
        test_wm_maximize_restore_rect,
        test_hit_test_s3,
        test_hit_test_zones,
        test_event_bus_fifo,
        test_event_bus_overflow_drops,
        test_post_focused_without_focus,
        test_event_absent_target_dropped,
        test_drag_moves_window,
        test_resize_corner_and_min_clamp,
        test_modal_click_is_blocked,
        test_cursor_packed_word,
        test_terminal_clear_s1,
        test_terminal_newline_law,
        test_terminal_scroll_and_tab,
        test_terminal_input_ring,
        test_terminal_close_event,
        test_tokenize_words_and_quotes,
        test_tokenize_pipes_and_detach,
        test_ls_format_s2,
    ]
);
