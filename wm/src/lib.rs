#![no_std]

extern crate alloc;

pub mod compositor;
pub mod event;
pub mod menu;
pub mod shell;
pub mod startmenu;
pub mod sysmenu;
pub mod taskbar;
pub mod terminal;
pub mod theme;
pub mod window;

pub mod tests;

use core::ffi::c_char;

use rookos_abi::syscall as slots;
use rookos_abi::window::Hwnd;
use rookos_core::syscall::sys_table_register;
use rookos_fs::fileio::{ConsoleOps, register_console};

/// Bring the window system up: window table, event bus, console
/// routing, terminal binding for spawned tasks, and the WM-owned
/// syscall slots. Called once at boot before any task that draws.
pub fn init() {
    window::init();
    register_console(ConsoleOps {
        write: console_write,
        getch: console_getch,
        getch_now: console_getch_now,
    });
    rookos_core::process::register_term_binder(terminal::bind_task_terminal);
    sys_table_init_wm();
}

fn console_write(buf: &[u8]) {
    if let Some(term) = terminal::get_active() {
        for &b in buf {
            term.putc(b);
        }
    }
}

fn console_getch() -> u8 {
    match terminal::get_active() {
        Some(term) => term.getch(),
        None => b'\n',
    }
}

fn console_getch_now() -> Option<u8> {
    terminal::get_active().and_then(|t| t.getch_now())
}

// ---------------------------------------------------------------------------
// WM-owned syscall slots
// ---------------------------------------------------------------------------

unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: callers pass NUL-terminated strings per the ABI.
    unsafe { core::ffi::CStr::from_ptr(ptr) }.to_str().ok()
}

extern "C" fn sys_term_putc(c: u8) {
    if let Some(term) = terminal::get_active() {
        term.putc(c);
    }
}

extern "C" fn sys_term_puts(s: *const c_char) {
    let Some(s) = (unsafe { cstr(s) }) else { return };
    if let Some(term) = terminal::get_active() {
        term.puts(s);
    }
}

extern "C" fn sys_term_clear(color: u8) {
    if let Some(term) = terminal::get_active() {
        term.clear(color);
    }
}

extern "C" fn sys_term_set_cursor(col: i32, row: i32) {
    if let Some(term) = terminal::get_active() {
        term.set_cursor(col, row);
    }
}

extern "C" fn sys_term_set_color(fg: u8, bg: u8) {
    if let Some(term) = terminal::get_active() {
        term.set_color(fg, bg);
    }
}

extern "C" fn sys_term_getch() -> i32 {
    match terminal::get_active() {
        Some(term) => term.getch() as i32,
        None => -1,
    }
}

extern "C" fn sys_term_getch_now() -> i32 {
    match terminal::get_active().and_then(|t| t.getch_now()) {
        Some(c) => c as i32,
        None => -1,
    }
}

extern "C" fn sys_term_buffer() -> *mut u8 {
    match terminal::get_active() {
        Some(term) => term.textbuf().as_mut_ptr(),
        None => core::ptr::null_mut(),
    }
}

extern "C" fn sys_term_buffer_size() -> usize {
    match terminal::get_active() {
        Some(term) => term.textbuf_size(),
        None => 0,
    }
}

extern "C" fn sys_term_draw_text(s: *const c_char, col: i32, row: i32, fg: u8, bg: u8) {
    let Some(s) = (unsafe { cstr(s) }) else { return };
    if let Some(term) = terminal::get_active() {
        term.draw_text(s, col, row, fg, bg);
    }
}

/// Legacy apps write the screen buffer directly and then call this to
/// repaint the owning terminal.
extern "C" fn sys_term_invalidate() {
    if let Some(term) = terminal::get_active() {
        window::invalidate(term.hwnd);
    }
}

extern "C" fn sys_wm_create(
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    title: *const c_char,
    style: u16,
    event_cb: usize,
    paint_cb: usize,
) -> Hwnd {
    let title = unsafe { cstr(title) }.unwrap_or("");
    let style = rookos_abi::window::WindowFlags::from_bits_truncate(style);
    // SAFETY: application shims are generated against the handler ABI.
    let event_handler: Option<window::EventHandler> = if event_cb == 0 {
        None
    } else {
        Some(unsafe { core::mem::transmute::<usize, window::EventHandler>(event_cb) })
    };
    let paint_handler: Option<window::PaintHandler> = if paint_cb == 0 {
        None
    } else {
        Some(unsafe { core::mem::transmute::<usize, window::PaintHandler>(paint_cb) })
    };
    window::create_window(x, y, w, h, title, style, event_handler, paint_handler)
}

extern "C" fn sys_wm_destroy(hwnd: Hwnd) {
    window::destroy_window(hwnd);
}

extern "C" fn sys_wm_invalidate(hwnd: Hwnd) {
    window::invalidate(hwnd);
}

extern "C" fn sys_wm_set_title(hwnd: Hwnd, title: *const c_char) {
    let Some(title) = (unsafe { cstr(title) }) else {
        return;
    };
    window::set_title(hwnd, title);
}

extern "C" fn sys_wm_post_event(hwnd: Hwnd, event: *const rookos_abi::event::WindowEvent) -> i32 {
    if event.is_null() {
        return -1;
    }
    // SAFETY: event records are plain data per the ABI.
    let event = unsafe { *event };
    if event::post(hwnd, event) { 0 } else { -1 }
}

fn sys_table_init_wm() {
    sys_table_register(slots::SYS_TERM_PUTC, sys_term_putc as *const () as usize);
    sys_table_register(slots::SYS_TERM_PUTS, sys_term_puts as *const () as usize);
    sys_table_register(slots::SYS_TERM_PRINTF, sys_term_puts as *const () as usize);
    sys_table_register(slots::SYS_TERM_CLEAR, sys_term_clear as *const () as usize);
    sys_table_register(slots::SYS_TERM_SET_CURSOR, sys_term_set_cursor as *const () as usize);
    sys_table_register(slots::SYS_TERM_SET_COLOR, sys_term_set_color as *const () as usize);
    sys_table_register(slots::SYS_TERM_GETCH, sys_term_getch as *const () as usize);
    sys_table_register(slots::SYS_TERM_GETCH_NOW, sys_term_getch_now as *const () as usize);
    sys_table_register(slots::SYS_TERM_BUFFER, sys_term_buffer as *const () as usize);
    sys_table_register(slots::SYS_TERM_BUFFER_SIZE, sys_term_buffer_size as *const () as usize);
    sys_table_register(slots::SYS_TERM_DRAW_TEXT, sys_term_draw_text as *const () as usize);
    sys_table_register(slots::SYS_TERM_INVALIDATE, sys_term_invalidate as *const () as usize);
    sys_table_register(slots::SYS_WM_CREATE, sys_wm_create as *const () as usize);
    sys_table_register(slots::SYS_WM_DESTROY, sys_wm_destroy as *const () as usize);
    sys_table_register(slots::SYS_WM_INVALIDATE, sys_wm_invalidate as *const () as usize);
    sys_table_register(slots::SYS_WM_SET_TITLE, sys_wm_set_title as *const () as usize);
    sys_table_register(slots::SYS_WM_POST_EVENT, sys_wm_post_event as *const () as usize);
}
