//! Terminal windows.
//!
//! Each terminal owns a 70x20 character grid whose bytes double as the
//! legacy screen buffer: every console API writes the same cells the
//! compositor paints, so there is no save/restore copy path. Cells are
//! two bytes, character then `(bg << 4) | fg`.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use rookos_abi::color::{self, COLOR_BLACK, COLOR_LIGHT_GRAY, pack_attr};
use rookos_abi::event::{WindowEvent, scancode};
use rookos_abi::task::{PRIORITY_MAX, TLS_SLOT_TERMINAL};
use rookos_abi::window::{HWND_NULL, Hwnd, WindowFlags};
use rookos_lib::services::task;
use rookos_lib::{RingBuffer, SchedMutex, Semaphore};
use rookos_video as video;

use crate::menu::{self, Menu, MenuItem};
use crate::theme;
use crate::window;

pub const TERM_COLS: usize = 70;
pub const TERM_ROWS: usize = 20;
pub const TERM_FONT_W: i32 = 8;
pub const TERM_FONT_H: i32 = 16;
pub const TERM_TEXTBUF_SIZE: usize = TERM_COLS * TERM_ROWS * 2;

const INPUT_RING: usize = 64;
const PRINTF_BUF: usize = 256;

pub const CMD_NEW_TERMINAL: u16 = 0x10;
pub const CMD_CLOSE: u16 = 0x11;

static TERMINAL_MENUS: [Menu; 1] = [Menu {
    title: "Terminal",
    accel: b't',
    items: &[
        MenuItem { label: "New Terminal", command: CMD_NEW_TERMINAL },
        MenuItem { label: "Close", command: CMD_CLOSE },
    ],
}];

pub struct Terminal {
    /// The grid, aliased as the legacy console screen buffer.
    textbuf: Vec<u8>,
    pub cursor_col: i32,
    pub cursor_row: i32,
    fg: u8,
    bg: u8,
    cursor_visible: bool,
    input: SchedMutex<RingBuffer<u8, INPUT_RING>>,
    input_sem: Semaphore,
    pub hwnd: Hwnd,
    /// Set by the WM_CLOSE handler; the shell task observes it, tears
    /// down, and exits.
    pub closing: AtomicBool,

    // Legacy keyboard surface: applications may install raw handlers
    // that intercept input before the ring, and a one-character slot
    // some console calls peek at.
    scancode_handler: Option<fn(u8) -> bool>,
    char_handler: Option<fn(u8) -> bool>,
    pub transient_char: Option<u8>,
}

impl Terminal {
    fn new() -> Self {
        let mut textbuf = Vec::new();
        textbuf.resize(TERM_TEXTBUF_SIZE, 0);
        let mut t = Self {
            textbuf,
            cursor_col: 0,
            cursor_row: 0,
            fg: COLOR_LIGHT_GRAY,
            bg: COLOR_BLACK,
            cursor_visible: true,
            input: SchedMutex::new(RingBuffer::new_with(0)),
            input_sem: Semaphore::new(),
            hwnd: HWND_NULL,
            closing: AtomicBool::new(false),
            scancode_handler: None,
            char_handler: None,
            transient_char: None,
        };
        t.clear(COLOR_BLACK);
        t
    }

    #[inline]
    fn cell_offset(col: i32, row: i32) -> usize {
        (row as usize * TERM_COLS + col as usize) * 2
    }

    fn put_cell(&mut self, col: i32, row: i32, ch: u8, attr: u8) {
        if (0..TERM_COLS as i32).contains(&col) && (0..TERM_ROWS as i32).contains(&row) {
            let off = Self::cell_offset(col, row);
            self.textbuf[off] = ch;
            self.textbuf[off + 1] = attr;
        }
    }

    fn scroll_up(&mut self) {
        self.textbuf.copy_within(TERM_COLS * 2.., 0);
        let attr = pack_attr(self.fg, self.bg);
        let last = TERM_COLS * 2 * (TERM_ROWS - 1);
        for col in 0..TERM_COLS {
            self.textbuf[last + col * 2] = b' ';
            self.textbuf[last + col * 2 + 1] = attr;
        }
    }

    /// Console output with the classic control characters: newline,
    /// carriage return, backspace, tab to the next multiple of 8.
    pub fn putc(&mut self, c: u8) {
        let attr = pack_attr(self.fg, self.bg);
        match c {
            b'\n' => {
                self.cursor_col = 0;
                self.cursor_row += 1;
            }
            b'\r' => self.cursor_col = 0,
            0x08 => {
                if self.cursor_col > 0 {
                    self.cursor_col -= 1;
                    self.put_cell(self.cursor_col, self.cursor_row, b' ', attr);
                }
            }
            b'\t' => {
                self.cursor_col = (self.cursor_col / 8 + 1) * 8;
                if self.cursor_col >= TERM_COLS as i32 {
                    self.cursor_col = 0;
                    self.cursor_row += 1;
                }
            }
            c if c >= 0x20 => {
                self.put_cell(self.cursor_col, self.cursor_row, c, attr);
                self.cursor_col += 1;
                if self.cursor_col >= TERM_COLS as i32 {
                    self.cursor_col = 0;
                    self.cursor_row += 1;
                }
            }
            _ => {}
        }
        if self.cursor_row >= TERM_ROWS as i32 {
            self.scroll_up();
            self.cursor_row = TERM_ROWS as i32 - 1;
        }
        window::invalidate(self.hwnd);
    }

    pub fn puts(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.putc(b);
        }
    }

    /// Bounded printf through a stack buffer.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) {
        struct Buf {
            data: [u8; PRINTF_BUF],
            len: usize,
        }
        impl Write for Buf {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                let n = s.len().min(self.data.len() - self.len);
                self.data[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
                self.len += n;
                Ok(())
            }
        }
        let mut buf = Buf { data: [0; PRINTF_BUF], len: 0 };
        let _ = buf.write_fmt(args);
        for i in 0..buf.len {
            self.putc(buf.data[i]);
        }
    }

    /// Fill the grid with spaces on the chosen background and home the
    /// cursor.
    pub fn clear(&mut self, bg: u8) {
        self.bg = bg;
        let attr = pack_attr(self.fg, bg);
        for cell in 0..TERM_COLS * TERM_ROWS {
            self.textbuf[cell * 2] = b' ';
            self.textbuf[cell * 2 + 1] = attr;
        }
        self.cursor_col = 0;
        self.cursor_row = 0;
        window::invalidate(self.hwnd);
    }

    pub fn set_cursor(&mut self, col: i32, row: i32) {
        self.cursor_col = col.clamp(0, TERM_COLS as i32 - 1);
        self.cursor_row = row.clamp(0, TERM_ROWS as i32 - 1);
        window::invalidate(self.hwnd);
    }

    pub fn set_color(&mut self, fg: u8, bg: u8) {
        self.fg = fg & 0x0F;
        self.bg = bg & 0x0F;
    }

    /// Direct grid write without moving the logical cursor.
    pub fn draw_text(&mut self, s: &str, col: i32, row: i32, fg: u8, bg: u8) {
        let attr = pack_attr(fg, bg);
        for (i, &b) in s.as_bytes().iter().enumerate() {
            self.put_cell(col + i as i32, row, b, attr);
        }
        window::invalidate(self.hwnd);
    }

    pub fn push_input(&self, ch: u8) {
        let pushed = self.input.with(|ring| ring.try_push(ch));
        if pushed {
            self.input_sem.give();
        }
    }

    /// Blocking read from the input ring.
    pub fn getch(&self) -> u8 {
        loop {
            self.input_sem.take();
            if let Some(ch) = self.input.with(|ring| ring.try_pop()) {
                return ch;
            }
            if self.closing.load(Ordering::Acquire) {
                return b'\n';
            }
        }
    }

    /// Non-blocking read.
    pub fn getch_now(&self) -> Option<u8> {
        if self.input_sem.try_take() {
            self.input.with(|ring| ring.try_pop())
        } else {
            None
        }
    }

    pub fn textbuf(&mut self) -> &mut [u8] {
        &mut self.textbuf
    }

    pub fn textbuf_size(&self) -> usize {
        TERM_TEXTBUF_SIZE
    }

    /// Install (or clear) a raw scancode interceptor. A handler
    /// returning true consumes the key before the input ring sees it.
    pub fn set_scancode_handler(&mut self, handler: Option<fn(u8) -> bool>) {
        self.scancode_handler = handler;
    }

    /// Install (or clear) a character interceptor.
    pub fn set_char_handler(&mut self, handler: Option<fn(u8) -> bool>) {
        self.char_handler = handler;
    }

    /// Drop any installed interceptors; called when an application
    /// exits so stale handlers cannot outlive their image.
    pub fn reset_handlers(&mut self) {
        self.scancode_handler = None;
        self.char_handler = None;
        self.transient_char = None;
    }
}

// ---------------------------------------------------------------------------
// Window glue
// ---------------------------------------------------------------------------

pub fn from_hwnd(hwnd: Hwnd) -> Option<&'static mut Terminal> {
    let ptr = window::user_data(hwnd) as *mut Terminal;
    if ptr.is_null() {
        None
    } else {
        // SAFETY: the pointer was installed by `create` and lives until
        // `destroy`.
        Some(unsafe { &mut *ptr })
    }
}

fn terminal_event(hwnd: Hwnd, event: &WindowEvent) -> bool {
    let Some(term) = from_hwnd(hwnd) else {
        return false;
    };
    match *event {
        WindowEvent::Char { ch, .. } => {
            if let Some(handler) = term.char_handler {
                if handler(ch) {
                    return true;
                }
            }
            term.push_input(ch);
            true
        }
        WindowEvent::KeyDown { scancode: sc, .. } => {
            if let Some(handler) = term.scancode_handler {
                if handler(sc) {
                    return true;
                }
            }
            match sc {
                scancode::KEY_ENTER => term.push_input(b'\n'),
                scancode::KEY_BACKSPACE => term.push_input(0x08),
                scancode::KEY_TAB => term.push_input(b'\t'),
                _ => return false,
            }
            true
        }
        WindowEvent::Timer { id: 1 } => {
            term.cursor_visible = !term.cursor_visible;
            window::invalidate(hwnd);
            true
        }
        WindowEvent::Close => {
            term.closing.store(true, Ordering::Release);
            // Unblock a shell stuck in getch.
            term.input_sem.give();
            true
        }
        WindowEvent::Command { id: CMD_NEW_TERMINAL } => {
            spawn_terminal_window();
            true
        }
        WindowEvent::Command { id: CMD_CLOSE } => {
            term.closing.store(true, Ordering::Release);
            term.input_sem.give();
            true
        }
        _ => false,
    }
}

fn terminal_paint(hwnd: Hwnd) {
    let Some(term) = from_hwnd(hwnd) else { return };
    let Some(win) = window::window_snapshot(hwnd) else {
        return;
    };
    let origin = theme::client_origin(&win.frame, win.flags);

    for row in 0..TERM_ROWS {
        let sy = origin.y + row as i32 * TERM_FONT_H;
        if sy + TERM_FONT_H <= 0 || sy >= video::DISPLAY_HEIGHT {
            continue;
        }
        for col in 0..TERM_COLS {
            let sx = origin.x + col as i32 * TERM_FONT_W;
            if sx + TERM_FONT_W <= 0 || sx >= video::DISPLAY_WIDTH {
                continue;
            }
            let off = (row * TERM_COLS + col) * 2;
            let ch = term.textbuf[off];
            let attr = term.textbuf[off + 1];
            let glyph = rookos_gfx::glyph_for(ch);

            if sx & 1 == 0
                && sx >= 0
                && sx + TERM_FONT_W <= video::DISPLAY_WIDTH
                && sy >= 0
                && sy + TERM_FONT_H <= video::DISPLAY_HEIGHT
            {
                video::blit_glyph_8wide(sx, sy, glyph, color::attr_fg(attr), color::attr_bg(attr));
            } else {
                for (r, &bits) in glyph.iter().enumerate() {
                    for c in 0..TERM_FONT_W {
                        let color = if bits & (1 << c) != 0 {
                            color::attr_fg(attr)
                        } else {
                            color::attr_bg(attr)
                        };
                        video::set_pixel(sx + c, sy + r as i32, color);
                    }
                }
            }
        }
    }

    // DOS-style underline cursor on the bottom two scanlines.
    if term.cursor_visible
        && (0..TERM_COLS as i32).contains(&term.cursor_col)
        && (0..TERM_ROWS as i32).contains(&term.cursor_row)
    {
        let cx = origin.x + term.cursor_col * TERM_FONT_W;
        let cy = origin.y + term.cursor_row * TERM_FONT_H;
        video::hline_safe(cx, cy + TERM_FONT_H - 2, TERM_FONT_W, term.fg);
        video::hline_safe(cx, cy + TERM_FONT_H - 1, TERM_FONT_W, term.fg);
    }
}

/// Create a terminal window sized to the grid. Returns the window
/// handle; the terminal rides in the window's user data.
pub fn create() -> Hwnd {
    let client_w = TERM_COLS as i32 * TERM_FONT_W;
    let client_h = TERM_ROWS as i32 * TERM_FONT_H;
    let w = client_w + 2 * theme::BORDER_WIDTH;
    let h = client_h + 2 * theme::BORDER_WIDTH + theme::TITLE_HEIGHT + theme::MENUBAR_HEIGHT;

    let hwnd = window::create_window(
        30,
        20,
        w,
        h,
        "Terminal",
        WindowFlags::STYLE_DEFAULT | WindowFlags::MENUBAR,
        Some(terminal_event),
        Some(terminal_paint),
    );
    if hwnd == HWND_NULL {
        return HWND_NULL;
    }

    let term = Box::leak(Box::new(Terminal::new()));
    term.hwnd = hwnd;
    window::set_user_data(hwnd, term as *mut Terminal as *mut ());
    menu::set_menu_bar(hwnd, &TERMINAL_MENUS);
    window::set_focus(hwnd);
    hwnd
}

/// Tear a terminal down: window slot freed, the grid and ring released.
pub fn destroy(term: &'static mut Terminal) {
    let hwnd = term.hwnd;
    window::set_user_data(hwnd, core::ptr::null_mut());
    window::destroy_window(hwnd);
    // SAFETY: created by Box::leak in `create`; the window no longer
    // references it.
    drop(unsafe { Box::from_raw(term as *mut Terminal) });
}

// ---------------------------------------------------------------------------
// Per-task routing
// ---------------------------------------------------------------------------

pub fn set_task_terminal(term: *mut Terminal) {
    task::tls_set(TLS_SLOT_TERMINAL, term as *mut ());
}

fn task_terminal() -> Option<&'static mut Terminal> {
    let ptr = task::tls_get(TLS_SLOT_TERMINAL) as *mut Terminal;
    if ptr.is_null() {
        None
    } else {
        // SAFETY: installed by the owning task; valid until destroy.
        Some(unsafe { &mut *ptr })
    }
}

/// The terminal console calls should land on: the task's TLS binding
/// first, the focused window's terminal otherwise.
pub fn get_active() -> Option<&'static mut Terminal> {
    if let Some(term) = task_terminal() {
        return Some(term);
    }
    from_hwnd(window::get_focus())
}

/// Bind a spawned task to its context's terminal by window handle;
/// registered with the process runtime.
pub fn bind_task_terminal(hwnd: Hwnd) {
    if let Some(term) = from_hwnd(hwnd) {
        set_task_terminal(term as *mut Terminal);
    }
}

/// Open a terminal window with its own shell task.
pub fn spawn_terminal_window() {
    let hwnd = create();
    if hwnd == HWND_NULL {
        return;
    }
    task::spawn(crate::shell::shell_task, hwnd as usize, PRIORITY_MAX, "shell");
}
