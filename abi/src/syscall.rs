//! System-call table slot numbers.
//!
//! Loaded applications reach the OS through a function-pointer table at a
//! fixed address; each shim indexes the table with one of these
//! constants. Slot numbers are a stable public contract: new services
//! are appended, existing numbers never change or move, removal is a
//! breaking change.

// Task services.
pub const SYS_TASK_SPAWN: usize = 0;
pub const SYS_TASK_EXIT: usize = 1;
pub const SYS_TASK_SLEEP_MS: usize = 2;
pub const SYS_TASK_YIELD: usize = 3;
pub const SYS_CLOCK_MS: usize = 4;

// Console / terminal.
pub const SYS_TERM_PUTC: usize = 5;
pub const SYS_TERM_PUTS: usize = 6;
pub const SYS_TERM_PRINTF: usize = 7;
pub const SYS_TERM_CLEAR: usize = 8;
pub const SYS_TERM_SET_CURSOR: usize = 9;
pub const SYS_TERM_SET_COLOR: usize = 10;
pub const SYS_TERM_GETCH: usize = 11;
pub const SYS_TERM_GETCH_NOW: usize = 12;
pub const SYS_TERM_BUFFER: usize = 13;
pub const SYS_TERM_BUFFER_SIZE: usize = 14;
pub const SYS_TERM_DRAW_TEXT: usize = 15;
pub const SYS_TERM_INVALIDATE: usize = 16;

// Memory.
pub const SYS_MALLOC: usize = 17;
pub const SYS_CALLOC: usize = 18;
pub const SYS_REALLOC: usize = 19;
pub const SYS_FREE: usize = 20;

// POSIX file layer.
pub const SYS_OPENAT: usize = 21;
pub const SYS_CLOSE: usize = 22;
pub const SYS_READ: usize = 23;
pub const SYS_WRITE: usize = 24;
pub const SYS_LSEEK: usize = 25;
pub const SYS_FSTATAT: usize = 26;
pub const SYS_UNLINKAT: usize = 27;
pub const SYS_MKDIRAT: usize = 28;
pub const SYS_RENAMEAT: usize = 29;
pub const SYS_LINKAT: usize = 30;
pub const SYS_SYMLINKAT: usize = 31;
pub const SYS_READLINKAT: usize = 32;
pub const SYS_DUP: usize = 33;
pub const SYS_DUP2: usize = 34;
pub const SYS_FCNTL: usize = 35;
pub const SYS_GETCWD: usize = 36;
pub const SYS_CHDIR: usize = 37;
pub const SYS_UMASK: usize = 38;

// Process runtime.
pub const SYS_SPAWN: usize = 39;
pub const SYS_EXECVE: usize = 40;
pub const SYS_WAITPID: usize = 41;
pub const SYS_KILL: usize = 42;
pub const SYS_SIGNAL: usize = 43;
pub const SYS_SIGPROCMASK: usize = 44;
pub const SYS_GETPID: usize = 45;
pub const SYS_GETPPID: usize = 46;
pub const SYS_SETPGID: usize = 47;
pub const SYS_GETPGID: usize = 48;
pub const SYS_SETSID: usize = 49;
pub const SYS_GETENV: usize = 50;
pub const SYS_EXIT: usize = 51;

// Window manager.
pub const SYS_WM_CREATE: usize = 52;
pub const SYS_WM_DESTROY: usize = 53;
pub const SYS_WM_INVALIDATE: usize = 54;
pub const SYS_WM_SET_TITLE: usize = 55;
pub const SYS_WM_POST_EVENT: usize = 56;

// Appended services.
pub const SYS_PIPE: usize = 57;

/// Current table length. Appending a service bumps this; nothing else
/// about existing slots may change.
pub const SYS_TABLE_LEN: usize = 64;

/// Table version reported to applications via the API-version handshake.
pub const M_API_VERSION: i32 = 4;
pub const MIN_API_VERSION: i32 = 3;
