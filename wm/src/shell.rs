//! The built-in shell. One task per terminal window.
//!
//! Builtins run in the shell task; anything else resolves to an ELF on
//! the volume and runs through the loader in this same task. When the
//! exiting app has chained a follow-on command the chain runs in a
//! loop, and afterwards the original command is re-run once, matching
//! the legacy command-processor behavior.

use alloc::borrow::ToOwned;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use rookos_abi::color::COLOR_BLACK;
use rookos_abi::window::Hwnd;
use rookos_lib::services::task;
use rookos_lib::{klog_debug, services};
use rookos_mm::ctx_alloc;

use rookos_core::context::{self, Context, Stage, set_current_ctx};
use rookos_core::elf;
use rookos_core::process::{self, FileAction, SpawnAttr};
use rookos_core::posix;
use rookos_fs::fat;
use rookos_fs::fileio;

use crate::terminal::{self, Terminal};

const SHELL_MAX_LINE: usize = 256;
const SHELL_MAX_ARGS: usize = 16;

struct Shell {
    term: &'static mut Terminal,
    ctx: &'static mut Context,
    tmpdir: String,
}

macro_rules! tprint {
    ($shell:expr, $($arg:tt)*) => {
        $shell.term.printf(format_args!($($arg)*))
    };
}

// ---------------------------------------------------------------------------
// Line input and tokenizing
// ---------------------------------------------------------------------------

fn readline(term: &mut Terminal, buf: &mut [u8; SHELL_MAX_LINE]) -> usize {
    let mut pos = 0usize;
    loop {
        if term.closing.load(Ordering::Acquire) {
            return 0;
        }
        let ch = term.getch();
        match ch {
            b'\n' | b'\r' => {
                term.putc(b'\n');
                return pos;
            }
            0x08 | 0x7F => {
                if pos > 0 {
                    pos -= 1;
                    term.putc(0x08);
                }
            }
            c if c >= 0x20 && pos < SHELL_MAX_LINE - 1 => {
                buf[pos] = c;
                pos += 1;
                term.putc(c);
            }
            _ => {}
        }
    }
}

/// One parsed command line: pipe segments plus the detached marker.
pub(crate) struct CommandLine {
    pub(crate) segments: Vec<Vec<String>>,
    pub(crate) detached: bool,
}

/// Tokenize: whitespace-separated words, double-quoted runs preserved,
/// `|` splits segments, a trailing `&` detaches.
pub(crate) fn tokenize(line: &str) -> CommandLine {
    let mut segments: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut in_quotes = false;

    let flush_word = |word: &mut String, current: &mut Vec<String>| {
        if !word.is_empty() {
            if current.len() < SHELL_MAX_ARGS {
                current.push(core::mem::take(word));
            } else {
                word.clear();
            }
        }
    };

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '|' if !in_quotes => {
                flush_word(&mut word, &mut current);
                segments.push(core::mem::take(&mut current));
            }
            c if c.is_whitespace() && !in_quotes => flush_word(&mut word, &mut current),
            c => word.push(c),
        }
    }
    flush_word(&mut word, &mut current);

    let mut detached = false;
    if current.last().map(String::as_str) == Some("&") {
        current.pop();
        detached = true;
    }
    segments.push(current);
    segments.retain(|s| !s.is_empty());
    CommandLine { segments, detached }
}

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

fn cmd_help(shell: &mut Shell) {
    shell.term.puts("Built-in commands:\n");
    shell.term.puts("  ls [dir]   - list files\n");
    shell.term.puts("  cd <dir>   - change directory\n");
    shell.term.puts("  pwd        - print working directory\n");
    shell.term.puts("  clear      - clear screen\n");
    shell.term.puts("  echo ...   - print arguments\n");
    shell.term.puts("  free       - show heap info\n");
    shell.term.puts("  mount      - retry SD card mount\n");
    shell.term.puts("  help       - this message\n");
    shell.term.puts("  reboot     - reboot system\n");
    shell.term.puts("\nOther commands run as ELF apps from the volume.\n");
}

fn cmd_free(shell: &mut Shell) {
    let (heap_total, heap_free, psram_total, psram_free) = ctx_alloc::heap_stats();
    let used_pct = if heap_total > 0 {
        (heap_total - heap_free) * 100 / heap_total
    } else {
        0
    };
    tprint!(shell, "Heap: {} / {} bytes free ({}% used)\n", heap_free, heap_total, used_pct);
    if psram_total > 0 {
        tprint!(shell, "PSRAM: {} / {} bytes free\n", psram_free, psram_total);
    } else {
        shell.term.puts("PSRAM: not present\n");
    }
}

/// One `ls` row: directories bracketed, files with a padded size
/// column.
pub fn format_ls_entry(entry: &fat::FatDirEntry) -> String {
    if entry.attr.contains(fat::FatAttr::DIR) {
        format!("  [{}]\n", entry.name)
    } else {
        format!("  {:<24}{}\n", entry.name, entry.size)
    }
}

fn cmd_ls(shell: &mut Shell, args: &[String]) {
    if !fat::is_mounted() {
        shell.term.puts("No SD card\n");
        return;
    }
    let path = match args.get(1) {
        Some(p) => p.clone(),
        None => shell.ctx.cwd().to_owned(),
    };
    let dirfd = match posix::opendir(&path) {
        Ok(fd) => fd,
        Err(e) => {
            tprint!(shell, "Cannot open '{}' ({})\n", path, e);
            return;
        }
    };
    let mut count = 0usize;
    while let Ok(Some(entry)) = posix::readdir(dirfd) {
        let row = format_ls_entry(&entry);
        shell.term.puts(&row);
        count += 1;
    }
    let _ = posix::closedir(dirfd);
    tprint!(shell, "{} item(s)\n", count);
}

fn cmd_cd(shell: &mut Shell, args: &[String]) {
    let Some(dir) = args.get(1) else {
        shell.term.puts("Usage: cd <directory>\n");
        return;
    };
    if !fat::is_mounted() {
        shell.term.puts("No SD card\n");
        return;
    }
    if let Err(e) = posix::chdir(dir) {
        tprint!(shell, "Cannot open '{}' ({})\n", dir, e);
    }
}

fn cmd_pwd(shell: &mut Shell) {
    let cwd = shell.ctx.cwd().to_owned();
    tprint!(shell, "{}\n", cwd);
}

fn cmd_echo(shell: &mut Shell, args: &[String]) {
    for (i, arg) in args.iter().skip(1).enumerate() {
        if i > 0 {
            shell.term.putc(b' ');
        }
        shell.term.puts(arg);
    }
    shell.term.putc(b'\n');
}

fn cmd_mount(shell: &mut Shell) {
    if fat::is_mounted() {
        shell.term.puts("SD card already mounted\n");
        return;
    }
    shell.term.puts("Mounting SD card...\n");
    if fat::try_mount() {
        shell.term.puts("SD card mounted OK\n");
    } else {
        shell.term.puts("Mount failed\n");
    }
}

fn cmd_reboot(shell: &mut Shell) -> ! {
    shell.term.puts("Rebooting...\n");
    services::board_reboot()
}

// ---------------------------------------------------------------------------
// ELF execution
// ---------------------------------------------------------------------------

/// Search CWD, then `BASE`, then every `PATH` entry for the named
/// command. Returns the resolved absolute path.
fn find_executable(ctx: &Context, name: &str) -> Option<String> {
    let volume = fat::volume()?;
    let try_path = |p: &str| -> Option<String> {
        let resolved = posix::resolve_in(ctx, rookos_abi::fs::AT_FDCWD, p, true).ok()?;
        volume.stat(&resolved).ok().map(|_| resolved)
    };

    if name.contains('/') {
        return try_path(name);
    }
    let mut dirs: Vec<String> = Vec::new();
    dirs.push(ctx.cwd().to_owned());
    if let Some(base) = ctx.getenv("BASE") {
        dirs.push(base.to_owned());
    }
    if let Some(path_var) = ctx.getenv("PATH") {
        for dir in path_var.split(':') {
            if !dir.is_empty() {
                dirs.push(dir.to_owned());
            }
        }
    }
    for dir in dirs {
        let candidate = if dir.ends_with('/') {
            format!("{}{}", dir, name)
        } else {
            format!("{}/{}", dir, name)
        };
        if let Some(found) = try_path(&candidate) {
            return Some(found);
        }
    }
    None
}

/// Prepare the shell context for one run: argv and resolved command.
fn prepare_ctx(ctx: &mut Context, resolved: &str, argv: &[String]) {
    ctx.argv = argv.to_vec();
    ctx.orig_cmd = resolved.to_owned();
    ctx.set_stage(Stage::Found);
}

/// Load + run the context's command in this task. True when the image
/// ran (whatever its exit code).
fn load_and_run(shell: &mut Shell) -> bool {
    let Some(volume) = fat::volume() else {
        shell.term.puts("No SD card\n");
        return false;
    };
    if let Err(e) = elf::validate(volume, &shell.ctx.orig_cmd) {
        let cmd = shell.ctx.orig_cmd.clone();
        tprint!(shell, "'{}' is not a valid app: {}\n", cmd, e);
        shell.ctx.set_stage(Stage::Invalidated);
        return false;
    }
    shell.ctx.set_stage(Stage::Valid);
    match elf::load(volume, &shell.ctx.orig_cmd) {
        Ok(image) => {
            shell.ctx.image = Some(image);
            shell.ctx.set_stage(Stage::Load);
        }
        Err(e) => {
            let cmd = shell.ctx.orig_cmd.clone();
            tprint!(shell, "Failed to load '{}': {}\n", cmd, e);
            shell.ctx.set_stage(Stage::Invalidated);
            return false;
        }
    }
    process::exec_sync(shell.ctx);
    shell.ctx.image = None;
    // Stale input interceptors must not outlive the image.
    shell.term.reset_handlers();
    true
}

/// Run an external command with chain and re-run handling.
fn run_elf(shell: &mut Shell, argv: &[String]) {
    let Some(resolved) = find_executable(shell.ctx, &argv[0]) else {
        tprint!(shell, "'{}' not found\n", argv[0]);
        return;
    };
    let saved_cmd = argv[0].clone();
    prepare_ctx(shell.ctx, &resolved, argv);

    if !load_and_run(shell) {
        return;
    }

    loop {
        // The app may have chained a follow-on by re-preparing the
        // context before exiting.
        let mut had_chain = false;
        while shell.ctx.stage() == Stage::Prepared {
            had_chain = true;
            let chained = shell.ctx.orig_cmd.clone();
            let Some(volume) = fat::volume() else { break };
            let Some(resolved) = find_executable(shell.ctx, &chained) else {
                break;
            };
            // Non-ELF chain targets are skipped without diagnostics.
            if !elf::is_elf_file(volume, &resolved) {
                klog_debug!("chain: '{}' is not ELF, skipping", resolved);
                break;
            }
            shell.ctx.orig_cmd = resolved;
            if !load_and_run(shell) {
                break;
            }
        }

        if !had_chain {
            break;
        }

        // Chain over: re-run the original command once, after
        // repairing the context's pid slot and TLS binding.
        let ctx_ptr: *mut Context = &raw mut *shell.ctx;
        context::restore_ctx_slot(shell.ctx.pid, ctx_ptr);
        set_current_ctx(ctx_ptr);
        let Some(resolved) = find_executable(shell.ctx, &saved_cmd) else {
            break;
        };
        let rerun_argv = [saved_cmd.clone()];
        prepare_ctx(shell.ctx, &resolved, &rerun_argv);
        if !load_and_run(shell) {
            break;
        }
    }

    let code = shell.ctx.ret_code();
    if code != 0 {
        tprint!(shell, "Exit code: {}\n", code);
    }
}

/// Run a detached command (`... &`): spawned as a child of init, never
/// reaped by this shell.
fn run_detached(shell: &mut Shell, argv: &[String]) {
    let Some(resolved) = find_executable(shell.ctx, &argv[0]) else {
        tprint!(shell, "'{}' not found\n", argv[0]);
        return;
    };
    let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    match process::posix_spawn(&resolved, &[], &SpawnAttr::default(), &argv_refs, None) {
        Ok(pid) => {
            let _ = context::with_ctx(pid, |c| {
                c.parent_task = 0;
                c.ppid = 1;
                c.detached = true;
            });
            tprint!(shell, "[{}] detached\n", pid);
        }
        Err(e) => {
            tprint!(shell, "'{}' failed to start ({})\n", argv[0], e);
        }
    }
}

/// Run a pipe chain: one anonymous pipe per junction, every stage
/// spawned with its stdin/stdout re-pointed at the junction ends via
/// spawn-time dup2 actions, contexts linked through their pipeline
/// neighbors, then each stage reaped in order.
fn run_pipeline(shell: &mut Shell, segments: &[Vec<String>]) {
    let stage_count = segments.len();

    let mut junctions: Vec<(i32, i32)> = Vec::new();
    for _ in 1..stage_count {
        match fileio::pipe(&mut shell.ctx.fd_table) {
            Ok(ends) => junctions.push(ends),
            Err(e) => {
                tprint!(shell, "pipe failed ({})\n", e);
                close_junctions(shell, &junctions);
                return;
            }
        }
    }

    let mut spawned: Vec<i32> = Vec::new();
    let mut prev_pid = 0;
    for (i, segment) in segments.iter().enumerate() {
        let Some(resolved) = find_executable(shell.ctx, &segment[0]) else {
            tprint!(shell, "'{}' not found\n", segment[0]);
            break;
        };

        // Stage i reads from junction i-1 and writes junction i; every
        // other junction end is closed in the child.
        let mut actions: Vec<FileAction> = Vec::new();
        if i > 0 {
            actions.push(FileAction::Dup2 {
                src: junctions[i - 1].0,
                dst: 0,
            });
        }
        if i < stage_count - 1 {
            actions.push(FileAction::Dup2 {
                src: junctions[i].1,
                dst: 1,
            });
        }
        for &(read_fd, write_fd) in &junctions {
            actions.push(FileAction::Close { fd: read_fd });
            actions.push(FileAction::Close { fd: write_fd });
        }

        let argv_refs: Vec<&str> = segment.iter().map(String::as_str).collect();
        match process::posix_spawn(&resolved, &actions, &SpawnAttr::default(), &argv_refs, None) {
            Ok(pid) => {
                if prev_pid != 0 {
                    let _ = context::with_ctx(prev_pid, |c| c.next_pid = pid);
                    let _ = context::with_ctx(pid, |c| c.prev_pid = prev_pid);
                }
                prev_pid = pid;
                spawned.push(pid);
            }
            Err(e) => {
                tprint!(shell, "'{}' failed to start ({})\n", segment[0], e);
                break;
            }
        }
    }

    // The stages hold the junction ends they dup2'd; dropping the
    // shell's lets end-of-file propagate when a producer exits.
    close_junctions(shell, &junctions);

    for pid in spawned {
        let _ = process::waitpid(pid, 0);
    }
}

fn close_junctions(shell: &mut Shell, junctions: &[(i32, i32)]) {
    let volume = fat::volume();
    for &(read_fd, write_fd) in junctions {
        let _ = fileio::close(&mut shell.ctx.fd_table, volume, read_fd);
        let _ = fileio::close(&mut shell.ctx.fd_table, volume, write_fd);
    }
}

/// Chain hook for applications: re-prepare the current context with a
/// follow-on command line and mark it `Prepared`; the shell loop picks
/// it up after `main` returns.
pub fn prepare_chain(cmdline: &str) {
    let Some(ctx) = context::current_ctx() else {
        return;
    };
    let parsed = tokenize(cmdline);
    let Some(argv) = parsed.segments.first() else {
        return;
    };
    if argv.is_empty() {
        return;
    }
    ctx.argv = argv.clone();
    ctx.orig_cmd = argv[0].clone();
    ctx.set_stage(Stage::Prepared);
}

// ---------------------------------------------------------------------------
// Cleanup helpers
// ---------------------------------------------------------------------------

fn rm_rf(path: &str) {
    let Some(volume) = fat::volume() else { return };
    let mut children: Vec<(String, bool)> = Vec::new();
    let _ = volume.read_dir(path, &mut |e| {
        children.push((
            format!("{}/{}", path, e.name),
            e.attr.contains(fat::FatAttr::DIR),
        ));
    });
    for (child, is_dir) in children {
        if is_dir {
            rm_rf(&child);
        } else {
            let _ = volume.unlink(&child);
        }
    }
    let _ = volume.unlink(path);
}

// ---------------------------------------------------------------------------
// Shell task
// ---------------------------------------------------------------------------

fn dispatch(shell: &mut Shell, line: CommandLine) {
    if line.segments.is_empty() {
        return;
    }
    if line.detached {
        run_detached(shell, &line.segments[0]);
        return;
    }

    if line.segments.len() > 1 {
        run_pipeline(shell, &line.segments);
        return;
    }

    let argv = &line.segments[0];
    match argv[0].as_str() {
        "help" => cmd_help(shell),
        "clear" | "cls" => shell.term.clear(COLOR_BLACK),
        "free" => cmd_free(shell),
        "ls" | "dir" => cmd_ls(shell, argv),
        "cd" => cmd_cd(shell, argv),
        "pwd" => cmd_pwd(shell),
        "echo" => cmd_echo(shell, argv),
        "mount" => cmd_mount(shell),
        "reboot" => cmd_reboot(shell),
        _ => run_elf(shell, argv),
    }
}

/// Entry point for the per-terminal shell task. `arg` is the terminal's
/// window handle.
pub fn shell_task(arg: usize) {
    let hwnd = arg as Hwnd;
    let term_ptr: *mut Terminal = match terminal::from_hwnd(hwnd) {
        Some(t) => t,
        None => task::exit_current(),
    };
    terminal::set_task_terminal(term_ptr);
    // SAFETY: the terminal outlives this task; it is destroyed below,
    // after the loop, by this same task.
    let term = unsafe { &mut *term_ptr };

    let mut ctx = alloc::boxed::Box::new(Context::new());
    ctx.term = hwnd;
    ctx.task = task::current();
    let pid = context::insert_ctx(ctx);
    let ctx_ptr = context::with_ctx(pid, |c| {
        c.pgid = c.pid;
        c.sid = c.pid;
        c as *mut Context
    });
    let Some(ctx_ptr) = ctx_ptr else {
        task::exit_current();
    };
    set_current_ctx(ctx_ptr);
    // SAFETY: the context stays in the table for the life of this task.
    let ctx = unsafe { &mut *ctx_ptr };

    // Per-shell temp directory and default environment.
    let tmpdir = format!("/tmp/{}", pid);
    if let Some(volume) = fat::volume() {
        let _ = volume.mkdir("/tmp");
        let _ = volume.mkdir(&tmpdir);
    }
    ctx.setenv("CD", "/");
    ctx.setenv("BASE", "/");
    ctx.setenv("PATH", "/bin");
    ctx.setenv("TEMP", &tmpdir);

    let mut shell = Shell { term, ctx, tmpdir };

    shell.term.puts("rookOS\n");
    if fat::is_mounted() {
        shell.term.puts("Volume: mounted\n");
    } else {
        shell.term.puts("Volume: not mounted\n");
    }
    shell.term.puts("Type 'help' for commands.\n\n");

    let mut line_buf = [0u8; SHELL_MAX_LINE];
    loop {
        if shell.term.closing.load(Ordering::Acquire) {
            break;
        }
        let cwd = shell.ctx.cwd().to_owned();
        tprint!(shell, "{}> ", cwd);

        let len = readline(shell.term, &mut line_buf);
        if shell.term.closing.load(Ordering::Acquire) {
            break;
        }
        if len == 0 {
            continue;
        }
        let Ok(line) = core::str::from_utf8(&line_buf[..len]) else {
            continue;
        };
        let parsed = tokenize(line);
        dispatch(&mut shell, parsed);

        // The exec cycle may have cleared this shell's pid slot.
        context::restore_ctx_slot(pid, ctx_ptr);
        set_current_ctx(ctx_ptr);
    }

    // Terminal closed: remove the temp tree, drop the context, tear the
    // terminal down.
    let tmpdir = shell.tmpdir.clone();
    rm_rf(&tmpdir);
    set_current_ctx(core::ptr::null_mut());
    context::remove_ctx(pid);
    if let Some(term) = terminal::from_hwnd(hwnd) {
        terminal::destroy(term);
    }
    task::exit_current();
}
