use parking_lot::Mutex;
use std::io::{self, Write};

use crate::colors::*;

/// Output sink for the whole pipeline. The engine only ever talks to this
/// trait, so a silent reporter and the console reporter must be
/// interchangeable without changing behavior.
pub trait Reporter: Sync {
    fn step(&self, current: usize, total: usize, message: &str);
    /// Transient activity line, rewritten in place. May be dropped entirely.
    fn progress(&self, kind: &str, detail: &str);
    fn log(&self, message: &str);
    fn success(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    /// Settle the transient line before the process exits or output switches
    /// to plain printing.
    fn finish(&self);
}

/// Swallows everything. Used by tests and by library callers that do their
/// own reporting.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn step(&self, _current: usize, _total: usize, _message: &str) {}
    fn progress(&self, _kind: &str, _detail: &str) {}
    fn log(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn finish(&self) {}
}

#[derive(Debug)]
struct LineState {
    last_len: usize,
}

/// Console output. Progress lines are transient and rewritten in place;
/// warnings and errors clear the line first so they stay visible in the
/// scrollback.
#[derive(Debug)]
pub struct ConsoleReporter {
    line: Mutex<LineState>,
    no_progress: bool,
}

impl ConsoleReporter {
    pub fn new(no_progress: bool) -> ConsoleReporter {
        ConsoleReporter {
            line: Mutex::new(LineState { last_len: 0 }),
            no_progress,
        }
    }

    fn clear_line(&self) {
        let mut state = self.line.lock();
        if state.last_len == 0 {
            return;
        }
        print!("\r{}\r", " ".repeat(state.last_len));
        io::stdout().flush().ok();
        state.last_len = 0;
    }
}

impl Reporter for ConsoleReporter {
    fn step(&self, current: usize, total: usize, message: &str) {
        self.clear_line();
        println!("{C_GRAY}[{current}/{total}]{C_RESET} {message}...");
    }

    fn progress(&self, kind: &str, detail: &str) {
        if self.no_progress {
            return;
        }
        let message = format_status(kind, detail);
        let mut state = self.line.lock();
        let plain_len = visible_len(&message);
        let pad = state.last_len.saturating_sub(plain_len);
        let mut out = io::stdout();
        write!(out, "\r{}{}", message, " ".repeat(pad)).ok();
        out.flush().ok();
        state.last_len = plain_len;
    }

    fn log(&self, message: &str) {
        self.clear_line();
        println!("{message}");
    }

    fn success(&self, message: &str) {
        self.clear_line();
        println!("{C_GREEN}success{C_RESET} {message}");
    }

    fn warn(&self, message: &str) {
        self.clear_line();
        eprintln!("{C_YELLOW}warning{C_RESET} {message}");
    }

    fn error(&self, message: &str) {
        self.clear_line();
        eprintln!("{C_RED}error{C_RESET} {message}");
    }

    fn finish(&self) {
        let mut state = self.line.lock();
        if state.last_len > 0 {
            println!();
            state.last_len = 0;
        }
    }
}

fn format_status(kind: &str, detail: &str) -> String {
    let (color, action) = match kind {
        "resolving" => (C_CYAN, "resolving"),
        "fetching" => (C_CYAN, "fetching"),
        "extracting" => (C_MAGENTA, "extracting"),
        "verifying" => (C_MAGENTA, "verifying"),
        "linking" => (C_GREEN, "linking"),
        _ => (C_DIM, kind),
    };
    format!("{C_GRAY}[quarry]{C_RESET} {color}{action}{C_RESET} {detail}")
}

/// Length once ANSI escapes are stripped, so padding math matches what the
/// terminal actually shows.
fn visible_len(s: &str) -> usize {
    let mut len = 0usize;
    let mut in_escape = false;
    for ch in s.chars() {
        if in_escape {
            if ch == 'm' {
                in_escape = false;
            }
            continue;
        }
        if ch == '\u{1b}' {
            in_escape = true;
            continue;
        }
        len += 1;
    }
    len
}
