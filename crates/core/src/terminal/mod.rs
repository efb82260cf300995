use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{PlayerError, Result};

pub const HIDE_CURSOR: &[u8] = b"\x1b[?25l";
pub const SHOW_CURSOR: &[u8] = b"\x1b[?25h";
pub const CLEAR_SCREEN: &[u8] = b"\x1b[2J";
pub const RESET_ATTRIBUTES: &[u8] = b"\x1b[0m";

/// Written on startup: hide the cursor, clear, home.
pub const ENTER_SEQUENCE: &[u8] = b"\x1b[?25l\x1b[2J\x1b[H";
/// Written on exit: default colours, clear, home, show the cursor.
pub const RESTORE_SEQUENCE: &[u8] = b"\x1b[0m\x1b[2J\x1b[H\x1b[?25h";

static RESTORED: AtomicBool = AtomicBool::new(false);

/// Restores the terminal at most once per process, whether reached from the
/// interrupt handler or from [`TerminalGuard`]'s drop.
pub fn restore_terminal() {
    if RESTORED.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut stdout = io::stdout();
    let _ = stdout.write_all(RESTORE_SEQUENCE);
    let _ = stdout.flush();
}

/// Registers a Ctrl-C / SIGTERM handler that restores the terminal and exits
/// with status 0.
///
/// The handler only touches static bytes and the shared stdout handle. It
/// may race an in-flight frame write; the restore sequence still lands last
/// because the process exits right after it.
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        restore_terminal();
        std::process::exit(0);
    })
    .map_err(|err| PlayerError::Interrupt(err.to_string()))
}

/// Puts the terminal into playback mode for as long as it lives.
#[derive(Debug)]
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    pub fn enter() -> Result<Self> {
        let mut stdout = io::stdout();
        stdout.write_all(ENTER_SEQUENCE)?;
        stdout.flush()?;
        RESTORED.store(false, Ordering::SeqCst);
        Ok(Self { _private: () })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}
