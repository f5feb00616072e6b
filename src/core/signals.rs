//! Signal plumbing - flag-only handlers and the cancellation source
//!
//! OS signal handlers here do exactly one thing: set an atomic flag. All
//! reactive work (deciding which process to signal, mutating the job table)
//! happens later in the polling loops, which are the single consumer of the
//! flag pair. Nothing async-signal-unsafe ever runs inside a handler.

use crate::error::Result;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A cancellation event observed by the host or derived from a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEvent {
    /// Ctrl+C / SIGINT: stop the foreground command
    Interrupt,
    /// Ctrl+Z / SIGTSTP: suspend the foreground command into a job
    Suspend,
}

/// Pending-cancellation flag pair shared between the host, the signal
/// handlers and the polling loops
#[derive(Debug, Default)]
pub struct CancelFlags {
    interrupt: AtomicBool,
    suspend: AtomicBool,
}

impl CancelFlags {
    pub const fn new() -> Self {
        Self {
            interrupt: AtomicBool::new(false),
            suspend: AtomicBool::new(false),
        }
    }

    /// Record an event. Safe to call from a signal handler.
    pub fn raise(&self, event: CancelEvent) {
        match event {
            CancelEvent::Interrupt => self.interrupt.store(true, Ordering::SeqCst),
            CancelEvent::Suspend => self.suspend.store(true, Ordering::SeqCst),
        }
    }

    /// Consume the next pending event, interrupt first
    pub fn take(&self) -> Option<CancelEvent> {
        if self.interrupt.swap(false, Ordering::SeqCst) {
            Some(CancelEvent::Interrupt)
        } else if self.suspend.swap(false, Ordering::SeqCst) {
            Some(CancelEvent::Suspend)
        } else {
            None
        }
    }

    /// Drop any stale events, e.g. ones raised while no command was running
    pub fn clear(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
        self.suspend.store(false, Ordering::SeqCst);
    }
}

static INSTALLED: OnceLock<Arc<CancelFlags>> = OnceLock::new();

extern "C" fn handle_signal(sig: libc::c_int) {
    // Flag stores only; the main loop reacts on its next iteration.
    if let Some(flags) = INSTALLED.get() {
        match sig {
            libc::SIGINT => flags.interrupt.store(true, Ordering::SeqCst),
            libc::SIGTSTP => flags.suspend.store(true, Ordering::SeqCst),
            _ => {}
        }
    }
}

/// Install process-wide SIGINT/SIGTSTP handlers and return the flag pair
/// they feed. Idempotent; every call returns the same shared flags.
pub fn install() -> Result<Arc<CancelFlags>> {
    let flags = INSTALLED.get_or_init(|| Arc::new(CancelFlags::new())).clone();

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTSTP, &action)?;
    }

    log::debug!("signal handlers installed");
    Ok(flags)
}

/// Restore default SIGINT/SIGTSTP disposition. Called in forked children
/// before `execvp` so interactive signals affect them normally.
pub fn reset_child_signals() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
        let _ = sigaction(Signal::SIGTSTP, &action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes() {
        let flags = CancelFlags::new();
        assert_eq!(flags.take(), None);

        flags.raise(CancelEvent::Suspend);
        assert_eq!(flags.take(), Some(CancelEvent::Suspend));
        assert_eq!(flags.take(), None);
    }

    #[test]
    fn test_interrupt_wins_over_suspend() {
        let flags = CancelFlags::new();
        flags.raise(CancelEvent::Suspend);
        flags.raise(CancelEvent::Interrupt);

        assert_eq!(flags.take(), Some(CancelEvent::Interrupt));
        assert_eq!(flags.take(), Some(CancelEvent::Suspend));
    }

    #[test]
    fn test_clear_drops_stale_events() {
        let flags = CancelFlags::new();
        flags.raise(CancelEvent::Interrupt);
        flags.clear();
        assert_eq!(flags.take(), None);
    }
}
