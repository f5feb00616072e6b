//! Session context - the one place interactive state lives
//!
//! Owns the job table, the history engine, the single foreground slot and
//! the multiwatch-active flag. Passed by reference into every operation;
//! the only process-wide state outside this struct is the signal-pending
//! flag pair, which signal-handler constraints force to be global.

use crate::config::ShellConfig;
use crate::core::jobs::JobTable;
use crate::history::History;
use nix::unistd::Pid;

#[derive(Debug)]
pub struct Session {
    pub jobs: JobTable,
    pub history: History,
    /// The single interactively-controllable process, if any
    pub foreground: Option<Pid>,
    /// At most one multiWatch supervisor may be active at a time
    pub watch_active: bool,
}

impl Session {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            jobs: JobTable::new(config.max_jobs),
            history: History::new(config.history_capacity),
            foreground: None,
            watch_active: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session() {
        let session = Session::new(&ShellConfig::default());
        assert!(session.jobs.is_empty());
        assert!(session.history.is_empty());
        assert!(session.foreground.is_none());
        assert!(!session.watch_active);
    }
}
