//! Job controller - suspended/background process tracking
//!
//! A process only becomes a Job when it is suspended out of the foreground.
//! Ids are monotonic and never reused; a job leaving the table is how
//! "terminated" is represented.

use crate::error::{Result, ShellError};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// One tracked background process
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub pid: Pid,
    pub status: JobStatus,
    pub command: String,
}

/// Bounded job table with monotonic ids
#[derive(Debug)]
pub struct JobTable {
    jobs: VecDeque<Job>,
    next_id: u32,
    capacity: usize,
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            next_id: 1,
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn get(&self, id: u32) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Record a freshly suspended foreground process. Overflow is surfaced
    /// instead of dropped.
    pub fn suspend(&mut self, pid: Pid, command: impl Into<String>) -> Result<u32> {
        if self.jobs.len() >= self.capacity {
            return Err(ShellError::Process(format!(
                "job table full ({} jobs)",
                self.capacity
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push_back(Job {
            id,
            pid,
            status: JobStatus::Stopped,
            command: command.into(),
        });
        log::info!("job [{}] stopped, pid {}", id, pid);
        Ok(id)
    }

    /// Highest id, i.e. the most recently created job
    pub fn most_recent_id(&self) -> Option<u32> {
        self.jobs.back().map(|j| j.id)
    }

    fn take(&mut self, id: u32) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.id == id)?;
        self.jobs.remove(idx)
    }

    /// Drop jobs whose process has exited, silently; called before `jobs`
    /// output so the listing never shows dead entries
    pub fn reap_finished(&mut self) {
        self.jobs.retain(|job| {
            match waitpid(job.pid, Some(WaitPidFlag::WNOHANG)) {
                // a SIGSTOPped child reports StillAlive without WUNTRACED
                Ok(WaitStatus::StillAlive) => true,
                Ok(WaitStatus::Stopped(..)) | Ok(WaitStatus::Continued(_)) => true,
                Ok(_) => false,
                Err(_) => false,
            }
        });
    }
}

/// `fg [job_id]`: resume a job (most recent by default), hand it the
/// foreground slot, and block until it exits, is signaled, or stops again.
pub fn bring_foreground(
    table: &mut JobTable,
    foreground: &mut Option<Pid>,
    id: Option<u32>,
    emit: &mut dyn FnMut(&str),
) -> Result<()> {
    let id = match id.or_else(|| table.most_recent_id()) {
        Some(id) => id,
        None => return Err(ShellError::Process("fg: no current job".into())),
    };
    let Some(job) = table.take(id) else {
        return Err(ShellError::Process(format!("fg: no such job {id}")));
    };

    if job.status == JobStatus::Stopped {
        if let Err(errno) = kill(job.pid, Signal::SIGCONT) {
            // the process may already be gone; waitpid below settles it
            log::warn!(
                "{}",
                ShellError::SignalDelivery {
                    pid: job.pid.as_raw(),
                    errno
                }
            );
        }
    }

    *foreground = Some(job.pid);
    emit(&job.command);

    let outcome = waitpid(job.pid, Some(WaitPidFlag::WUNTRACED));
    *foreground = None;

    match outcome {
        Ok(WaitStatus::Stopped(..)) => {
            // stopped again: it re-enters the table under a fresh id
            match table.suspend(job.pid, job.command.clone()) {
                Ok(new_id) => emit(&format!("[{}]  Stopped  {}", new_id, job.command)),
                Err(e) => emit(&e.to_string()),
            }
        }
        Ok(WaitStatus::Exited(_, 0)) => emit(&format!("[{}]  done  {}", id, job.command)),
        Ok(WaitStatus::Exited(_, code)) => {
            emit(&format!("[{}]  exit {}  {}", id, code, job.command))
        }
        Ok(WaitStatus::Signaled(_, sig, _)) => emit(&format!(
            "[{}]  killed by signal {}  {}",
            id, sig as i32, job.command
        )),
        Ok(other) => log::debug!("unexpected wait status for fg: {other:?}"),
        Err(errno) => {
            return Err(ShellError::Process(format!(
                "fg: wait for pid {} failed: {errno}",
                job.pid
            )))
        }
    }
    Ok(())
}
