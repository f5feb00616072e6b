//! MultiWatch supervisor - run N commands in parallel and monitor them
//!
//! Each sub-command writes combined stdout+stderr into its own 0600 temp
//! file; the supervisor reopens every file non-blocking and polls them all
//! from one loop. Children get their own process group so shutdown signals
//! reach an entire `sh -c` subtree, not just its leader.

use crate::config::ShellConfig;
use crate::core::launcher::{child_close, child_dup2, exec_argv};
use crate::core::signals::{self, CancelFlags};
use crate::error::{Result, ShellError};
use chrono::Utc;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, setpgid, ForkResult, Pid};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

/// One watched child process and its output plumbing
struct WatchedProcess {
    index: usize,
    pid: Pid,
    command: String,
    path: PathBuf,
    reader: Option<File>,
    pending: String,
    headered: bool,
    alive: bool,
}

impl WatchedProcess {
    /// Read whatever is immediately available; returns bytes consumed
    fn drain_available(&mut self, emit: &mut dyn FnMut(&str)) -> usize {
        let Some(mut reader) = self.reader.take() else {
            return 0;
        };
        let mut total = 0;
        let mut chunk = [0u8; 1024];
        let mut failed = false;
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if !self.headered {
                        emit(&format!("=== [{}] {} ===", self.index, self.command));
                        self.headered = true;
                    }
                    self.push_bytes(&chunk[..n], emit);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("read from {} failed: {}", self.path.display(), e);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            self.reader = Some(reader);
        }
        total
    }

    fn push_bytes(&mut self, bytes: &[u8], emit: &mut dyn FnMut(&str)) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            emit(line.trim_end_matches('\n'));
        }
    }

    fn flush_pending(&mut self, emit: &mut dyn FnMut(&str)) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            emit(&line);
        }
    }
}

/// Supervisor for one `multiWatch` invocation. Cleanup is idempotent and
/// runs exactly once no matter how the monitor loop exits.
struct WatchSupervisor<'a> {
    procs: Vec<WatchedProcess>,
    config: &'a ShellConfig,
    cleaned: bool,
}

/// Run `multiWatch` over the given sub-commands, blocking the caller until
/// all of them finish, cancellation arrives, or the monitor goes idle.
pub fn run(
    commands: &[String],
    config: &ShellConfig,
    cancel: &CancelFlags,
    emit: &mut dyn FnMut(&str),
) -> Result<()> {
    let mut supervisor = WatchSupervisor {
        procs: Vec::with_capacity(commands.len()),
        config,
        cleaned: false,
    };

    let mut result = supervisor.spawn_all(commands);
    if result.is_ok() {
        result = supervisor.monitor(cancel, emit);
    }
    supervisor.cleanup();
    result
}

impl<'a> WatchSupervisor<'a> {
    fn spawn_all(&mut self, commands: &[String]) -> Result<()> {
        let stamp = Utc::now().timestamp();
        for (index, command) in commands.iter().enumerate() {
            self.spawn_one(index, command, stamp)?;
        }
        log::info!("multiwatch: supervising {} commands", self.procs.len());
        Ok(())
    }

    fn spawn_one(&mut self, index: usize, command: &str, stamp: i64) -> Result<()> {
        let path = PathBuf::from(format!(
            ".temp.multiwatch.{}.{}.{}.txt",
            getpid(),
            index,
            stamp
        ));
        let sink = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // own process group, so group signals reach sh subtrees
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                signals::reset_child_signals();
                child_dup2(sink.as_raw_fd(), libc::STDOUT_FILENO);
                child_dup2(sink.as_raw_fd(), libc::STDERR_FILENO);
                child_close(sink.as_raw_fd());

                if command.contains('|') {
                    exec_argv(&["sh".into(), "-c".into(), command.to_string()])
                } else {
                    let argv: Vec<String> =
                        command.split_whitespace().map(str::to_string).collect();
                    if argv.is_empty() {
                        process::exit(1);
                    }
                    exec_argv(&argv)
                }
            }
            Ok(ForkResult::Parent { child }) => {
                let _ = setpgid(child, child);
                drop(sink);
                let reader = match OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&path)
                {
                    Ok(f) => f,
                    Err(e) => {
                        let _ = killpg(child, Signal::SIGKILL);
                        let _ = waitpid(child, None);
                        let _ = fs::remove_file(&path);
                        return Err(e.into());
                    }
                };
                self.procs.push(WatchedProcess {
                    index,
                    pid: child,
                    command: command.to_string(),
                    path,
                    reader: Some(reader),
                    pending: String::new(),
                    headered: false,
                    alive: true,
                });
                Ok(())
            }
            Err(errno) => {
                let _ = fs::remove_file(&path);
                Err(ShellError::Process(format!(
                    "fork failed for watched command `{command}`: {errno}"
                )))
            }
        }
    }

    fn monitor(&mut self, cancel: &CancelFlags, emit: &mut dyn FnMut(&str)) -> Result<()> {
        let mut last_activity = Instant::now();

        loop {
            if cancel.take().is_some() {
                emit("multiWatch: cancelled");
                return Ok(());
            }

            let mut activity = 0;
            for p in &mut self.procs {
                activity += p.drain_available(emit);
            }

            for p in &mut self.procs {
                if !p.alive {
                    continue;
                }
                let finished = match waitpid(p.pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => None,
                    Ok(WaitStatus::Exited(_, code)) => Some(format!("exit {code}")),
                    Ok(WaitStatus::Signaled(_, sig, _)) => Some(format!("signal {}", sig as i32)),
                    Ok(_) => None,
                    Err(_) => Some("gone".to_string()),
                };
                if let Some(outcome) = finished {
                    p.alive = false;
                    activity += 1;
                    // pick up residual bytes before announcing completion
                    p.drain_available(emit);
                    p.flush_pending(emit);
                    p.reader = None;
                    emit(&format!("[{}] {} finished ({})", p.index, p.command, outcome));
                }
            }

            if self.procs.iter().all(|p| !p.alive) {
                emit("multiWatch: all commands finished");
                return Ok(());
            }

            if activity > 0 {
                last_activity = Instant::now();
            } else {
                if last_activity.elapsed() >= self.config.watch_idle_timeout() {
                    log::warn!("multiwatch idle for {:?}, shutting down", self.config.watch_idle_timeout());
                    emit("multiWatch: no activity, shutting down remaining commands");
                    return Ok(());
                }
                self.wait_for_data();
            }

            // temp files always poll ready; this bounds the loop's CPU use
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Block for up to one poll interval waiting for readable descriptors
    fn wait_for_data(&self) {
        let mut pfds: Vec<libc::pollfd> = self
            .procs
            .iter()
            .filter_map(|p| p.reader.as_ref())
            .map(|r| libc::pollfd {
                fd: r.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        if pfds.is_empty() {
            thread::sleep(Duration::from_millis(self.config.watch_poll_ms));
            return;
        }
        unsafe {
            libc::poll(
                pfds.as_mut_ptr(),
                pfds.len() as libc::nfds_t,
                self.config.watch_poll_ms as libc::c_int,
            );
        }
    }

    /// Terminate leftovers (SIGTERM, grace period, SIGKILL), reap them,
    /// close descriptors and delete every temp file. Safe to call twice.
    fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        if self.procs.iter().any(|p| p.alive) {
            for p in self.procs.iter().filter(|p| p.alive) {
                let _ = killpg(p.pid, Signal::SIGTERM);
            }

            let deadline = Instant::now() + self.config.term_grace();
            while Instant::now() < deadline && self.procs.iter().any(|p| p.alive) {
                self.reap_nonblocking();
                thread::sleep(Duration::from_millis(20));
            }

            for p in self.procs.iter_mut().filter(|p| p.alive) {
                if let Err(errno) = killpg(p.pid, Signal::SIGKILL) {
                    log::warn!(
                        "{}",
                        ShellError::SignalDelivery {
                            pid: p.pid.as_raw(),
                            errno
                        }
                    );
                }
                let _ = waitpid(p.pid, None);
                p.alive = false;
            }
        }

        for p in &mut self.procs {
            p.reader = None;
            if let Err(e) = fs::remove_file(&p.path) {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("failed to remove {}: {}", p.path.display(), e);
                }
            }
        }
        log::debug!("multiwatch cleanup complete");
    }

    fn reap_nonblocking(&mut self) {
        for p in self.procs.iter_mut().filter(|p| p.alive) {
            match waitpid(p.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(_) => {
                    p.alive = false;
                }
                Ok(_) => {}
            }
        }
    }
}

impl Drop for WatchSupervisor<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signals::CancelEvent;

    // watch temp-file names are only unique per supervisor invocation, so
    // tests sharing this process must not overlap
    static WATCH_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn collect(commands: &[&str], cancel: &CancelFlags) -> (Result<()>, Vec<String>) {
        let _guard = WATCH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let config = ShellConfig::default();
        let commands: Vec<String> = commands.iter().map(|s| s.to_string()).collect();
        let mut lines = Vec::new();
        let result = run(&commands, &config, cancel, &mut |s| lines.push(s.to_string()));
        (result, lines)
    }

    fn no_temp_files_left() -> bool {
        let prefix = format!(".temp.multiwatch.{}.", getpid());
        fs::read_dir(".")
            .unwrap()
            .filter_map(|e| e.ok())
            .all(|e| !e.file_name().to_string_lossy().starts_with(&prefix))
    }

    #[test]
    fn test_labeled_output_before_completion() {
        let (result, lines) = collect(&["echo A", "echo B"], &CancelFlags::new());
        result.unwrap();

        let pos_a = lines.iter().position(|l| l == "A").unwrap();
        let pos_b = lines.iter().position(|l| l == "B").unwrap();
        let done = lines
            .iter()
            .position(|l| l.contains("all commands finished"))
            .unwrap();
        assert!(pos_a < done && pos_b < done);
        assert!(no_temp_files_left());
    }

    #[test]
    fn test_piped_subcommand_goes_through_shell() {
        let (result, lines) = collect(&["echo hello | tr a-z A-Z"], &CancelFlags::new());
        result.unwrap();
        assert!(lines.iter().any(|l| l == "HELLO"));
    }

    #[test]
    fn test_cancellation_kills_and_cleans_up() {
        let cancel = CancelFlags::new();
        cancel.raise(CancelEvent::Interrupt);

        let start = Instant::now();
        let (result, lines) = collect(&["sleep 30"], &cancel);
        result.unwrap();

        assert!(lines.iter().any(|l| l.contains("cancelled")));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(no_temp_files_left());
    }

    #[test]
    fn test_completion_reports_exit_status() {
        let (result, lines) = collect(&["sh -c true"], &CancelFlags::new());
        result.unwrap();
        assert!(lines.iter().any(|l| l.contains("finished")));
    }
}
