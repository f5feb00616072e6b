//! Process launcher - fork/exec wiring for single commands and pipelines
//!
//! A single command gets one capture pipe carrying its combined
//! stdout+stderr back to the parent. An N-stage pipeline uses N-1
//! connecting pipes (two alternating slots suffice) plus the final capture
//! pipe. Every descriptor a process does not need is closed before that
//! process proceeds; a leaked write end would keep the capture pipe from
//! ever reporting EOF.

use crate::core::parser::{Command, Pipeline};
use crate::core::signals;
use crate::error::{Result, ShellError};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, pipe, ForkResult, Pid};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::process;

/// A launched foreground command: its pids plus the non-blocking read end
/// of the capture pipe
pub struct Launched {
    pub pids: Vec<Pid>,
    pub capture: File,
}

/// Launch a parsed pipeline, single-stage or multi-stage
pub fn launch(pipeline: &Pipeline) -> Result<Launched> {
    // argv problems must surface before fork(); afterwards the only outlet
    // is a child-side diagnostic
    for stage in &pipeline.stages {
        validate_argv(&stage.argv)?;
    }

    if pipeline.is_pipeline() {
        launch_pipeline(pipeline)
    } else {
        launch_single(&pipeline.stages[0])
    }
}

fn validate_argv(argv: &[String]) -> Result<()> {
    if argv.is_empty() {
        return Err(ShellError::Exec(String::new()));
    }
    for arg in argv {
        if CString::new(arg.as_str()).is_err() {
            return Err(ShellError::Exec(arg.clone()));
        }
    }
    Ok(())
}

fn launch_single(command: &Command) -> Result<Launched> {
    let (cap_r, cap_w) = capture_pipe()?;

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            signals::reset_child_signals();
            child_close(cap_r.as_raw_fd());
            child_dup2(cap_w.as_raw_fd(), libc::STDOUT_FILENO);
            child_dup2(cap_w.as_raw_fd(), libc::STDERR_FILENO);
            child_close(cap_w.as_raw_fd());
            apply_redirections(command);
            exec_argv(&command.argv)
        }
        Ok(ForkResult::Parent { child }) => {
            drop(cap_w);
            set_nonblocking(cap_r.as_raw_fd())?;
            log::debug!("spawned pid {} for `{}`", child, command.argv.join(" "));
            Ok(Launched {
                pids: vec![child],
                capture: File::from(cap_r),
            })
        }
        Err(errno) => Err(ShellError::Process(format!("fork failed: {errno}"))),
    }
}

fn launch_pipeline(pipeline: &Pipeline) -> Result<Launched> {
    let n = pipeline.stages.len();
    let (cap_r, cap_w) = capture_pipe()?;

    // two reusable connecting-pipe slots, alternating per stage
    let mut slots: [Option<(OwnedFd, OwnedFd)>; 2] = [None, None];
    let mut pids: Vec<Pid> = Vec::with_capacity(n);

    for (i, stage) in pipeline.stages.iter().enumerate() {
        if i < n - 1 {
            match capture_pipe() {
                Ok(pair) => slots[i % 2] = Some(pair),
                Err(e) => {
                    kill_partial(&pids);
                    return Err(e);
                }
            }
        }

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                signals::reset_child_signals();

                // stage i reads the pipe created for stage i-1
                if i > 0 {
                    if let Some((r, _)) = &slots[(i + 1) % 2] {
                        child_dup2(r.as_raw_fd(), libc::STDIN_FILENO);
                    }
                }
                if i < n - 1 {
                    if let Some((_, w)) = &slots[i % 2] {
                        child_dup2(w.as_raw_fd(), libc::STDOUT_FILENO);
                        child_dup2(w.as_raw_fd(), libc::STDERR_FILENO);
                    }
                } else {
                    child_dup2(cap_w.as_raw_fd(), libc::STDOUT_FILENO);
                    child_dup2(cap_w.as_raw_fd(), libc::STDERR_FILENO);
                }

                // close every pipe end this stage does not own
                for slot in slots.iter().flatten() {
                    child_close(slot.0.as_raw_fd());
                    child_close(slot.1.as_raw_fd());
                }
                child_close(cap_r.as_raw_fd());
                child_close(cap_w.as_raw_fd());

                exec_argv(&stage.argv)
            }
            Ok(ForkResult::Parent { child }) => {
                pids.push(child);
                // pipe i-1 is now fully handed over; the parent lets go
                if i > 0 {
                    slots[(i + 1) % 2] = None;
                }
            }
            Err(errno) => {
                kill_partial(&pids);
                return Err(ShellError::Process(format!(
                    "fork failed at stage {i}: {errno}"
                )));
            }
        }
    }

    slots[0] = None;
    slots[1] = None;
    drop(cap_w);
    set_nonblocking(cap_r.as_raw_fd())?;

    log::debug!("spawned {} stage pipeline, pids {:?}", n, pids);
    Ok(Launched {
        pids,
        capture: File::from(cap_r),
    })
}

fn capture_pipe() -> Result<(OwnedFd, OwnedFd)> {
    pipe().map_err(|e| ShellError::Process(format!("pipe failed: {e}")))
}

/// SIGKILL and reap children already forked before a mid-sequence failure
fn kill_partial(pids: &[Pid]) {
    for &pid in pids {
        if let Err(errno) = kill(pid, Signal::SIGKILL) {
            log::warn!(
                "{}",
                ShellError::SignalDelivery {
                    pid: pid.as_raw(),
                    errno
                }
            );
        }
    }
    for &pid in pids {
        let _ = waitpid(pid, None);
    }
}

/// Mark a descriptor non-blocking so drain loops never stall on it
pub(crate) fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

// ---- child-side helpers ----
//
// Past fork() there is no error channel back to the parent: diagnostics go
// to stderr (already wired to the capture pipe) and the child exits.

pub(crate) fn child_dup2(old: RawFd, new: RawFd) {
    if unsafe { libc::dup2(old, new) } < 0 {
        child_eprintln("shellkit: dup2 failed");
        process::exit(1);
    }
}

pub(crate) fn child_close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Write a child-side diagnostic straight to fd 2.
///
/// After fork() the child must not route diagnostics through Rust's
/// `eprintln!`: the std error stream can be swapped out for an in-process
/// capture sink (notably by the libtest harness), which the child inherits
/// as a copy that goes nowhere. A raw write to STDERR_FILENO reaches the
/// descriptor the parent actually drains.
pub(crate) fn child_eprintln(msg: &str) {
    let mut line = msg.to_string();
    line.push('\n');
    let bytes = line.as_bytes();
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

fn apply_redirections(command: &Command) {
    if let Some(path) = &command.input {
        match File::open(path) {
            Ok(f) => {
                child_dup2(f.as_raw_fd(), libc::STDIN_FILENO);
            }
            Err(e) => {
                child_eprintln(&format!("cannot open input file '{path}': {e}"));
                process::exit(1);
            }
        }
    }
    if let Some(path) = &command.output {
        match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)
        {
            Ok(f) => {
                child_dup2(f.as_raw_fd(), libc::STDOUT_FILENO);
            }
            Err(e) => {
                child_eprintln(&format!("cannot create output file '{path}': {e}"));
                process::exit(1);
            }
        }
    }
}

/// `execvp` the argv; on failure report and exit 127 ("command not found")
pub(crate) fn exec_argv(argv: &[String]) -> ! {
    let cargs: Vec<CString> = argv
        .iter()
        .filter_map(|a| CString::new(a.as_str()).ok())
        .collect();
    if cargs.is_empty() || cargs.len() != argv.len() {
        child_eprintln("invalid command");
        process::exit(1);
    }

    let _ = nix::unistd::execvp(&cargs[0], &cargs);
    child_eprintln(&format!("command not found: {}", argv[0]));
    process::exit(127);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::core::parser;
    use nix::sys::wait::WaitStatus;
    use std::io::Read;

    fn read_all(launched: &mut Launched) -> String {
        // reap first so the write ends are closed, then read to EOF
        for &pid in &launched.pids.clone() {
            let _ = waitpid(pid, None);
        }
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match launched.capture.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_single_command_capture() {
        let p = parser::parse("echo hello", &ShellConfig::default()).unwrap();
        let mut launched = launch(&p).unwrap();
        assert_eq!(launched.pids.len(), 1);
        assert_eq!(read_all(&mut launched).trim(), "hello");
    }

    #[test]
    fn test_stderr_captured_too() {
        let p = parser::parse("ls /definitely-not-here-12345", &ShellConfig::default()).unwrap();
        let mut launched = launch(&p).unwrap();
        let out = read_all(&mut launched);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_exec_failure_exits_127() {
        let p = parser::parse("no-such-binary-xyz", &ShellConfig::default()).unwrap();
        let launched = launch(&p).unwrap();
        match waitpid(launched.pids[0], None).unwrap() {
            WaitStatus::Exited(_, code) => assert_eq!(code, 127),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_capture() {
        let p = parser::parse("echo hello | tr a-z A-Z", &ShellConfig::default()).unwrap();
        let mut launched = launch(&p).unwrap();
        assert_eq!(launched.pids.len(), 2);
        assert_eq!(read_all(&mut launched).trim(), "HELLO");
    }

    #[test]
    fn test_three_stage_pipeline() {
        let p = parser::parse("seq 1 3 | grep -v 2 | wc -l", &ShellConfig::default()).unwrap();
        let mut launched = launch(&p).unwrap();
        assert_eq!(launched.pids.len(), 3);
        assert_eq!(read_all(&mut launched).trim(), "2");
    }
}
