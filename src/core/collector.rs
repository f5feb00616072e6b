//! Output collector - cooperatively polled capture of a running command
//!
//! The drain loop never blocks: each iteration checks the cancellation
//! source, does one non-blocking read, one non-blocking wait per tracked
//! pid, then sleeps ~10ms. The hosting event loop stays responsive the
//! whole time a command runs.

use crate::config::ShellConfig;
use crate::core::signals::{CancelEvent, CancelFlags};
use crate::error::{Result, ShellError};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

/// How the drain loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Tail process exited with this code
    Exited(i32),
    /// Tail process was terminated by this signal
    Signaled(i32),
    /// Interrupt event: SIGINT sent, draining stopped
    Interrupted,
    /// Suspend event: SIGSTOP sent, the caller turns this into a job
    Suspended,
}

/// Drained output plus the fate of the tracked processes
#[derive(Debug)]
pub struct Captured {
    pub text: String,
    pub truncated: bool,
    pub status: DrainStatus,
}

/// Drain the capture descriptor until every tracked pid is reaped, a
/// cancellation event arrives, or the time budget runs out.
pub fn drain(
    capture: &mut File,
    pids: &[Pid],
    command: &str,
    budget: Duration,
    config: &ShellConfig,
    cancel: &CancelFlags,
) -> Result<Captured> {
    let start = Instant::now();
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut eof = false;
    let mut reaped: Vec<Option<WaitStatus>> = vec![None; pids.len()];

    loop {
        if let Some(event) = cancel.take() {
            let status = match event {
                CancelEvent::Interrupt => {
                    signal_all(pids, Signal::SIGINT);
                    reap_briefly(pids);
                    DrainStatus::Interrupted
                }
                CancelEvent::Suspend => {
                    // SIGSTOP, not SIGTSTP: suspension must work even if
                    // the child ignores SIGTSTP
                    signal_all(pids, Signal::SIGSTOP);
                    DrainStatus::Suspended
                }
            };
            return Ok(Captured {
                text: into_text(buf),
                truncated,
                status,
            });
        }

        if !truncated && !eof {
            let mut chunk = [0u8; 1024];
            match capture.read(&mut chunk) {
                Ok(0) => eof = true,
                Ok(n) => truncated = append_bounded(&mut buf, &chunk[..n], config.capture_limit),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut all_done = true;
        for (i, &pid) in pids.iter().enumerate() {
            if reaped[i].is_some() {
                continue;
            }
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => all_done = false,
                Ok(ws @ WaitStatus::Exited(..)) | Ok(ws @ WaitStatus::Signaled(..)) => {
                    reaped[i] = Some(ws)
                }
                Ok(_) => all_done = false,
                // ECHILD: someone else already reaped it; count it done
                Err(_) => reaped[i] = Some(WaitStatus::Exited(pid, 0)),
            }
        }
        if all_done {
            break;
        }

        if start.elapsed() >= budget {
            signal_all(pids, Signal::SIGKILL);
            for (i, &pid) in pids.iter().enumerate() {
                if reaped[i].is_none() {
                    let _ = waitpid(pid, None);
                }
            }
            return Err(ShellError::Timeout {
                command: command.to_string(),
                seconds: budget.as_secs(),
            });
        }

        thread::sleep(config.drain_poll());
    }

    // processes are gone; pick up whatever is still buffered in the pipe
    if !truncated {
        let mut chunk = [0u8; 1024];
        loop {
            match capture.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if append_bounded(&mut buf, &chunk[..n], config.capture_limit) {
                        truncated = true;
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }

    let status = match reaped.last().copied().flatten() {
        Some(WaitStatus::Exited(_, code)) => DrainStatus::Exited(code),
        Some(WaitStatus::Signaled(_, sig, _)) => DrainStatus::Signaled(sig as i32),
        _ => DrainStatus::Exited(0),
    };

    Ok(Captured {
        text: into_text(buf),
        truncated,
        status,
    })
}

/// Append up to the byte ceiling; returns true once the ceiling is hit
fn append_bounded(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(buf.len());
    if chunk.len() >= room {
        buf.extend_from_slice(&chunk[..room]);
        log::warn!("captured output truncated at {limit} bytes");
        true
    } else {
        buf.extend_from_slice(chunk);
        false
    }
}

fn into_text(buf: Vec<u8>) -> String {
    String::from_utf8_lossy(&buf).into_owned()
}

fn signal_all(pids: &[Pid], signal: Signal) {
    for &pid in pids {
        if let Err(errno) = kill(pid, signal) {
            log::warn!(
                "{}",
                ShellError::SignalDelivery {
                    pid: pid.as_raw(),
                    errno
                }
            );
        }
    }
}

/// Give an interrupted child a short window to die so it does not linger
/// as a zombie; never blocks the host for more than ~200ms.
fn reap_briefly(pids: &[Pid]) {
    for _ in 0..20 {
        let alive = pids.iter().any(|&pid| {
            matches!(
                waitpid(pid, Some(WaitPidFlag::WNOHANG)),
                Ok(WaitStatus::StillAlive)
            )
        });
        if !alive {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    log::debug!("interrupted process still running after grace window");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::launcher;
    use crate::core::parser::{Command, Pipeline};

    fn sh(script: &str) -> Pipeline {
        Pipeline {
            stages: vec![Command {
                argv: vec!["sh".into(), "-c".into(), script.into()],
                input: None,
                output: None,
            }],
            raw: script.to_string(),
        }
    }

    fn drain_pipeline(pipeline: &Pipeline, config: &ShellConfig, cancel: &CancelFlags) -> Result<Captured> {
        let mut launched = launcher::launch(pipeline).unwrap();
        let budget = config.timeout_for(pipeline.stages.len());
        drain(
            &mut launched.capture,
            &launched.pids,
            &pipeline.raw,
            budget,
            config,
            cancel,
        )
    }

    #[test]
    fn test_captures_output() {
        let captured = drain_pipeline(&sh("echo hello"), &ShellConfig::default(), &CancelFlags::new())
            .unwrap();
        assert_eq!(captured.text.trim(), "hello");
        assert_eq!(captured.status, DrainStatus::Exited(0));
        assert!(!captured.truncated);
    }

    #[test]
    fn test_exit_code_reported() {
        let captured =
            drain_pipeline(&sh("exit 3"), &ShellConfig::default(), &CancelFlags::new()).unwrap();
        assert!(captured.text.is_empty());
        assert_eq!(captured.status, DrainStatus::Exited(3));
    }

    #[test]
    fn test_truncation_at_limit() {
        let config = ShellConfig::default();
        let captured = drain_pipeline(
            &sh("printf '%08192d' 0"),
            &config,
            &CancelFlags::new(),
        )
        .unwrap();
        assert!(captured.truncated);
        assert_eq!(captured.text.len(), config.capture_limit);
    }

    #[test]
    fn test_timeout_kills() {
        let mut config = ShellConfig::default();
        config.single_timeout_ms = 150;

        let start = Instant::now();
        let err = drain_pipeline(&sh("sleep 5"), &config, &CancelFlags::new()).unwrap_err();
        assert!(matches!(err, ShellError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_interrupt_stops_draining() {
        let cancel = CancelFlags::new();
        cancel.raise(CancelEvent::Interrupt);

        let start = Instant::now();
        let captured = drain_pipeline(&sh("sleep 5"), &ShellConfig::default(), &cancel).unwrap();
        assert_eq!(captured.status, DrainStatus::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_suspend_stops_process() {
        let pipeline = sh("sleep 5");
        let mut launched = launcher::launch(&pipeline).unwrap();
        let cancel = CancelFlags::new();
        cancel.raise(CancelEvent::Suspend);

        let config = ShellConfig::default();
        let captured = drain(
            &mut launched.capture,
            &launched.pids,
            &pipeline.raw,
            config.timeout_for(1),
            &config,
            &cancel,
        )
        .unwrap();
        assert_eq!(captured.status, DrainStatus::Suspended);

        // clean up the stopped child
        let pid = launched.pids[0];
        let _ = kill(pid, Signal::SIGKILL);
        let _ = kill(pid, Signal::SIGCONT);
        let _ = waitpid(pid, None);
    }
}
