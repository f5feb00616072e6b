//! Shell engine - builtin dispatch and the host-facing execute surface
//!
//! The host hands in completed command lines and a cancellation source;
//! everything user-visible comes back through the `emit` callback. The
//! host owns display, scrollback and raw key handling.

use crate::config::ShellConfig;
use crate::core::collector::{self, DrainStatus};
use crate::core::jobs;
use crate::core::launcher;
use crate::core::parser;
use crate::core::signals::CancelFlags;
use crate::core::watch;
use crate::error::Result;
use crate::history::search::{self, SearchMatch};
use crate::history::{complete, Completion};
use crate::session::Session;
use nix::sys::signal::{kill, Signal};
use std::sync::Arc;

/// Maximum entries returned by show-all history search
const SEARCH_RESULT_LIMIT: usize = 10;

pub struct Shell {
    config: ShellConfig,
    session: Session,
    cancel: Arc<CancelFlags>,
}

/// How a foreground command ultimately went
enum Fate {
    Done(DrainStatus),
    Stopped(u32),
}

impl Shell {
    pub fn new(config: ShellConfig, cancel: Arc<CancelFlags>) -> Self {
        let session = Session::new(&config);
        Self {
            config,
            session,
            cancel,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Run one submitted line. Side effects are reported through `emit`;
    /// errors are recovered here, the session always survives.
    pub fn execute(&mut self, line: &str, emit: &mut dyn FnMut(&str)) {
        let line = line.trim();
        self.session.history.append(line);

        if line.is_empty() {
            emit("");
            return;
        }

        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("cd") => self.builtin_cd(tokens.next(), emit),
            Some("history") => self.builtin_history(emit),
            Some("jobs") => self.builtin_jobs(emit),
            Some("fg") => self.builtin_fg(tokens.next(), emit),
            Some("multiWatch") => {
                let args = &line["multiWatch".len()..];
                self.builtin_multiwatch(args, emit);
            }
            _ => self.run_external(line, emit),
        }
    }

    pub fn add_history(&mut self, line: &str) {
        self.session.history.append(line);
    }

    /// Incremental reverse search: single best match for the term
    pub fn search_history(&self, term: &str) -> Option<String> {
        search::reverse_search(&self.session.history, term)
    }

    /// Show-all reverse search: ranked matches, capped at 10
    pub fn search_history_matches(&self, term: &str) -> Vec<SearchMatch> {
        search::ranked_matches(&self.session.history, term, SEARCH_RESULT_LIMIT)
    }

    /// Filename completion against the current directory
    pub fn complete(&self, word: &str) -> Result<Completion> {
        complete::complete(word)
    }

    // ---- builtins ----

    fn builtin_cd(&mut self, path: Option<&str>, emit: &mut dyn FnMut(&str)) {
        let target = path.unwrap_or(".");
        if let Err(e) = std::env::set_current_dir(target) {
            emit(&format!("cd: {target}: {e}"));
        }
    }

    fn builtin_history(&mut self, emit: &mut dyn FnMut(&str)) {
        for (i, entry) in self.session.history.iter().enumerate() {
            emit(&format!("{:5}  {}", i + 1, entry));
        }
    }

    fn builtin_jobs(&mut self, emit: &mut dyn FnMut(&str)) {
        self.session.jobs.reap_finished();
        if self.session.jobs.is_empty() {
            emit("no background jobs");
            return;
        }
        for job in self.session.jobs.iter() {
            emit(&format!("[{}]  {}  {}", job.id, job.status, job.command));
        }
    }

    fn builtin_fg(&mut self, arg: Option<&str>, emit: &mut dyn FnMut(&str)) {
        let id = match arg {
            Some(raw) => match raw.parse::<u32>() {
                Ok(id) => Some(id),
                Err(_) => {
                    emit(&format!("fg: bad job id `{raw}`"));
                    return;
                }
            },
            None => None,
        };
        self.cancel.clear();
        if let Err(e) =
            jobs::bring_foreground(&mut self.session.jobs, &mut self.session.foreground, id, emit)
        {
            emit(&e.to_string());
        }
    }

    fn builtin_multiwatch(&mut self, args: &str, emit: &mut dyn FnMut(&str)) {
        let commands = match parser::parse_watch_args(args) {
            Ok(commands) => commands,
            Err(e) => {
                emit(&e.to_string());
                return;
            }
        };
        if self.session.watch_active {
            emit("multiWatch: a watch is already active");
            return;
        }

        self.session.watch_active = true;
        self.cancel.clear();
        let result = watch::run(&commands, &self.config, &self.cancel, emit);
        self.session.watch_active = false;

        if let Err(e) = result {
            emit(&e.to_string());
        }
    }

    // ---- external commands ----

    fn run_external(&mut self, line: &str, emit: &mut dyn FnMut(&str)) {
        if !parser::is_safe_command(line) {
            emit("command rejected: contains a blocked pattern");
            return;
        }
        let pipeline = match parser::parse(line, &self.config) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                emit(&e.to_string());
                return;
            }
        };

        self.cancel.clear();
        let launched = match launcher::launch(&pipeline) {
            Ok(launched) => launched,
            Err(e) => {
                emit(&e.to_string());
                return;
            }
        };
        log::info!(
            "executing `{}` ({} stage(s), pids {:?})",
            pipeline.raw,
            pipeline.stages.len(),
            launched.pids
        );

        let mut capture = launched.capture;
        let pids = launched.pids;
        let Some(&tail_pid) = pids.last() else {
            return;
        };
        // signals target the terminal-visible tail process
        self.session.foreground = Some(tail_pid);

        let budget = self.config.timeout_for(pipeline.stages.len());
        let mut text = String::new();
        let mut truncated = false;

        let result = loop {
            match collector::drain(
                &mut capture,
                &pids,
                &pipeline.raw,
                budget,
                &self.config,
                &self.cancel,
            ) {
                Ok(captured) => {
                    text.push_str(&captured.text);
                    truncated |= captured.truncated;

                    if captured.status == DrainStatus::Suspended {
                        match self.session.jobs.suspend(tail_pid, pipeline.raw.clone()) {
                            Ok(id) => break Ok(Fate::Stopped(id)),
                            Err(e) => {
                                // a full table must not strand a stopped
                                // process; resume and keep draining
                                emit(&e.to_string());
                                for &pid in &pids {
                                    let _ = kill(pid, Signal::SIGCONT);
                                }
                                continue;
                            }
                        }
                    }
                    break Ok(Fate::Done(captured.status));
                }
                Err(e) => break Err(e),
            }
        };
        self.session.foreground = None;

        let body = text.trim_end();
        if !body.is_empty() {
            emit(body);
            if truncated {
                emit(&format!(
                    "warning: output truncated at {} bytes",
                    self.config.capture_limit
                ));
            }
        }

        match result {
            Ok(Fate::Stopped(id)) => emit(&format!("[{}]  Stopped  {}", id, pipeline.raw)),
            Ok(Fate::Done(DrainStatus::Interrupted)) => emit("interrupted"),
            Ok(Fate::Done(status)) if body.is_empty() => match status {
                DrainStatus::Exited(0) => emit(""),
                DrainStatus::Exited(code) => emit(&format!("process exited with code {code}")),
                DrainStatus::Signaled(sig) => {
                    emit(&format!("process terminated by signal {sig}"))
                }
                _ => {}
            },
            Ok(Fate::Done(_)) => {}
            Err(e) => emit(&e.to_string()),
        }
    }
}
