//! Command parser - pipeline splitting, argv tokenization, redirection
//!
//! Redirection markers (`<`, `>`) are only recognized when the line has a
//! single stage; inside a multi-stage pipeline they pass through as plain
//! argv tokens. The deny-list filter runs over the raw line before any
//! parsing and is best-effort only, not a sandbox.

use crate::config::ShellConfig;
use crate::error::{Result, ShellError};
use regex::RegexSet;
use std::sync::OnceLock;

/// One pipeline stage: argv plus optional single-stage redirections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub input: Option<String>,
    pub output: Option<String>,
}

/// A parsed command line: ordered stages plus the raw text that produced it
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Command>,
    pub raw: String,
}

impl Pipeline {
    pub fn is_pipeline(&self) -> bool {
        self.stages.len() > 1
    }
}

static DENY: OnceLock<RegexSet> = OnceLock::new();

fn deny_set() -> &'static RegexSet {
    DENY.get_or_init(|| {
        RegexSet::new([
            r";;",
            r"&&",
            r"\|\|",
            r"`",
            r"\$\(",
            r"sudo",
            r">\s*/etc/",
            r">\s*/boot/",
            r">\s*/dev/",
            r">\s*/proc/",
            r"chmod\s+777",
        ])
        .unwrap()
    })
}

/// Best-effort deny-list over the raw line. Rejection means the command is
/// never parsed or run; acceptance guarantees nothing about safety.
pub fn is_safe_command(line: &str) -> bool {
    !deny_set().is_match(line)
}

/// Parse a raw line into a pipeline
pub fn parse(line: &str, config: &ShellConfig) -> Result<Pipeline> {
    let raw = line.trim();
    if raw.is_empty() {
        return Err(ShellError::Parse("empty command".into()));
    }

    let parts: Vec<&str> = raw.split('|').collect();
    if parts.len() > config.max_stages {
        return Err(ShellError::Parse(format!(
            "pipeline has {} stages, limit is {}",
            parts.len(),
            config.max_stages
        )));
    }

    let single = parts.len() == 1;
    let mut stages = Vec::with_capacity(parts.len());
    for part in parts {
        let stage = if single {
            parse_stage(part, config)?
        } else {
            // inherited behavior: no redirection mid-pipeline, every token
            // is argv
            let argv = tokenize(part, config)?;
            Command {
                argv,
                input: None,
                output: None,
            }
        };
        if stage.argv.is_empty() {
            return Err(ShellError::Parse("empty pipeline stage".into()));
        }
        stages.push(stage);
    }

    Ok(Pipeline {
        stages,
        raw: raw.to_string(),
    })
}

/// Tokenize a single stage, peeling off `<`/`>` targets
fn parse_stage(text: &str, config: &ShellConfig) -> Result<Command> {
    let mut argv = Vec::new();
    let mut input = None;
    let mut output = None;

    let mut tokens = text.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "<" => {
                input = Some(redirect_target(tokens.next(), "<")?);
            }
            ">" => {
                output = Some(redirect_target(tokens.next(), ">")?);
            }
            _ => argv.push(token.to_string()),
        }
        if argv.len() > config.max_args {
            return Err(ShellError::Parse(format!(
                "too many arguments (limit {})",
                config.max_args
            )));
        }
    }

    Ok(Command { argv, input, output })
}

fn redirect_target(token: Option<&str>, marker: &str) -> Result<String> {
    match token {
        Some(t) if t != "<" && t != ">" => Ok(t.to_string()),
        _ => Err(ShellError::Parse(format!(
            "missing file name after `{marker}`"
        ))),
    }
}

fn tokenize(text: &str, config: &ShellConfig) -> Result<Vec<String>> {
    let argv: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    if argv.len() > config.max_args {
        return Err(ShellError::Parse(format!(
            "too many arguments (limit {})",
            config.max_args
        )));
    }
    Ok(argv)
}

/// Parse the argument list of `multiWatch "cmd1" "cmd2" ...`.
///
/// Strict syntax: each command is double-quoted, commands are separated by
/// whitespace. Malformed quoting is a hard error, there is no recovery.
pub fn parse_watch_args(text: &str) -> Result<Vec<String>> {
    let mut commands = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let Some(c) = chars.next() else { break };
        if c != '"' {
            return Err(ShellError::Parse(
                "multiWatch commands must be double-quoted".into(),
            ));
        }

        let mut command = String::new();
        let mut terminated = false;
        for c in chars.by_ref() {
            if c == '"' {
                terminated = true;
                break;
            }
            command.push(c);
        }
        if !terminated {
            return Err(ShellError::Parse("unterminated quote in multiWatch".into()));
        }
        if command.trim().is_empty() {
            return Err(ShellError::Parse("empty multiWatch command".into()));
        }
        commands.push(command);
    }

    if commands.is_empty() {
        return Err(ShellError::Parse(
            "multiWatch requires at least one quoted command".into(),
        ));
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ShellConfig {
        ShellConfig::default()
    }

    #[test]
    fn test_single_command() {
        let p = parse("ls -la", &config()).unwrap();
        assert_eq!(p.stages.len(), 1);
        assert_eq!(p.stages[0].argv, vec!["ls", "-la"]);
        assert!(p.stages[0].input.is_none());
        assert!(!p.is_pipeline());
    }

    #[test]
    fn test_redirection_single_stage() {
        let p = parse("sort < in.txt > out.txt", &config()).unwrap();
        let stage = &p.stages[0];
        assert_eq!(stage.argv, vec!["sort"]);
        assert_eq!(stage.input.as_deref(), Some("in.txt"));
        assert_eq!(stage.output.as_deref(), Some("out.txt"));
    }

    #[test]
    fn test_missing_redirect_target() {
        assert!(parse("sort <", &config()).is_err());
        assert!(parse("sort < > out", &config()).is_err());
    }

    #[test]
    fn test_pipeline_split() {
        let p = parse("cat f | grep x | wc -l", &config()).unwrap();
        assert_eq!(p.stages.len(), 3);
        assert_eq!(p.stages[1].argv, vec!["grep", "x"]);
        assert!(p.is_pipeline());
    }

    #[test]
    fn test_redirection_tokens_pass_through_in_pipeline() {
        // inherited design: mid-pipeline `>` is just an argv token
        let p = parse("cat f | sort > out", &config()).unwrap();
        assert_eq!(p.stages[1].argv, vec!["sort", ">", "out"]);
        assert!(p.stages[1].output.is_none());
    }

    #[test]
    fn test_stage_limit() {
        let line = vec!["true"; 17].join(" | ");
        let err = parse(&line, &config()).unwrap_err();
        assert!(matches!(err, ShellError::Parse(_)));
    }

    #[test]
    fn test_empty_stage_rejected() {
        assert!(parse("ls | | wc", &config()).is_err());
        assert!(parse("", &config()).is_err());
    }

    #[test]
    fn test_deny_list() {
        assert!(!is_safe_command("sudo rm -rf /"));
        assert!(!is_safe_command("echo `id`"));
        assert!(!is_safe_command("echo $(id)"));
        assert!(!is_safe_command("true && false"));
        assert!(!is_safe_command("true || false"));
        assert!(!is_safe_command("echo x > /etc/passwd"));
        assert!(!is_safe_command("chmod 777 f"));
        assert!(is_safe_command("ls -la"));
        assert!(is_safe_command("echo hello | wc -c"));
    }

    #[test]
    fn test_watch_args() {
        let cmds = parse_watch_args(r#""echo A" "ls | wc -l""#).unwrap();
        assert_eq!(cmds, vec!["echo A", "ls | wc -l"]);
    }

    #[test]
    fn test_watch_args_unterminated() {
        assert!(parse_watch_args(r#""echo A" "echo B"#).is_err());
    }

    #[test]
    fn test_watch_args_unquoted_rejected() {
        assert!(parse_watch_args("echo A").is_err());
        assert!(parse_watch_args("").is_err());
    }
}
