//! ShellKit CLI entry point - a minimal line-loop host
//!
//! Reads completed lines from stdin, hands them to the engine and prints
//! whatever it emits. Ctrl+C / Ctrl+Z arrive as signals and reach the
//! engine through the shared cancellation flags.

use anyhow::Result;
use clap::Parser;
use shellkit::{install_signal_handlers, Shell, ShellConfig};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shellkit", version, about = "Shell execution engine")]
struct Cli {
    /// Path to a YAML config file (defaults to shellkit.yml, then
    /// ~/.config/shellkit/config.yml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single command line and exit
    #[arg(short = 'c', value_name = "LINE")]
    command: Option<String>,
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = ShellConfig::load(cli.config.as_deref())?;
    let cancel = install_signal_handlers()?;
    let mut shell = Shell::new(config, cancel);

    let mut emit = |line: &str| println!("{line}");

    if let Some(line) = cli.command {
        shell.execute(&line, &mut emit);
        return Ok(());
    }

    log::info!("shellkit v{}", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        shell.execute(line, &mut emit);
    }

    Ok(())
}
