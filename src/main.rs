use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use scopelog::{Error, ExecOptions, LogConfig, Logger};

/// Run a command with scoped, colour-prefixed output.
#[derive(Parser, Debug)]
#[command(name = "scopelog", version, about)]
struct Cli {
    #[command(flatten)]
    log: LogConfig,

    /// Scope label for the command's output (defaults to the first word).
    #[arg(long)]
    scope: Option<String>,

    /// Working directory for the command.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// The command to run, passed to `/bin/sh -c`.
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.join(" ");
    let scope = cli
        .scope
        .clone()
        .or_else(|| cli.command.first().cloned())
        .unwrap_or_default();

    let logger = Logger::new(&cli.log).scope(scope);

    let mut options = ExecOptions::new();
    if let Some(cwd) = &cli.cwd {
        options = options.working_dir(cwd);
    }

    match logger.exec_with(&command, options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::CommandFailed(code)) => ExitCode::from(code.min(255) as u8),
        Err(e) => {
            logger.error(format!("{e}"));
            ExitCode::FAILURE
        }
    }
}
