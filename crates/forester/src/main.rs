#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for Forester repositories via the libforester crate.
//!
//! Stdout carries the line-oriented text protocol (or JSON with
//! `--format json`); colored chatter, prompts and spinners go to stderr.

use std::{
    env,
    io::{self, IsTerminal},
    process,
};

use anyhow::{Error, Result};
use clap::Parser;
use forester_term::{Output, Quiet, Terminal};
use libforester::ForesterError;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::{
    args::{Cli, Commands, Format},
    commands::{Invocation, dispatch, init},
    utils::{open_repository, resolve_user},
};

/// Command-line argument definitions.
mod args;
/// Command implementations.
mod commands;
/// Rendering helpers shared by commands.
mod ui;
/// Path and user resolution.
mod utils;

/// Environment variable holding a tracing filter directive.
const LOG_ENV: &str = "FORESTER_LOG";

/// Install the stderr tracing subscriber. `FORESTER_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    #[allow(clippy::let_underscore_must_use)]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Report a failed command and return the process exit code.
fn report_error(err: &Error, output: &dyn Output, format: Format, quiet: bool) -> i32 {
    let domain = err.downcast_ref::<ForesterError>();
    let code = domain.map_or(1, ForesterError::exit_code);
    if matches!(domain, Some(ForesterError::UserAborted)) {
        if let Err(finish_err) = output.finish() {
            eprintln!("Failed to flush output handler: {finish_err:#}");
        }
        return code;
    }

    let message = format!("{err:#}");
    if format == Format::Json {
        let kind = domain.map_or("error", ForesterError::kind);
        eprintln!("{}", json!({ "error": kind, "message": message }));
    } else if quiet {
        eprintln!("Error: {message}");
    } else if let Err(display_err) = output.fail(&message) {
        eprintln!("Failed to report error via output handler: {display_err:#}");
        eprintln!("Error: {message}");
    }
    if let Err(finish_err) = output.finish() {
        eprintln!("Failed to flush output handler: {finish_err:#}");
    }
    code
}

/// CLI entrypoint.
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stderr().is_terminal() && env::var_os("NO_COLOR").is_none()
    };
    let interactive = !cli.no_prompt && io::stdin().is_terminal() && io::stderr().is_terminal();

    let output: Box<dyn Output> = if cli.quiet {
        Box::new(Quiet::default())
    } else {
        Box::new(Terminal::new(color, interactive))
    };

    let format = cli.format;
    let quiet = cli.quiet;
    if let Err(e) = run(cli, output.as_ref()) {
        let code = report_error(&e, output.as_ref(), format, quiet);
        process::exit(code);
    }
}

/// Execute the selected command against the resolved repository.
fn run(cli: Cli, output: &dyn Output) -> Result<()> {
    if let Commands::Init { path } = &cli.command {
        return init(output, cli.format, path);
    }

    let repo = open_repository(cli.repo_dir.as_deref())?;
    let user = resolve_user(cli.user.as_deref(), &repo);
    tracing::debug!(root = %repo.root().display(), %user, "opened repository");
    let inv = Invocation {
        repo,
        output,
        format: cli.format,
        user,
    };
    dispatch(&inv, cli.command)
}
