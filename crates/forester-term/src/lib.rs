#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Terminal output abstractions for the `forester` command line.
//!
//! The [`Output`] trait separates protocol output (plain lines on stdout that
//! front-ends parse) from human-facing chatter (colored status lines, prompts
//! and spinners on stderr). Implementations:
//!
//! - [`Terminal`]: colored stderr, interactive confirmation, spinners
//! - [`Quiet`]: protocol lines only; chatter is dropped and prompts refused

use std::{
    io::{self, Write},
    result::Result as StdResult,
    time::Duration,
};

use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

/// Indentation level (in spaces) used for nested output sections.
const INDENT: usize = 2;

/// Spinner redraw interval.
const TICK: Duration = Duration::from_millis(100);

/// Errors produced by [`Output`] implementations when interacting with the user
/// or the terminal.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The requested operation is not supported by this output backend.
    #[error("{0}")]
    Unsupported(&'static str),

    /// A terminal/TTY related failure occurred.
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Underlying I/O error while writing/reading to the terminal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for output-related fallible operations.
pub type Result<T> = StdResult<T, OutputError>;

/// A running progress spinner. Cleared on [`Spinner::finish`] or drop.
pub struct Spinner {
    /// Underlying indicatif bar; hidden for quiet output.
    bar: ProgressBar,
}

impl Spinner {
    /// Spinner drawn on stderr.
    fn visible(msg: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(TICK);
        Self { bar }
    }

    /// Spinner that never draws.
    fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Replace the spinner's message.
    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    /// Stop and erase the spinner.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Whether the spinner is drawn anywhere.
    pub fn is_hidden(&self) -> bool {
        self.bar.is_hidden()
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

/// Abstraction over how protocol output, user-facing messages and prompts are
/// produced.
pub trait Output: Send + Sync {
    /// Print a protocol line on stdout, uncolored.
    fn line(&self, msg: &str) -> Result<()>;
    /// Print an informational message.
    fn message(&self, msg: &str) -> Result<()>;
    /// Print a success message.
    fn success(&self, msg: &str) -> Result<()>;
    /// Print a warning message.
    fn warn(&self, msg: &str) -> Result<()>;
    /// Print an error/failure message.
    fn fail(&self, msg: &str) -> Result<()>;
    /// Ask the user to confirm an action; returns `true` if confirmed.
    fn confirm(&self, prompt: &str) -> Result<bool>;
    /// Start a spinner for a long-running step.
    fn spinner(&self, msg: &str) -> Spinner;
    /// Flush any buffered output.
    fn finish(&self) -> Result<()>;
    /// Create a nested output section that indents subsequent lines.
    fn section(&self, header: &str) -> Result<Box<dyn Output>>;
}

/// Write one uncolored line to stdout.
fn write_stdout(indent: usize, msg: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}{msg}", " ".repeat(indent))?;
    Ok(())
}

/// Output implementation that keeps protocol lines but suppresses all other
/// messages and rejects interactive prompts.
#[derive(Default)]
pub struct Quiet {
    /// Current indentation depth in spaces.
    indent: usize,
}

impl Output for Quiet {
    fn line(&self, msg: &str) -> Result<()> {
        write_stdout(self.indent, msg)
    }

    fn message(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn success(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn warn(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn fail(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Err(OutputError::Unsupported(
            "Cannot prompt for confirmation in quiet mode",
        ))
    }

    fn spinner(&self, _msg: &str) -> Spinner {
        Spinner::hidden()
    }

    fn finish(&self) -> Result<()> {
        io::stdout().flush()?;
        Ok(())
    }

    fn section(&self, header: &str) -> Result<Box<dyn Output>> {
        self.line(header)?;
        Ok(Box::new(Self {
            indent: self.indent + INDENT,
        }))
    }
}

/// Color-capable terminal renderer. Chatter goes to stderr so stdout carries
/// only protocol lines.
pub struct Terminal {
    /// Whether to emit ANSI color sequences on stderr.
    color_choice: ColorChoice,
    /// Whether confirmation prompts may be shown.
    interactive: bool,
    /// Current indentation depth in spaces.
    indent: usize,
}

impl Terminal {
    /// Create a new terminal output.
    ///
    /// - `color`: when `true`, always render colored messages; when `false`,
    ///   disable ANSI colors.
    /// - `interactive`: when `false`, confirmation prompts fail instead of
    ///   waiting for input.
    pub fn new(color: bool, interactive: bool) -> Self {
        let color_choice = if color {
            ColorChoice::Always
        } else {
            ColorChoice::Never
        };
        Self {
            color_choice,
            interactive,
            indent: 0,
        }
    }

    /// Write `msg` to stderr using `color` while honoring the current
    /// indentation level.
    fn write_colored(&self, msg: &str, color: Color) -> Result<()> {
        let mut stderr = StandardStream::stderr(self.color_choice);
        stderr.set_color(ColorSpec::new().set_fg(Some(color)))?;
        writeln!(stderr, "{}{msg}", " ".repeat(self.indent))?;
        stderr.reset()?;
        stderr.flush()?;
        Ok(())
    }
}

impl Output for Terminal {
    fn line(&self, msg: &str) -> Result<()> {
        write_stdout(self.indent, msg)
    }

    fn message(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Cyan)
    }

    fn success(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Green)
    }

    fn warn(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Rgb(255, 165, 0)) // Orange
    }

    fn fail(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Red)
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        if !self.interactive {
            return Err(OutputError::Unsupported(
                "Cannot prompt for confirmation without a terminal",
            ));
        }
        Confirm::new()
            .with_prompt(format!("{}{prompt}", " ".repeat(self.indent)))
            .default(false)
            .interact()
            .map_err(|e| OutputError::Terminal(e.to_string()))
    }

    fn spinner(&self, msg: &str) -> Spinner {
        if self.interactive {
            Spinner::visible(msg)
        } else {
            Spinner::hidden()
        }
    }

    fn finish(&self) -> Result<()> {
        io::stdout().flush()?;
        io::stderr().flush()?;
        Ok(())
    }

    fn section(&self, header: &str) -> Result<Box<dyn Output>> {
        self.line(header)?;
        Ok(Box::new(Self {
            color_choice: self.color_choice,
            interactive: self.interactive,
            indent: self.indent + INDENT,
        }))
    }
}
