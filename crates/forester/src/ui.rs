use std::result::Result as StdResult;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use forester_term::{Output, OutputError};
use libforester::ForesterError;
use serde::Serialize;

/// Format used for every rendered timestamp.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert output-layer failures into domain errors.
pub fn map_output_error(err: OutputError) -> ForesterError {
    ForesterError::OperationError(format!("Output operation failed: {err}"))
}

/// Emit an output result, mapping errors into `ForesterError`.
pub fn emit(result: StdResult<(), OutputError>) -> Result<()> {
    result.map_err(map_output_error)?;
    Ok(())
}

/// Print a sequence of protocol lines.
pub fn lines<I, S>(output: &dyn Output, items: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for item in items {
        emit(output.line(item.as_ref()))?;
    }
    Ok(())
}

/// Print `value` as one pretty JSON document.
pub fn json<T: Serialize + ?Sized>(output: &dyn Output, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode JSON output")?;
    emit(output.line(&text))
}

/// Ask for confirmation. Declining aborts the command.
pub fn require_confirmation(output: &dyn Output, prompt: &str) -> Result<()> {
    match output.confirm(prompt) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ForesterError::UserAborted.into()),
        Err(OutputError::Unsupported(reason)) => Err(ForesterError::OperationError(format!(
            "{reason}; pass --yes to continue"
        ))
        .into()),
        Err(err) => Err(map_output_error(err).into()),
    }
}

/// Render a timestamp in local time.
pub fn local_time(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format(DATE_FORMAT).to_string()
}

/// Indent every line of a message by four spaces.
pub fn indented(message: &str) -> Vec<String> {
    message.lines().map(|line| format!("    {line}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indents_each_message_line() {
        assert_eq!(indented("one\ntwo"), vec!["    one", "    two"]);
        assert!(indented("").is_empty());
    }

    #[test]
    fn local_time_uses_protocol_format() {
        let rendered = local_time(Utc::now());
        assert_eq!(rendered.len(), "2024-01-01 00:00:00".len());
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[13..14], ":");
    }
}
