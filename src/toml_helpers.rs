// Helpers for turning TOML parse errors into configuration errors. Shared by the
// config loader and the standalone schema loader.

use crate::error::AcqError;

fn leading_number(s: &str) -> Option<usize> {
    let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Look for "line N column M" in a parser error message and return (line, column).
#[must_use]
pub fn extract_line_col_from_msg(msg: &str) -> Option<(usize, usize)> {
    let after_line = &msg[msg.find("line ")? + 5..];
    let line = leading_number(after_line)?;
    let after_col = &after_line[after_line.find("column ")? + 7..];
    let col = leading_number(after_col)?;
    Some((line, col))
}

/// Wrap a `toml` deserialization error for the file labelled `what`.
#[must_use]
pub fn parse_error(what: &str, e: &toml::de::Error) -> AcqError {
    let msg = e.to_string();
    match extract_line_col_from_msg(&msg) {
        Some((line, col)) => AcqError::Config(format!("{what} parse error at {line}:{col}: {msg}")),
        None => AcqError::Config(format!("{what} parse error: {msg}")),
    }
}
