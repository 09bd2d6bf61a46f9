//! Batch command files for `run`
//!
//! Each line is an optional `<range>:` prefix followed by a shell-tokenized
//! command. Lines without a prefix target every node.

use crate::error::{TestbedError, TestbedResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLine {
    /// Raw range selector, `None` for the whole fleet
    pub range: Option<String>,
    pub command: Vec<String>,
}

/// Parse batch input; `#` comments and blank lines are skipped
pub fn parse_batch(content: &str) -> TestbedResult<Vec<BatchLine>> {
    let mut lines = Vec::new();

    for (offset, raw) in content.lines().enumerate() {
        let line_no = offset + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (range, rest) = split_range_prefix(trimmed);
        let command = shlex::split(rest)
            .ok_or_else(|| TestbedError::line(line_no, "unbalanced quoting in command"))?;
        if command.is_empty() {
            return Err(TestbedError::line(line_no, "missing command"));
        }

        lines.push(BatchLine { range, command });
    }

    Ok(lines)
}

/// Separate a leading selector such as `[0-2]:` from the command text
fn split_range_prefix(line: &str) -> (Option<String>, &str) {
    if let Some((prefix, rest)) = line.split_once(':') {
        let candidate = prefix.trim();
        let looks_like_range = candidate.chars().any(|c| c.is_ascii_digit())
            && candidate
                .chars()
                .all(|c| c.is_ascii_digit() || "[],- ".contains(c));
        if looks_like_range {
            return (Some(candidate.to_string()), rest.trim());
        }
    }
    (None, line)
}
