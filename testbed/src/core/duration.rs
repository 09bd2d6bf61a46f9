//! Human duration strings (`30s`, `50ms`, `1m30s`)

use std::time::Duration;

use crate::error::{TestbedError, TestbedResult};

/// Longest accepted duration; matches a signed 64-bit nanosecond count
pub const MAX_DURATION: Duration = Duration::from_nanos(i64::MAX as u64);

/// Parse a sequence of `<number><unit>` terms such as `1m30s` or `250ms`
///
/// A bare `0` is accepted without a unit.
pub fn parse_duration(input: &str) -> TestbedResult<Duration> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let parsed = humantime::parse_duration(input)
        .map_err(|e| TestbedError::parse(format!("invalid duration {input:?}: {e}")))?;
    if parsed > MAX_DURATION {
        return Err(TestbedError::parse(format!("duration {input:?} is too long")));
    }
    Ok(parsed)
}
