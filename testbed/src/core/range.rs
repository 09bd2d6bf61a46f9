//! Node range expressions
//!
//! A range is either a single index (`3`) or a bracketed list whose items are
//! indices or inclusive dash spans (`[0,2-4,7]`). Order and duplicates are
//! preserved exactly as written.

use crate::error::{TestbedError, TestbedResult};

/// Most indices a single range expression may expand to
pub const MAX_RANGE_LEN: usize = 65_536;

/// Expand a range expression into the list of node indices it names
pub fn parse_range(input: &str) -> TestbedResult<Vec<usize>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TestbedError::parse("empty node range"));
    }

    let opens = input.starts_with('[');
    let closes = input.ends_with(']');
    if opens != closes {
        return Err(TestbedError::parse(format!(
            "unbalanced brackets in node range {input:?}"
        )));
    }

    if !opens {
        return parse_index(input).map(|index| vec![index]);
    }

    let body = &input[1..input.len() - 1];
    let mut indices = Vec::new();
    for item in body.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(TestbedError::parse(format!(
                "empty item in node range {input:?}"
            )));
        }
        match item.split_once('-') {
            Some((low, high)) => indices.extend(expand_dash_range(low, high)?),
            None => indices.push(parse_index(item)?),
        }
        if indices.len() > MAX_RANGE_LEN {
            return Err(too_many_indices(input));
        }
    }
    Ok(indices)
}

/// Every index of a fleet of `total` nodes, in order
pub fn full_range(total: usize) -> Vec<usize> {
    (0..total).collect()
}

/// Parse `input` when present, otherwise select the whole fleet
pub fn parse_range_or_all(input: Option<&str>, total: usize) -> TestbedResult<Vec<usize>> {
    match input {
        Some(expr) => parse_range(expr),
        None => Ok(full_range(total)),
    }
}

fn expand_dash_range(low: &str, high: &str) -> TestbedResult<Vec<usize>> {
    let low = parse_index(low.trim())?;
    let high = parse_index(high.trim())?;
    if low > high {
        return Err(TestbedError::parse(format!(
            "descending span {low}-{high} in node range"
        )));
    }
    if high - low >= MAX_RANGE_LEN {
        return Err(too_many_indices(&format!("{low}-{high}")));
    }
    Ok((low..=high).collect())
}

fn too_many_indices(expr: &str) -> TestbedError {
    TestbedError::parse(format!(
        "node range {expr:?} names more than {MAX_RANGE_LEN} nodes"
    ))
}

fn parse_index(raw: &str) -> TestbedResult<usize> {
    raw.parse::<usize>()
        .map_err(|_| TestbedError::parse(format!("invalid node index {raw:?}")))
}
