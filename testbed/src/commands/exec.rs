//! Commands that act inside node environments: run, connect, shell

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use super::{emit, CommandContext, ReportArgs};
use crate::core::batch::parse_batch;
use crate::core::duration::parse_duration;
use crate::core::{
    load_topology, map_list_with_output, map_with_output, parse_range, parse_range_or_all, unit, NodeRef,
    UnitOfWork,
};
use crate::error::{TestbedError, TestbedResult};
use crate::types::{ExecContext, Output};

pub(super) async fn run(
    ctx: &CommandContext,
    range: Option<String>,
    timeout: Option<String>,
    command: Vec<String>,
    report: ReportArgs,
) -> TestbedResult<()> {
    let exec_ctx = match timeout.as_deref() {
        Some(raw) => ExecContext::with_timeout(parse_duration(raw)?),
        None => ExecContext::background(),
    };
    let nodes = ctx.nodes().await?;

    if command.is_empty() {
        if range.is_some() {
            return Err(TestbedError::validation(
                "a range needs a command; batch input carries its own ranges",
            ));
        }
        let mut input = String::new();
        tokio::io::stdin().read_to_string(&mut input).await?;

        let mut ranges = Vec::new();
        let mut units = Vec::new();
        for line in parse_batch(&input)? {
            ranges.push(parse_range_or_all(line.range.as_deref(), nodes.len())?);
            units.push(run_unit(exec_ctx, line.command));
        }
        let results = map_list_with_output(&ranges, &nodes, units).await?;
        return emit(results, report, "run");
    }

    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let results = map_with_output(&list, &nodes, run_unit(exec_ctx, command)).await?;
    emit(results, report, "run")
}

/// Run a command; a non-zero exit marks the node as failed
fn run_unit(exec_ctx: ExecContext, command: Vec<String>) -> UnitOfWork {
    unit(move |node: NodeRef| {
        let command = command.clone();
        async move {
            let output = node.run_cmd(exec_ctx, None, command).await?;
            Ok(output.with_exit_error())
        }
    })
}

/// `(from, to)` pairs to connect, self-pairs removed
///
/// No ranges connects every node to every other; one range connects the
/// nodes within it; two ranges connect each of the first to each of the second.
pub fn connection_pairs(ranges: &[String], total: usize) -> TestbedResult<Vec<(usize, usize)>> {
    let (from, to) = match ranges {
        [] => {
            let all: Vec<usize> = (0..total).collect();
            (all.clone(), all)
        }
        [only] => {
            let list = parse_range(only)?;
            (list.clone(), list)
        }
        [from, to] => (parse_range(from)?, parse_range(to)?),
        _ => return Err(TestbedError::validation("connect takes at most two ranges")),
    };

    Ok(from
        .iter()
        .flat_map(|&f| to.iter().map(move |&t| (f, t)))
        .filter(|(f, t)| f != t)
        .collect())
}

pub(super) async fn connect(
    ctx: &CommandContext,
    ranges: Vec<String>,
    topology: Option<PathBuf>,
    timeout: &str,
    report: ReportArgs,
) -> TestbedResult<()> {
    let exec_ctx = ExecContext::with_timeout(parse_duration(timeout)?);
    let nodes = ctx.nodes().await?;

    let pairs: Vec<(usize, usize)> = match topology {
        Some(path) => load_topology(&path, nodes.len())
            .await?
            .iter()
            .flat_map(|row| row.pairs().collect::<Vec<_>>())
            .filter(|(from, to)| from != to)
            .collect(),
        None => connection_pairs(&ranges, nodes.len())?,
    };

    // Destinations are validated here; origins go through the engine's check.
    let destinations: Vec<usize> = pairs.iter().map(|(_, to)| *to).collect();
    crate::core::dispatch::validate_range(&destinations, nodes.len())?;

    let mut origin_ranges = Vec::with_capacity(pairs.len());
    let mut units = Vec::with_capacity(pairs.len());
    for (from, to) in pairs {
        let peer = Arc::clone(&nodes[to]);
        origin_ranges.push(vec![from]);
        units.push(unit(move |node: NodeRef| {
            let peer = Arc::clone(&peer);
            async move {
                node.connect(exec_ctx, peer)
                    .await
                    .map_err(|e| TestbedError::ConnectionError {
                        from,
                        to,
                        source: Box::new(e),
                    })?;
                Ok(Output::empty(vec!["connect".to_string(), from.to_string(), to.to_string()]))
            }
        }));
    }

    let results = map_list_with_output(&origin_ranges, &nodes, units).await?;
    emit(results, report, "connect")
}

pub(super) async fn shell(ctx: &CommandContext, index: usize) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let node = nodes
        .get(index)
        .cloned()
        .ok_or(TestbedError::IndexOutOfRange {
            index,
            total: nodes.len(),
        })?;
    node.shell(nodes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_to_all_skips_self() {
        let pairs = connection_pairs(&[], 3).unwrap();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_single_range_connects_within() {
        let pairs = connection_pairs(&ranges(&["[1-2]"]), 5).unwrap();
        assert_eq!(pairs, vec![(1, 2), (2, 1)]);
    }

    #[test]
    fn test_two_ranges_connect_across() {
        let pairs = connection_pairs(&ranges(&["0", "[0-2]"]), 3).unwrap();
        assert_eq!(pairs, vec![(0, 1), (0, 2)]);
    }

    #[test]
    fn test_bad_range_rejected() {
        assert!(connection_pairs(&ranges(&["[3-1]"]), 5).is_err());
        assert!(connection_pairs(&ranges(&["0", "1", "2"]), 5).is_err());
    }
}
