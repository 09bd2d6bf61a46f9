//! Fleet creation and daemon lifecycle commands

use shared::{parse_attr_slice, NodeSpec};
use tracing::info;

use super::{emit, CommandContext, CreateArgs, ReportArgs};
use crate::core::{map_with_output, parse_range_or_all, unit, ExecutionResult, NodeRef};
use crate::error::TestbedResult;
use crate::types::Output;

pub(super) async fn create(ctx: &CommandContext, args: CreateArgs) -> TestbedResult<Vec<NodeSpec>> {
    let attrs = parse_attr_slice(&args.attrs);
    ctx.testbed
        .create(&ctx.registry, args.count, &args.type_name, &attrs, args.force)
        .await
}

pub(super) async fn auto(ctx: &CommandContext, args: CreateArgs, start_nodes: bool, report: ReportArgs) -> TestbedResult<()> {
    let specs = create(ctx, args).await?;
    info!(testbed = %ctx.config.testbed_name, nodes = specs.len(), "initialising new testbed");

    let nodes = ctx.nodes().await?;
    let all: Vec<usize> = (0..nodes.len()).collect();
    let results = init_nodes(&all, &nodes, Vec::new()).await?;
    emit(results, report, "init")?;

    if start_nodes {
        let results = start_nodes_in(&all, &nodes, true, Vec::new()).await?;
        emit(results, report, "start")?;
    }
    Ok(())
}

pub(super) async fn init(ctx: &CommandContext, range: Option<String>, args: Vec<String>, report: ReportArgs) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let results = init_nodes(&list, &nodes, args).await?;
    emit(results, report, "init")
}

pub(super) async fn start(
    ctx: &CommandContext,
    range: Option<String>,
    wait: bool,
    args: Vec<String>,
    report: ReportArgs,
) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let results = start_nodes_in(&list, &nodes, wait, args).await?;
    emit(results, report, "start")
}

pub(super) async fn stop(ctx: &CommandContext, range: Option<String>, wait: bool, report: ReportArgs) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let work = unit(move |node: NodeRef| async move {
        node.stop(wait).await?;
        Ok(Output::empty(vec!["stop".to_string()]))
    });
    let results = map_with_output(&list, &nodes, work).await?;
    emit(results, report, "stop")
}

/// Stop (tolerating nodes that were not running), then start
pub(super) async fn restart(
    ctx: &CommandContext,
    range: Option<String>,
    wait: bool,
    args: Vec<String>,
    report: ReportArgs,
) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let work = unit(move |node: NodeRef| {
        let args = args.clone();
        async move {
            match node.stop(true).await {
                Ok(()) => {}
                Err(e) if e.is_not_running() => {}
                Err(e) => return Err(e),
            }
            node.start(wait, args).await
        }
    });
    let results = map_with_output(&list, &nodes, work).await?;
    emit(results, report, "restart")
}

async fn init_nodes(list: &[usize], nodes: &[NodeRef], args: Vec<String>) -> TestbedResult<Vec<ExecutionResult>> {
    let work = unit(move |node: NodeRef| {
        let args = args.clone();
        async move { node.init(args).await }
    });
    map_with_output(list, nodes, work).await
}

async fn start_nodes_in(
    list: &[usize],
    nodes: &[NodeRef],
    wait: bool,
    args: Vec<String>,
) -> TestbedResult<Vec<ExecutionResult>> {
    let work = unit(move |node: NodeRef| {
        let args = args.clone();
        async move { node.start(wait, args).await }
    });
    map_with_output(list, nodes, work).await
}
