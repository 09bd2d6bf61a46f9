//! Attribute, metric, log and plugin queries

use super::{emit, print_lines, AttrAction, CommandContext, ReportArgs};
use crate::core::{map_with_output, parse_range_or_all, unit, NodeRef};
use crate::error::{TestbedError, TestbedResult};
use crate::types::Output;

pub(super) async fn attr(ctx: &CommandContext, action: AttrAction) -> TestbedResult<()> {
    match action {
        AttrAction::Get { attr, range, report } => {
            let nodes = ctx.nodes().await?;
            let list = parse_range_or_all(range.as_deref(), nodes.len())?;
            let work = unit(move |node: NodeRef| {
                let attr = attr.clone();
                async move {
                    let value = node.get_attr(&attr).await?;
                    Ok(Output::text(vec!["attr".into(), "get".into(), attr], &value))
                }
            });
            emit(map_with_output(&list, &nodes, work).await?, report, "attr get")
        }
        AttrAction::Set {
            attr,
            value,
            range,
            report,
        } => {
            let nodes = ctx.nodes().await?;
            let list = parse_range_or_all(range.as_deref(), nodes.len())?;
            let work = unit(move |node: NodeRef| {
                let (attr, value) = (attr.clone(), value.clone());
                async move {
                    node.set_attr(&attr, &value).await?;
                    Ok(Output::empty(vec!["attr".into(), "set".into(), attr, value]))
                }
            });
            emit(map_with_output(&list, &nodes, work).await?, report, "attr set")
        }
        AttrAction::List { node, type_name } => match type_name {
            Some(type_name) => print_lines(ctx.registry.lookup(&type_name)?.attr_list()),
            None => print_lines(node_at(ctx, node).await?.attr_list()),
        },
        AttrAction::Describe { attr, node, type_name } => {
            let description = match type_name {
                Some(type_name) => ctx.registry.lookup(&type_name)?.attr_desc(&attr)?,
                None => node_at(ctx, node).await?.attr_desc(&attr)?,
            };
            print_lines([description])
        }
    }
}

pub(super) async fn metric(ctx: &CommandContext, metric: String, range: Option<String>, report: ReportArgs) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let work = unit(move |node: NodeRef| {
        let metric = metric.clone();
        async move {
            let value = node.metric(&metric).await?;
            Ok(Output::text(vec!["metric".into(), metric], &value))
        }
    });
    emit(map_with_output(&list, &nodes, work).await?, report, "metric")
}

pub(super) async fn logs(ctx: &CommandContext, range: Option<String>, report: ReportArgs) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let work = unit(|node: NodeRef| async move {
        let logs = node.logs().await?;
        Ok(Output::new(vec!["logs".into()], logs, Vec::new(), 0))
    });
    emit(map_with_output(&list, &nodes, work).await?, report, "logs")
}

pub(super) async fn events(ctx: &CommandContext, range: Option<String>, report: ReportArgs) -> TestbedResult<()> {
    let nodes = ctx.nodes().await?;
    let list = parse_range_or_all(range.as_deref(), nodes.len())?;
    let work = unit(|node: NodeRef| async move {
        let events = node.events().await?;
        Ok(Output::new(vec!["events".into()], events, Vec::new(), 0))
    });
    emit(map_with_output(&list, &nodes, work).await?, report, "events")
}

pub(super) fn plugins(ctx: &CommandContext) -> TestbedResult<()> {
    print_lines(
        ctx.registry
            .list()
            .map(|record| format!("{}\t{}\t{}", record.name, record.deployment, record.origin)),
    )
}

async fn node_at(ctx: &CommandContext, index: usize) -> TestbedResult<NodeRef> {
    let nodes = ctx.nodes().await?;
    nodes
        .get(index)
        .cloned()
        .ok_or(TestbedError::IndexOutOfRange {
            index,
            total: nodes.len(),
        })
}
