//! Fleet execution engine
//!
//! Fans a unit of work out across a selection of nodes, one task per
//! requested index, and collects the results in request order regardless of
//! completion order. Failures are per node and never cancel siblings.

use futures_util::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::error;

use shared::{logging::node_label, node_debug};

use crate::error::{TestbedError, TestbedResult};
use crate::traits::Node;
use crate::types::Output;

pub type NodeRef = Arc<dyn Node>;

pub type WorkFuture = BoxFuture<'static, TestbedResult<Output>>;

/// Work applied to one node
pub type UnitOfWork = Arc<dyn Fn(NodeRef) -> WorkFuture + Send + Sync>;

/// Box an async closure into a [`UnitOfWork`]
pub fn unit<F, Fut>(work: F) -> UnitOfWork
where
    F: Fn(NodeRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TestbedResult<Output>> + Send + 'static,
{
    Arc::new(move |node| work(node).boxed())
}

/// Outcome of one dispatched unit of work
#[derive(Debug)]
pub struct ExecutionResult {
    pub node: usize,
    pub output: Option<Output>,
    /// Already wrapped with the node index
    pub error: Option<TestbedError>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    fn from_outcome(node: usize, outcome: TestbedResult<Output>, elapsed: Duration) -> Self {
        match outcome {
            Ok(mut output) => {
                let error = output.error.take().map(|e| e.for_node(node));
                Self {
                    node,
                    output: Some(output),
                    error,
                    elapsed,
                }
            }
            Err(e) => Self {
                node,
                output: None,
                error: Some(e.for_node(node)),
                elapsed,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Exit code of the captured command, if one ran
    pub fn exit_code(&self) -> Option<i32> {
        self.output.as_ref().map(|o| o.exit_code)
    }
}

/// Reject any index outside `0..total` before work is dispatched
pub fn validate_range(list: &[usize], total: usize) -> TestbedResult<()> {
    match list.iter().find(|&&index| index >= total) {
        Some(&index) => Err(TestbedError::IndexOutOfRange { index, total }),
        None => Ok(()),
    }
}

/// Run `work` on every node named in `list`
pub async fn map_with_output(
    list: &[usize],
    nodes: &[NodeRef],
    work: UnitOfWork,
) -> TestbedResult<Vec<ExecutionResult>> {
    validate_range(list, nodes.len())?;
    let jobs = list.iter().map(|&index| (index, Arc::clone(&work))).collect();
    Ok(dispatch(jobs, nodes).await)
}

/// Run each unit on its own range, combined into one result set
///
/// Every range is validated before anything runs; results follow the order of
/// `ranges`, then the order within each range.
pub async fn map_list_with_output(
    ranges: &[Vec<usize>],
    nodes: &[NodeRef],
    units: Vec<UnitOfWork>,
) -> TestbedResult<Vec<ExecutionResult>> {
    if ranges.len() != units.len() {
        return Err(TestbedError::validation(format!(
            "{} ranges supplied for {} units of work",
            ranges.len(),
            units.len()
        )));
    }
    for list in ranges {
        validate_range(list, nodes.len())?;
    }

    let jobs = ranges
        .iter()
        .zip(units)
        .flat_map(|(list, work)| {
            list.iter()
                .map(move |&index| (index, Arc::clone(&work)))
                .collect::<Vec<_>>()
        })
        .collect();
    Ok(dispatch(jobs, nodes).await)
}

async fn dispatch(jobs: Vec<(usize, UnitOfWork)>, nodes: &[NodeRef]) -> Vec<ExecutionResult> {
    let indices: Vec<usize> = jobs.iter().map(|(index, _)| *index).collect();
    let results: Arc<Mutex<Vec<Option<ExecutionResult>>>> =
        Arc::new(Mutex::new(indices.iter().map(|_| None).collect()));

    let mut tasks = JoinSet::new();
    for (slot, (index, work)) in jobs.into_iter().enumerate() {
        let node = Arc::clone(&nodes[index]);
        let results = Arc::clone(&results);
        tasks.spawn(async move {
            let started = Instant::now();
            let outcome = work(node).await;
            let elapsed = started.elapsed();
            node_debug!(node_label(index), elapsed_ms = elapsed.as_millis() as u64, "unit of work finished");

            let result = ExecutionResult::from_outcome(index, outcome, elapsed);
            results.lock().await[slot] = Some(result);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("fleet task aborted: {}", e);
        }
    }

    let slots = std::mem::take(&mut *results.lock().await);
    slots
        .into_iter()
        .zip(indices)
        .map(|(slot, index)| {
            slot.unwrap_or_else(|| ExecutionResult {
                node: index,
                output: None,
                error: Some(TestbedError::process("task panicked before reporting").for_node(index)),
                elapsed: Duration::ZERO,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockNode;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fleet(count: usize) -> Vec<NodeRef> {
        (0..count)
            .map(|i| {
                let mut node = MockNode::new();
                node.expect_dir().return_const(PathBuf::from(i.to_string()));
                Arc::new(node) as NodeRef
            })
            .collect()
    }

    fn index_of(node: &NodeRef) -> usize {
        node.dir().to_string_lossy().parse().unwrap()
    }

    #[tokio::test]
    async fn test_results_in_request_order() {
        let nodes = fleet(5);
        // Lower indices sleep longer, so completion order is reversed.
        let work = unit(|node: NodeRef| async move {
            let i = index_of(&node);
            tokio::time::sleep(Duration::from_millis(10 * (5 - i as u64))).await;
            Ok(Output::new(vec![], i.to_string().into_bytes(), vec![], 0))
        });

        let results = map_with_output(&[4, 0, 2, 1, 3], &nodes, work).await.unwrap();
        let order: Vec<usize> = results.iter().map(|r| r.node).collect();
        assert_eq!(order, vec![4, 0, 2, 1, 3]);
        for result in &results {
            assert_eq!(result.output.as_ref().unwrap().stdout_str(), result.node.to_string());
        }
    }

    #[tokio::test]
    async fn test_out_of_range_does_no_work() {
        let nodes = fleet(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let work = unit(move |_node: NodeRef| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Output::empty(vec![]))
            }
        });

        let err = map_with_output(&[0, 1, 3], &nodes, work).await.unwrap_err();
        assert!(matches!(err, TestbedError::IndexOutOfRange { index: 3, total: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_are_per_node() {
        let nodes = fleet(3);
        let work = unit(|node: NodeRef| async move {
            if index_of(&node) == 1 {
                Err(TestbedError::process("daemon crashed"))
            } else {
                Ok(Output::empty(vec![]))
            }
        });

        let results = map_with_output(&[0, 1, 2], &nodes, work).await.unwrap();
        assert!(results[0].is_ok());
        assert!(results[2].is_ok());
        let err = results[1].error.as_ref().unwrap();
        assert_eq!(err.to_string(), "node[1]: Process error: daemon crashed");
        assert!(results[1].exit_code().is_none());
    }

    #[tokio::test]
    async fn test_carried_timeout_moves_to_result() {
        let nodes = fleet(1);
        let work = unit(|_node: NodeRef| async move {
            Ok(Output::timed_out(vec!["sleep".into()], Duration::from_millis(5)))
        });

        let results = map_with_output(&[0], &nodes, work).await.unwrap();
        assert_eq!(results[0].exit_code(), Some(crate::types::TIMEOUT_EXIT_CODE));
        assert!(results[0].error.as_ref().unwrap().is_timeout());
    }

    /// One node stalls past its deadline while its neighbour answers at once
    #[tokio::test]
    async fn test_per_node_deadlines_are_independent() {
        // Arrange
        let deadline = Duration::from_millis(50);
        let mut stalled = MockNode::new();
        stalled.expect_dir().return_const(PathBuf::from("0"));
        stalled.expect_run_cmd().never();
        let mut quick = MockNode::new();
        quick.expect_dir().return_const(PathBuf::from("1"));
        quick
            .expect_run_cmd()
            .times(1)
            .returning(|_, _, args| Ok(Output::new(args, b"QmQuick\n".to_vec(), vec![], 0)));
        let nodes: Vec<NodeRef> = vec![Arc::new(stalled), Arc::new(quick)];

        let work = unit(move |node: NodeRef| async move {
            let ctx = crate::types::ExecContext::with_timeout(deadline);
            let args: Vec<String> = vec!["ipfs".into(), "id".into()];
            let call_args = args.clone();
            let call = async move {
                if index_of(&node) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                node.run_cmd(ctx, None, call_args).await
            };
            match tokio::time::timeout(deadline, call).await {
                Ok(result) => result,
                Err(_) => Ok(Output::timed_out(args, deadline)),
            }
        });

        // Act
        let started = Instant::now();
        let results = map_with_output(&[0, 1], &nodes, work).await.unwrap();

        // Assert
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results[0].node, 0);
        assert_eq!(results[0].exit_code(), Some(crate::types::TIMEOUT_EXIT_CODE));
        assert!(results[0].error.as_ref().unwrap().is_timeout());
        assert!(results[0].elapsed >= deadline);

        assert_eq!(results[1].node, 1);
        assert!(results[1].is_ok());
        assert_eq!(results[1].output.as_ref().unwrap().stdout_str(), "QmQuick\n");
        assert!(results[1].elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_multi_range_flattens() {
        let nodes = fleet(4);
        let first = unit(|_node: NodeRef| async move { Ok(Output::new(vec![], b"a".to_vec(), vec![], 0)) });
        let second = unit(|_node: NodeRef| async move { Ok(Output::new(vec![], b"b".to_vec(), vec![], 0)) });

        let results = map_list_with_output(&[vec![0, 1], vec![3]], &nodes, vec![first, second])
            .await
            .unwrap();
        let summary: Vec<(usize, String)> = results
            .iter()
            .map(|r| (r.node, r.output.as_ref().unwrap().stdout_str()))
            .collect();
        assert_eq!(
            summary,
            vec![(0, "a".to_string()), (1, "a".to_string()), (3, "b".to_string())]
        );
    }

    #[tokio::test]
    async fn test_multi_range_validates_everything_first() {
        let nodes = fleet(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let make = |calls: Arc<AtomicUsize>| {
            unit(move |_node: NodeRef| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Output::empty(vec![]))
                }
            })
        };

        let result = map_list_with_output(
            &[vec![0], vec![9]],
            &nodes,
            vec![make(Arc::clone(&calls)), make(Arc::clone(&calls))],
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mismatch = map_list_with_output(&[vec![0]], &nodes, vec![]).await;
        assert!(matches!(mismatch, Err(TestbedError::ValidationError { .. })));
    }

    #[tokio::test]
    async fn test_panicking_unit_is_contained() {
        let nodes = fleet(2);
        let work = unit(|node: NodeRef| async move {
            if index_of(&node) == 0 {
                panic!("unit blew up");
            }
            Ok(Output::empty(vec![]))
        });

        let results = map_with_output(&[0, 1], &nodes, work).await.unwrap();
        assert!(results[0].error.is_some());
        assert!(results[1].is_ok());
    }
}
