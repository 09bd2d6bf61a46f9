//! Test helpers and builder patterns for testbed tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use testbed::traits::MockNode;
use testbed::{ExecutionResult, NodeRef, Output, PluginRegistry};

use super::fixtures::TestFixtures;

/// Builder for fleets of mock nodes
pub struct FleetBuilder {
    count: usize,
    run_outputs: Vec<Option<(i32, &'static str)>>,
}

impl FleetBuilder {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            run_outputs: vec![None; count],
        }
    }

    /// Node `index` answers `run_cmd` with `stdout` and `exit_code`
    pub fn with_run_output(mut self, index: usize, exit_code: i32, stdout: &'static str) -> Self {
        self.run_outputs[index] = Some((exit_code, stdout));
        self
    }

    pub fn build(self) -> Vec<NodeRef> {
        self.run_outputs
            .into_iter()
            .enumerate()
            .take(self.count)
            .map(|(i, run)| {
                let mut node = MockNode::new();
                node.expect_dir().return_const(PathBuf::from(format!("/tb/{i}")));
                match run {
                    Some((code, stdout)) => {
                        node.expect_run_cmd().returning(move |_ctx, _stdin, args| {
                            Ok(Output::new(args, stdout.as_bytes().to_vec(), Vec::new(), code))
                        });
                    }
                    None => {
                        node.expect_run_cmd().never();
                    }
                }
                Arc::new(node) as NodeRef
            })
            .collect()
    }
}

pub struct TestHelpers;

impl TestHelpers {
    /// Write the scripted plugin and its manifest into `plugins_dir`
    pub async fn install_plugin(plugins_dir: &Path) -> PathBuf {
        tokio::fs::create_dir_all(plugins_dir).await.unwrap();
        let script = plugins_dir.join("simnode.sh");
        tokio::fs::write(&script, TestFixtures::plugin_script()).await.unwrap();
        let manifest = plugins_dir.join("simnode.json");
        tokio::fs::write(
            &manifest,
            TestFixtures::plugin_manifest(TestFixtures::PLUGIN_NAME, &script),
        )
        .await
        .unwrap();
        manifest
    }

    /// Registry with the built-ins plus the scripted plugin
    pub async fn registry_with_plugin(plugins_dir: &Path) -> PluginRegistry {
        Self::install_plugin(plugins_dir).await;
        let mut registry = PluginRegistry::with_builtins().unwrap();
        let report = registry.load(plugins_dir).await.unwrap();
        assert!(report.failures.is_empty(), "plugin failed to load: {:?}", report.failures);
        registry
    }

    /// Stdout of every result, in result order
    pub fn stdout_of(results: &[ExecutionResult]) -> Vec<String> {
        results
            .iter()
            .map(|r| r.output.as_ref().map(|o| o.stdout_str()).unwrap_or_default())
            .collect()
    }

    pub fn render(results: Vec<ExecutionResult>, encoding: testbed::Encoding, stats: bool) -> (String, testbed::TestbedResult<()>) {
        let mut out = Vec::new();
        let outcome = testbed::build_report(&mut out, results, encoding, "test", stats);
        (String::from_utf8(out).unwrap(), outcome)
    }
}
