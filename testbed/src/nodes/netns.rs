//! ipfs node whose daemon runs inside a Linux network namespace
//!
//! The namespace itself is provisioned outside the testbed (`ip netns add`);
//! this node only checks that it exists and runs everything through
//! `ip netns exec <name>`.

use std::path::PathBuf;
use std::sync::Arc;

use shared::{Attrs, DeploymentKind};

use crate::error::{TestbedError, TestbedResult};
use crate::nodes::exec::{capture_output, command_from};
use crate::nodes::local::LocalNode;
use crate::nodes::liveness::RetryPolicy;
use crate::traits::Node;
use crate::types::{ExecContext, Output};

pub const TYPE_NAME: &str = "netnsipfs";
pub const ATTR_NETNS: &str = "netns";

/// Namespace used when the spec carries no `netns` attribute
pub fn default_namespace(dir: &std::path::Path) -> String {
    let base = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("iptb-{base}")
}

/// Whether `name` appears in `ip netns list` output
///
/// Lines look like `ns0` or `ns0 (id: 3)`.
pub fn namespace_listed(list_output: &str, name: &str) -> bool {
    list_output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|ns| ns == name)
}

pub struct NetnsNode {
    namespace: String,
    inner: LocalNode,
}

impl NetnsNode {
    pub fn new(dir: PathBuf, attrs: &Attrs) -> TestbedResult<Self> {
        let namespace = attrs
            .get(ATTR_NETNS)
            .cloned()
            .unwrap_or_else(|| default_namespace(&dir));
        let prefix = ["ip", "netns", "exec", namespace.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let inner = LocalNode::wrapped(dir, attrs, prefix, TYPE_NAME, DeploymentKind::Netns)?;
        Ok(Self { namespace, inner })
    }

    pub fn with_liveness(mut self, liveness: RetryPolicy) -> Self {
        self.inner = self.inner.with_liveness(liveness);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ensure_namespace(&self) -> TestbedResult<()> {
        let args = vec!["ip".to_string(), "netns".to_string(), "list".to_string()];
        let output = capture_output(command_from(&args)?, ExecContext::background(), None, args)
            .await?
            .into_result()?;
        if namespace_listed(&output.stdout_str(), &self.namespace) {
            Ok(())
        } else {
            Err(TestbedError::not_found("network namespace", &self.namespace))
        }
    }
}

#[async_trait::async_trait]
impl Node for NetnsNode {
    async fn init(&self, args: Vec<String>) -> TestbedResult<Output> {
        self.ensure_namespace().await?;
        self.inner.init(args).await
    }

    async fn start(&self, wait: bool, args: Vec<String>) -> TestbedResult<Output> {
        self.ensure_namespace().await?;
        self.inner.start(wait, args).await
    }

    async fn stop(&self, wait: bool) -> TestbedResult<()> {
        self.inner.stop(wait).await
    }

    async fn run_cmd(
        &self,
        ctx: ExecContext,
        stdin: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> TestbedResult<Output> {
        self.inner.run_cmd(ctx, stdin, args).await
    }

    async fn connect(&self, ctx: ExecContext, other: Arc<dyn Node>) -> TestbedResult<()> {
        self.inner.connect(ctx, other).await
    }

    async fn shell(&self, nodes: Vec<Arc<dyn Node>>) -> TestbedResult<()> {
        self.inner.shell(nodes).await
    }

    async fn peer_id(&self) -> TestbedResult<String> {
        self.inner.peer_id().await
    }

    async fn api_addr(&self) -> TestbedResult<String> {
        self.inner.api_addr().await
    }

    async fn swarm_addrs(&self) -> TestbedResult<Vec<String>> {
        self.inner.swarm_addrs().await
    }

    fn dir(&self) -> PathBuf {
        self.inner.dir()
    }

    fn type_name(&self) -> String {
        TYPE_NAME.to_string()
    }

    fn deployment(&self) -> DeploymentKind {
        DeploymentKind::Netns
    }

    fn attr_list(&self) -> Vec<String> {
        let mut attrs = self.inner.attr_list();
        attrs.push(ATTR_NETNS.to_string());
        attrs
    }

    fn attr_desc(&self, name: &str) -> TestbedResult<String> {
        match name {
            ATTR_NETNS => Ok("network namespace the daemon runs in".to_string()),
            other => self.inner.attr_desc(other),
        }
    }

    fn metric_list(&self) -> Vec<String> {
        self.inner.metric_list()
    }

    fn metric_desc(&self, name: &str) -> TestbedResult<String> {
        self.inner.metric_desc(name)
    }

    async fn get_attr(&self, name: &str) -> TestbedResult<String> {
        match name {
            ATTR_NETNS => Ok(self.namespace.clone()),
            other => self.inner.get_attr(other).await,
        }
    }

    async fn set_attr(&self, name: &str, value: &str) -> TestbedResult<()> {
        self.inner.set_attr(name, value).await
    }

    async fn get_config(&self) -> TestbedResult<serde_json::Value> {
        self.inner.get_config().await
    }

    async fn write_config(&self, config: serde_json::Value) -> TestbedResult<()> {
        self.inner.write_config(config).await
    }

    async fn metric(&self, name: &str) -> TestbedResult<String> {
        self.inner.metric(name).await
    }

    async fn logs(&self) -> TestbedResult<Vec<u8>> {
        self.inner.logs().await
    }

    async fn events(&self) -> TestbedResult<Vec<u8>> {
        self.inner.events().await
    }
}
