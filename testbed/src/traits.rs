//! Node capability set with mockall annotations for testing
//!
//! Every deployment variant (local process, docker container, network
//! namespace, external plugin) implements [`Node`]; the fleet engine and the
//! commands only ever see `Arc<dyn Node>`.

use std::path::PathBuf;
use std::sync::Arc;

use shared::DeploymentKind;

use crate::error::TestbedResult;
use crate::types::{ExecContext, Output};

/// One member of a testbed
#[mockall::automock]
#[async_trait::async_trait]
pub trait Node: Send + Sync {
    /// Create the node's on-disk state; fails when it already exists
    async fn init(&self, args: Vec<String>) -> TestbedResult<Output>;

    /// Launch the daemon; with `wait` set, return only once it is reachable
    async fn start(&self, wait: bool, args: Vec<String>) -> TestbedResult<Output>;

    /// Shut the daemon down; with `wait` set, escalate until it has exited
    async fn stop(&self, wait: bool) -> TestbedResult<()>;

    /// Execute a command in the node's environment and capture its output
    async fn run_cmd(
        &self,
        ctx: ExecContext,
        stdin: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> TestbedResult<Output>;

    /// Dial `other` using its first swarm address
    async fn connect(&self, ctx: ExecContext, other: Arc<dyn Node>) -> TestbedResult<()>;

    /// Replace the current process with an interactive shell bound to this node
    async fn shell(&self, nodes: Vec<Arc<dyn Node>>) -> TestbedResult<()>;

    async fn peer_id(&self) -> TestbedResult<String>;

    /// API address as `host:port`
    async fn api_addr(&self) -> TestbedResult<String>;

    async fn swarm_addrs(&self) -> TestbedResult<Vec<String>>;

    fn dir(&self) -> PathBuf;

    fn type_name(&self) -> String;

    fn deployment(&self) -> DeploymentKind;

    fn attr_list(&self) -> Vec<String>;

    fn attr_desc(&self, name: &str) -> TestbedResult<String>;

    fn metric_list(&self) -> Vec<String>;

    fn metric_desc(&self, name: &str) -> TestbedResult<String>;

    async fn get_attr(&self, name: &str) -> TestbedResult<String>;

    async fn set_attr(&self, name: &str, value: &str) -> TestbedResult<()>;

    async fn get_config(&self) -> TestbedResult<serde_json::Value>;

    async fn write_config(&self, config: serde_json::Value) -> TestbedResult<()>;

    async fn metric(&self, name: &str) -> TestbedResult<String>;

    /// Captured daemon output
    async fn logs(&self) -> TestbedResult<Vec<u8>>;

    async fn events(&self) -> TestbedResult<Vec<u8>>;
}
