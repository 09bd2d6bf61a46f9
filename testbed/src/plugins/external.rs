//! Process-boundary plugins
//!
//! An external node type is described by a JSON manifest. Every capability of
//! its nodes is carried out by running the plugin command with the operation
//! name and operands as arguments:
//!
//! ```text
//! <command> [args...] <operation> [operands...]
//! ```
//!
//! The node directory and its attributes are passed in `IPTB_NODE_DIR` and
//! `IPTB_NODE_ATTRS` (a JSON object). Stdout is the result; exit code 78 means
//! the operation is not implemented by the plugin.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shared::{node_debug, Attrs, DeploymentKind};

use crate::error::{TestbedError, TestbedResult};
use crate::nodes::exec::{capture_output, command_from};
use crate::nodes::ipfs;
use crate::plugins::registry::{Descriptor, NodeConstructor, PluginOrigin, PluginRecord};
use crate::traits::Node;
use crate::types::{ExecContext, Output};

pub const MANIFEST_EXTENSION: &str = "json";
pub const NODE_DIR_VAR: &str = "IPTB_NODE_DIR";
pub const NODE_ATTRS_VAR: &str = "IPTB_NODE_ATTRS";

/// Exit status a plugin uses for operations it does not support
pub const NOT_IMPLEMENTED_EXIT_CODE: i32 = 78;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub deployment: Option<DeploymentKind>,
    #[serde(default)]
    pub attrs: Vec<Descriptor>,
    #[serde(default)]
    pub metrics: Vec<Descriptor>,
}

impl PluginManifest {
    fn validate(&self, path: &Path) -> TestbedResult<()> {
        let problem = if self.name.trim().is_empty() {
            "name is empty"
        } else if self.name.chars().any(char::is_whitespace) {
            "name contains whitespace"
        } else if self.command.trim().is_empty() {
            "command is empty"
        } else {
            return Ok(());
        };
        Err(TestbedError::PluginLoadError {
            path: path.display().to_string(),
            message: problem.to_string(),
        })
    }

    pub fn into_record(self, path: PathBuf) -> PluginRecord {
        let manifest = Arc::new(self);
        let ctor_manifest = Arc::clone(&manifest);
        let constructor: NodeConstructor = Arc::new(move |dir: PathBuf, attrs: &Attrs| {
            Ok(Arc::new(ExecNode::new(dir, attrs.clone(), Arc::clone(&ctor_manifest))) as Arc<dyn Node>)
        });

        PluginRecord::new(
            manifest.name.clone(),
            manifest.deployment.unwrap_or(DeploymentKind::External),
            PluginOrigin::External(path),
            constructor,
        )
        .with_attrs(manifest.attrs.clone())
        .with_metrics(manifest.metrics.clone())
    }
}

pub async fn load_manifest(path: &Path) -> TestbedResult<PluginManifest> {
    let load_error = |message: String| TestbedError::PluginLoadError {
        path: path.display().to_string(),
        message,
    };
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| load_error(e.to_string()))?;
    let manifest: PluginManifest = serde_json::from_slice(&raw).map_err(|e| load_error(e.to_string()))?;
    manifest.validate(path)?;
    Ok(manifest)
}

/// Node whose capabilities are implemented by a plugin executable
pub struct ExecNode {
    dir: PathBuf,
    attrs: Attrs,
    manifest: Arc<PluginManifest>,
}

impl ExecNode {
    pub fn new(dir: PathBuf, attrs: Attrs, manifest: Arc<PluginManifest>) -> Self {
        Self { dir, attrs, manifest }
    }

    fn label(&self) -> String {
        self.dir.display().to_string()
    }

    fn argv(&self, operation: &str, operands: &[String]) -> Vec<String> {
        std::iter::once(self.manifest.command.clone())
            .chain(self.manifest.args.iter().cloned())
            .chain(std::iter::once(operation.to_string()))
            .chain(operands.iter().cloned())
            .collect()
    }

    async fn invoke(
        &self,
        ctx: ExecContext,
        stdin: Option<Vec<u8>>,
        operation: &str,
        operands: &[String],
    ) -> TestbedResult<Output> {
        let argv = self.argv(operation, operands);
        let mut cmd = command_from(&argv)?;
        cmd.env(NODE_DIR_VAR, &self.dir)
            .env(NODE_ATTRS_VAR, serde_json::to_string(&self.attrs)?);
        node_debug!(self.label(), plugin = %self.manifest.name, operation, "invoking plugin");

        let output = capture_output(cmd, ctx, stdin, argv).await?;
        if output.exit_code == NOT_IMPLEMENTED_EXIT_CODE {
            return Err(TestbedError::not_implemented(operation, &self.manifest.name));
        }
        Ok(output)
    }

    /// Invoke and require success
    async fn call(&self, operation: &str, operands: &[String]) -> TestbedResult<Output> {
        self.invoke(ExecContext::background(), None, operation, operands)
            .await?
            .into_result()
    }

    async fn call_text(&self, operation: &str, operands: &[String]) -> TestbedResult<String> {
        Ok(self.call(operation, operands).await?.stdout_str().trim().to_string())
    }
}

#[async_trait::async_trait]
impl Node for ExecNode {
    async fn init(&self, args: Vec<String>) -> TestbedResult<Output> {
        tokio::fs::create_dir_all(&self.dir).await?;
        self.call("init", &args).await
    }

    async fn start(&self, wait: bool, args: Vec<String>) -> TestbedResult<Output> {
        let operands: Vec<String> = std::iter::once(wait.to_string()).chain(args).collect();
        self.call("start", &operands).await
    }

    async fn stop(&self, wait: bool) -> TestbedResult<()> {
        self.call("stop", &[wait.to_string()]).await?;
        Ok(())
    }

    async fn run_cmd(
        &self,
        ctx: ExecContext,
        stdin: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> TestbedResult<Output> {
        self.invoke(ctx, stdin, "run", &args).await
    }

    async fn connect(&self, ctx: ExecContext, other: Arc<dyn Node>) -> TestbedResult<()> {
        if other.dir() == self.dir {
            return Ok(());
        }
        let addrs = other.swarm_addrs().await?;
        let addr = addrs.first().ok_or_else(|| {
            TestbedError::not_found("swarm address", other.dir().display().to_string())
        })?;
        self.invoke(ctx, None, "connect", &[addr.clone()])
            .await?
            .into_result()?;
        Ok(())
    }

    async fn shell(&self, nodes: Vec<Arc<dyn Node>>) -> TestbedResult<()> {
        use std::os::unix::process::CommandExt;

        let env = ipfs::shell_env(&nodes).await?;
        let argv = self.argv("shell", &[]);
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| TestbedError::validation("no plugin command"))?;
        let err = std::process::Command::new(program)
            .args(rest)
            .env(NODE_DIR_VAR, &self.dir)
            .env(NODE_ATTRS_VAR, serde_json::to_string(&self.attrs)?)
            .envs(env)
            .exec();
        Err(TestbedError::process(format!("failed to exec {program}: {err}")))
    }

    async fn peer_id(&self) -> TestbedResult<String> {
        self.call_text("peer-id", &[]).await
    }

    async fn api_addr(&self) -> TestbedResult<String> {
        self.call_text("api-addr", &[]).await
    }

    async fn swarm_addrs(&self) -> TestbedResult<Vec<String>> {
        let output = self.call("swarm-addrs", &[]).await?;
        Ok(ipfs::parse_swarm_addrs(&output.stdout_str()))
    }

    fn dir(&self) -> PathBuf {
        self.dir.clone()
    }

    fn type_name(&self) -> String {
        self.manifest.name.clone()
    }

    fn deployment(&self) -> DeploymentKind {
        self.manifest.deployment.unwrap_or(DeploymentKind::External)
    }

    fn attr_list(&self) -> Vec<String> {
        self.manifest.attrs.iter().map(|d| d.name.clone()).collect()
    }

    fn attr_desc(&self, name: &str) -> TestbedResult<String> {
        self.manifest
            .attrs
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.description.clone())
            .ok_or_else(|| TestbedError::not_found("attribute", name))
    }

    fn metric_list(&self) -> Vec<String> {
        self.manifest.metrics.iter().map(|d| d.name.clone()).collect()
    }

    fn metric_desc(&self, name: &str) -> TestbedResult<String> {
        self.manifest
            .metrics
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.description.clone())
            .ok_or_else(|| TestbedError::not_found("metric", name))
    }

    async fn get_attr(&self, name: &str) -> TestbedResult<String> {
        self.call_text("get-attr", &[name.to_string()]).await
    }

    async fn set_attr(&self, name: &str, value: &str) -> TestbedResult<()> {
        self.call("set-attr", &[name.to_string(), value.to_string()])
            .await?;
        Ok(())
    }

    async fn get_config(&self) -> TestbedResult<serde_json::Value> {
        let output = self.call("get-config", &[]).await?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn write_config(&self, config: serde_json::Value) -> TestbedResult<()> {
        let body = serde_json::to_vec(&config)?;
        self.invoke(ExecContext::background(), Some(body), "write-config", &[])
            .await?
            .into_result()?;
        Ok(())
    }

    async fn metric(&self, name: &str) -> TestbedResult<String> {
        self.call_text("metric", &[name.to_string()]).await
    }

    async fn logs(&self) -> TestbedResult<Vec<u8>> {
        Ok(self.call("logs", &[]).await?.stdout)
    }

    async fn events(&self) -> TestbedResult<Vec<u8>> {
        Ok(self.call("events", &[]).await?.stdout)
    }
}
