//! Local-process ipfs node

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;

use shared::{node_info, Attrs, DeploymentKind};

use crate::error::{TestbedError, TestbedResult};
use crate::nodes::exec::{capture_output, command_from};
use crate::nodes::ipfs::{self, IpfsSettings, DATA_DIR_VAR};
use crate::nodes::lifecycle::{EscalationStep, ProcessLifecycle};
use crate::nodes::liveness::{self, RetryPolicy};
use crate::traits::Node;
use crate::types::{ExecContext, Output};

pub const TYPE_NAME: &str = "localipfs";

/// Deadline for API calls made through a command prefix (curl)
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// ipfs daemon running as a plain child process of this machine
///
/// Every command can be wrapped in a prefix; the namespaced variant reuses
/// this type with `ip netns exec <name>` in front of everything it runs.
pub struct LocalNode {
    dir: PathBuf,
    settings: IpfsSettings,
    lifecycle: ProcessLifecycle,
    client: reqwest::Client,
    liveness: RetryPolicy,
    prefix: Vec<String>,
    type_name: &'static str,
    deployment: DeploymentKind,
    peer_id: OnceCell<String>,
}

impl LocalNode {
    pub fn new(dir: PathBuf, attrs: &Attrs) -> TestbedResult<Self> {
        Self::wrapped(dir, attrs, Vec::new(), TYPE_NAME, DeploymentKind::Local)
    }

    pub(crate) fn wrapped(
        dir: PathBuf,
        attrs: &Attrs,
        prefix: Vec<String>,
        type_name: &'static str,
        deployment: DeploymentKind,
    ) -> TestbedResult<Self> {
        Ok(Self {
            settings: IpfsSettings::from_attrs(attrs)?,
            lifecycle: ProcessLifecycle::new(dir.clone()),
            client: liveness::api_client()?,
            liveness: RetryPolicy::default(),
            prefix,
            type_name,
            deployment,
            peer_id: OnceCell::new(),
            dir,
        })
    }

    pub fn with_liveness(mut self, liveness: RetryPolicy) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_escalation(mut self, escalation: Vec<EscalationStep>) -> Self {
        self.lifecycle = ProcessLifecycle::new(self.dir.clone()).with_escalation(escalation);
        self
    }

    pub fn settings(&self) -> &IpfsSettings {
        &self.settings
    }

    pub fn lifecycle(&self) -> &ProcessLifecycle {
        &self.lifecycle
    }

    fn label(&self) -> String {
        self.dir.display().to_string()
    }

    fn binary_args(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.settings.binary.clone())
            .chain(args.iter().map(|a| a.to_string()))
            .collect()
    }

    /// Command in this node's environment, with the prefix applied
    fn command(&self, args: &[String]) -> TestbedResult<Command> {
        let full: Vec<String> = self.prefix.iter().chain(args).cloned().collect();
        let mut cmd = command_from(&full)?;
        cmd.env(DATA_DIR_VAR, &self.dir);
        Ok(cmd)
    }

    async fn exec(
        &self,
        ctx: ExecContext,
        stdin: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> TestbedResult<Output> {
        let cmd = self.command(&args)?;
        capture_output(cmd, ctx, stdin, args).await
    }

    /// GET an API path, from inside the prefix when there is one
    async fn api_get(&self, path: &str) -> TestbedResult<Vec<u8>> {
        let addr = ipfs::api_addr_from_repo(&self.dir).await?;
        let url = format!("http://{addr}{path}");
        if self.prefix.is_empty() {
            let body = self.client.get(url).send().await?.bytes().await?;
            return Ok(body.to_vec());
        }
        let args = vec!["curl".to_string(), "-s".to_string(), url];
        let output = self
            .exec(ExecContext::with_timeout(IDENTITY_TIMEOUT), None, args)
            .await?
            .into_result()?;
        Ok(output.stdout)
    }

    async fn query_identity(&self) -> TestbedResult<String> {
        let body = self.api_get("/api/v0/id").await?;
        liveness::parse_identity(&body)
    }

    async fn remove_stale_api_file(&self) -> TestbedResult<()> {
        match tokio::fs::remove_file(self.dir.join(ipfs::API_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl Node for LocalNode {
    async fn init(&self, args: Vec<String>) -> TestbedResult<Output> {
        tokio::fs::create_dir_all(&self.dir).await?;
        if ipfs::config_exists(&self.dir) {
            return Err(TestbedError::validation(format!(
                "{} is already initialized",
                self.label()
            )));
        }

        let mut argv = self.binary_args(&["init"]);
        argv.extend(args);
        let output = self
            .exec(ExecContext::background(), None, argv)
            .await?
            .into_result()?;

        let mut config = ipfs::load_config(&self.dir).await?;
        ipfs::apply_init_config(&mut config, &self.settings, &self.settings.bind_ip, 0, 0);
        ipfs::write_config(&self.dir, &config).await?;

        node_info!(self.label(), "repo initialized");
        Ok(output)
    }

    async fn start(&self, wait: bool, args: Vec<String>) -> TestbedResult<Output> {
        if self.lifecycle.is_running().await? {
            return Err(TestbedError::AlreadyRunning { dir: self.label() });
        }
        self.remove_stale_api_file().await?;

        let mut argv = self.binary_args(&["daemon"]);
        argv.extend(args);
        let cmd = self.command(&argv)?;
        self.lifecycle.spawn(cmd).await?;

        if wait {
            let peer_id = self.peer_id().await?;
            liveness::wait_for_identity(&peer_id, self.liveness, || self.query_identity()).await?;
            node_info!(self.label(), %peer_id, "daemon is live");
        }
        Ok(Output::empty(argv))
    }

    async fn stop(&self, wait: bool) -> TestbedResult<()> {
        if !wait {
            return self.lifecycle.signal_only().await;
        }
        let report = self.lifecycle.stop().await?;
        node_info!(self.label(), pid = report.pid, signals = report.signals.len(), "daemon stopped");
        Ok(())
    }

    async fn run_cmd(
        &self,
        ctx: ExecContext,
        stdin: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> TestbedResult<Output> {
        self.exec(ctx, stdin, args).await
    }

    async fn connect(&self, ctx: ExecContext, other: Arc<dyn Node>) -> TestbedResult<()> {
        if other.dir() == self.dir {
            return Ok(());
        }
        let addrs = other.swarm_addrs().await?;
        let addr = addrs.first().ok_or_else(|| {
            TestbedError::not_found("swarm address", other.dir().display().to_string())
        })?;

        let argv = self.binary_args(&["swarm", "connect", addr.as_str()]);
        self.exec(ctx, None, argv).await?.into_result()?;
        Ok(())
    }

    async fn shell(&self, nodes: Vec<Arc<dyn Node>>) -> TestbedResult<()> {
        use std::os::unix::process::CommandExt;

        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TestbedError::config("no shell found: SHELL is not set"))?;
        if std::env::var_os(DATA_DIR_VAR).is_some_and(|v| !v.is_empty()) {
            return Err(TestbedError::validation(format!(
                "shell has {DATA_DIR_VAR} set, please unset it before using the testbed shell"
            )));
        }

        let env = ipfs::shell_env(&nodes).await?;
        let argv: Vec<String> = self.prefix.iter().cloned().chain([shell.clone()]).collect();
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| TestbedError::validation("no shell command"))?;

        let err = std::process::Command::new(program)
            .args(rest)
            .env(DATA_DIR_VAR, &self.dir)
            .envs(env)
            .exec();
        Err(TestbedError::process(format!("failed to exec {shell}: {err}")))
    }

    async fn peer_id(&self) -> TestbedResult<String> {
        let id = self
            .peer_id
            .get_or_try_init(|| async {
                let config = ipfs::load_config(&self.dir).await?;
                ipfs::peer_id_from_config(&config)
            })
            .await?;
        Ok(id.clone())
    }

    async fn api_addr(&self) -> TestbedResult<String> {
        ipfs::api_addr_from_repo(&self.dir).await
    }

    async fn swarm_addrs(&self) -> TestbedResult<Vec<String>> {
        let argv = self.binary_args(&["id", "-f", "<addrs>"]);
        let output = self
            .exec(ExecContext::background(), None, argv)
            .await?
            .into_result()?;
        Ok(ipfs::parse_swarm_addrs(&output.stdout_str()))
    }

    fn dir(&self) -> PathBuf {
        self.dir.clone()
    }

    fn type_name(&self) -> String {
        self.type_name.to_string()
    }

    fn deployment(&self) -> DeploymentKind {
        self.deployment
    }

    fn attr_list(&self) -> Vec<String> {
        ipfs::base_attr_list()
    }

    fn attr_desc(&self, name: &str) -> TestbedResult<String> {
        ipfs::base_attr_desc(name)
    }

    fn metric_list(&self) -> Vec<String> {
        ipfs::metric_list()
    }

    fn metric_desc(&self, name: &str) -> TestbedResult<String> {
        ipfs::metric_desc(name)
    }

    async fn get_attr(&self, name: &str) -> TestbedResult<String> {
        match name {
            ipfs::ATTR_ID => self.peer_id().await,
            ipfs::ATTR_PATH => Ok(self.label()),
            ipfs::ATTR_API => self.api_addr().await,
            ipfs::ATTR_SWARM => Ok(self.swarm_addrs().await?.join("\n")),
            other => Err(TestbedError::not_found("attribute", other)),
        }
    }

    async fn set_attr(&self, name: &str, _value: &str) -> TestbedResult<()> {
        Err(TestbedError::not_implemented(
            format!("set_attr {name}"),
            self.type_name,
        ))
    }

    async fn get_config(&self) -> TestbedResult<serde_json::Value> {
        ipfs::load_config(&self.dir).await
    }

    async fn write_config(&self, config: serde_json::Value) -> TestbedResult<()> {
        ipfs::write_config(&self.dir, &config).await
    }

    async fn metric(&self, name: &str) -> TestbedResult<String> {
        ipfs::metric_desc(name)?;
        let body = self.api_get("/api/v0/stats/bw").await?;
        let bandwidth = ipfs::parse_bandwidth(&body)?;
        ipfs::bandwidth_metric(name, &bandwidth)
    }

    async fn logs(&self) -> TestbedResult<Vec<u8>> {
        ipfs::read_captures(&self.lifecycle.stdout_path(), &self.lifecycle.stderr_path()).await
    }

    async fn events(&self) -> TestbedResult<Vec<u8>> {
        Err(TestbedError::not_implemented("events", self.type_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_wraps_commands() {
        let node = LocalNode::wrapped(
            PathBuf::from("/tmp/tb/0"),
            &Attrs::new(),
            vec!["ip".into(), "netns".into(), "exec".into(), "ns0".into()],
            "netnsipfs",
            DeploymentKind::Netns,
        )
        .unwrap();

        let cmd = node.command(&node.binary_args(&["id"])).unwrap();
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "ip");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["netns", "exec", "ns0", "ipfs", "id"]);
    }

    #[test]
    fn test_rejects_unknown_listen_type() {
        let mut attrs = Attrs::new();
        attrs.insert("listentype".into(), "quic".into());
        assert!(LocalNode::new(PathBuf::from("/tmp/tb/0"), &attrs).is_err());
    }

    #[tokio::test]
    async fn test_unsupported_operations_are_explicit() {
        let node = LocalNode::new(PathBuf::from("/tmp/tb/0"), &Attrs::new()).unwrap();
        let err = node.set_attr("latency", "10ms").await.unwrap_err();
        assert!(matches!(err, TestbedError::NotImplemented { .. }));
        let err = node.events().await.unwrap_err();
        assert!(matches!(err, TestbedError::NotImplemented { .. }));
    }
}
