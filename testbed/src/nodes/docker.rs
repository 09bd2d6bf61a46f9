//! ipfs node running in a docker container
//!
//! The repo is initialised on the host and bind-mounted into the container at
//! `/data/ipfs`. The container id is kept in a `dockerid` file so any later
//! invocation can find it again.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use shared::{node_debug, node_info, node_warn, Attrs, DeploymentKind};

use crate::error::{TestbedError, TestbedResult};
use crate::nodes::exec::{capture_output, command_from};
use crate::nodes::ipfs::{self, IpfsSettings, DATA_DIR_VAR};
use crate::nodes::liveness::{self, RetryPolicy};
use crate::nodes::netem::{self, LinkShaping};
use crate::traits::Node;
use crate::types::{ExecContext, Output};

pub const TYPE_NAME: &str = "dockeripfs";
pub const DEFAULT_IMAGE: &str = "ipfs/go-ipfs";
pub const CONTAINER_ID_FILE: &str = "dockerid";
pub const CONTAINER_DATA_DIR: &str = "/data/ipfs";

pub const ATTR_IFNAME: &str = "ifname";

const SWARM_PORT: u16 = 4001;
const API_PORT: u16 = 5001;
const CONTAINER_BINARY: &str = "ipfs";

/// Host-side peer index from container `ip link` output
///
/// The container's veth shows up as `45: eth0@if46: <...>`; the number after
/// `@if` is the index of its peer on the host.
pub fn container_peer_index(ip_link: &str) -> Option<String> {
    ip_link.lines().find_map(|line| {
        let name = line.split_whitespace().nth(1)?;
        let (_, peer) = name.split_once("@if")?;
        let index = peer.trim_end_matches(':');
        (!index.is_empty()).then(|| index.to_string())
    })
}

/// Host interface name for `index` from host `ip link` output
pub fn host_interface(ip_link: &str, index: &str) -> Option<String> {
    let prefix = format!("{index}: ");
    ip_link
        .lines()
        .find(|line| line.starts_with(&prefix))
        .and_then(|line| line.split_whitespace().nth(1))
        .map(|name| name.split('@').next().unwrap_or(name).trim_end_matches(':').to_string())
}

/// Container address from `docker inspect` output
pub fn inspect_ip(inspect: &[u8]) -> TestbedResult<String> {
    let info: serde_json::Value = serde_json::from_slice(inspect)?;
    info.get(0)
        .and_then(|c| c.pointer("/NetworkSettings/IPAddress"))
        .and_then(serde_json::Value::as_str)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TestbedError::not_found("container field", "NetworkSettings.IPAddress"))
}

pub struct DockerNode {
    dir: PathBuf,
    settings: IpfsSettings,
    image: String,
    repobuilder: String,
    client: reqwest::Client,
    liveness: RetryPolicy,
    peer_id: OnceCell<String>,
}

impl DockerNode {
    pub fn new(dir: PathBuf, attrs: &Attrs) -> TestbedResult<Self> {
        let settings = IpfsSettings::from_attrs(attrs)?;
        Ok(Self {
            image: attrs
                .get("image")
                .cloned()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            repobuilder: attrs
                .get("repobuilder")
                .cloned()
                .unwrap_or_else(|| settings.binary.clone()),
            settings,
            client: liveness::api_client()?,
            liveness: RetryPolicy::default(),
            peer_id: OnceCell::new(),
            dir,
        })
    }

    pub fn with_liveness(mut self, liveness: RetryPolicy) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    fn label(&self) -> String {
        self.dir.display().to_string()
    }

    fn id_path(&self) -> PathBuf {
        self.dir.join(CONTAINER_ID_FILE)
    }

    async fn container_id(&self) -> TestbedResult<String> {
        match tokio::fs::read_to_string(self.id_path()).await {
            Ok(raw) if !raw.trim().is_empty() => Ok(raw.trim().to_string()),
            Ok(_) => Err(TestbedError::NotRunning { dir: self.label() }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TestbedError::NotRunning { dir: self.label() }),
            Err(e) => Err(e.into()),
        }
    }

    async fn docker(&self, ctx: ExecContext, stdin: Option<Vec<u8>>, args: &[&str]) -> TestbedResult<Output> {
        let argv: Vec<String> = std::iter::once("docker")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        capture_output(command_from(&argv)?, ctx, stdin, argv).await
    }

    /// Whether the recorded container is still running
    async fn is_alive(&self) -> TestbedResult<bool> {
        let id = match self.container_id().await {
            Ok(id) => id,
            Err(e) if e.is_not_running() => return Ok(false),
            Err(e) => return Err(e),
        };
        let output = self
            .docker(ExecContext::background(), None, &["inspect", "-f", "{{.State.Running}}", id.as_str()])
            .await?;
        Ok(output.success() && output.stdout_str().trim() == "true")
    }

    async fn kill_container(&self, id: &str) -> TestbedResult<()> {
        self.docker(ExecContext::background(), None, &["kill", "--signal=INT", id])
            .await?
            .into_result()?;
        Ok(())
    }

    async fn container_ip(&self, id: &str) -> TestbedResult<String> {
        let output = self
            .docker(ExecContext::background(), None, &["inspect", id])
            .await?
            .into_result()?;
        inspect_ip(&output.stdout)
    }

    async fn query_identity(&self) -> TestbedResult<String> {
        let addr = self.api_addr().await?;
        liveness::http_identity(&self.client, &addr).await
    }

    /// Host-side veth of the container's network interface
    async fn interface_name(&self) -> TestbedResult<String> {
        let inside = self
            .run_cmd(ExecContext::background(), None, vec!["ip".into(), "link".into()])
            .await?
            .into_result()?;
        let index = container_peer_index(&inside.stdout_str())
            .ok_or_else(|| TestbedError::not_found("container-side interface", self.label()))?;

        let argv = vec!["ip".to_string(), "link".to_string()];
        let host = capture_output(command_from(&argv)?, ExecContext::background(), None, argv)
            .await?
            .into_result()?;
        host_interface(&host.stdout_str(), &index)
            .ok_or_else(|| TestbedError::not_found("host interface with index", index))
    }

    async fn apply_shaping(&self, name: &str, value: &str) -> TestbedResult<()> {
        let mut shaping = LinkShaping::load(&self.dir).await?;
        shaping.set(name, value)?;

        let interface = self.interface_name().await?;
        let argv: Vec<String> = std::iter::once("tc".to_string())
            .chain(shaping.to_tc_args(&interface))
            .collect();
        node_debug!(self.label(), command = %argv.join(" "), "shaping link");
        capture_output(command_from(&argv)?, ExecContext::background(), None, argv)
            .await?
            .into_result()?;

        shaping.save(&self.dir).await
    }
}

#[async_trait::async_trait]
impl Node for DockerNode {
    async fn init(&self, args: Vec<String>) -> TestbedResult<Output> {
        tokio::fs::create_dir_all(&self.dir).await?;
        if ipfs::config_exists(&self.dir) {
            return Err(TestbedError::validation(format!(
                "{} is already initialized",
                self.label()
            )));
        }

        let argv: Vec<String> = [self.repobuilder.clone(), "init".to_string()]
            .into_iter()
            .chain(args)
            .collect();
        let mut cmd = command_from(&argv)?;
        cmd.env(DATA_DIR_VAR, &self.dir);
        let output = capture_output(cmd, ExecContext::background(), None, argv)
            .await?
            .into_result()?;

        let mut config = ipfs::load_config(&self.dir).await?;
        ipfs::apply_init_config(&mut config, &self.settings, "0.0.0.0", SWARM_PORT, API_PORT);
        ipfs::write_config(&self.dir, &config).await?;

        node_info!(self.label(), image = %self.image, "repo initialized");
        Ok(output)
    }

    async fn start(&self, wait: bool, args: Vec<String>) -> TestbedResult<Output> {
        if self.is_alive().await? {
            return Err(TestbedError::AlreadyRunning { dir: self.label() });
        }

        let volume = format!("{}:{CONTAINER_DATA_DIR}", self.dir.display());
        let mut run_args = vec!["run", "-d", "-v", volume.as_str(), self.image.as_str()];
        run_args.extend(args.iter().map(String::as_str));
        let output = self
            .docker(ExecContext::background(), None, &run_args)
            .await?
            .into_result()?;

        let id = output.stdout_str().trim().to_string();
        if let Err(e) = tokio::fs::write(self.id_path(), &id).await {
            let mut errors = vec![TestbedError::from(e)];
            if let Err(kill_err) = self.kill_container(&id).await {
                errors.push(kill_err);
            }
            return Err(TestbedError::Aggregate(errors));
        }
        node_info!(self.label(), container = %id, "container started");

        if wait {
            let peer_id = self.peer_id().await?;
            liveness::wait_for_identity(&peer_id, self.liveness, || self.query_identity()).await?;
            node_info!(self.label(), %peer_id, "daemon is live");
        }
        Ok(output)
    }

    async fn stop(&self, _wait: bool) -> TestbedResult<()> {
        let id = self.container_id().await?;
        self.kill_container(&id).await?;
        match tokio::fs::remove_file(self.id_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        node_info!(self.label(), container = %id, "container stopped");
        Ok(())
    }

    async fn run_cmd(
        &self,
        ctx: ExecContext,
        stdin: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> TestbedResult<Output> {
        let id = self.container_id().await?;
        let mut exec_args = vec!["exec"];
        if stdin.is_some() {
            exec_args.push("-i");
        }
        exec_args.push(id.as_str());
        exec_args.extend(args.iter().map(String::as_str));
        self.docker(ctx, stdin, &exec_args).await
    }

    async fn connect(&self, ctx: ExecContext, other: Arc<dyn Node>) -> TestbedResult<()> {
        if other.dir() == self.dir {
            return Ok(());
        }
        let addrs = other.swarm_addrs().await?;
        let addr = addrs.first().ok_or_else(|| {
            TestbedError::not_found("swarm address", other.dir().display().to_string())
        })?;

        let argv = [CONTAINER_BINARY, "swarm", "connect", addr.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        self.run_cmd(ctx, None, argv).await?.into_result()?;
        Ok(())
    }

    async fn shell(&self, nodes: Vec<Arc<dyn Node>>) -> TestbedResult<()> {
        use std::os::unix::process::CommandExt;

        let id = self.container_id().await?;
        let mut argv = vec!["exec".to_string(), "-it".to_string()];
        for (key, value) in ipfs::shell_env(&nodes).await? {
            argv.push("-e".to_string());
            argv.push(format!("{key}={value}"));
        }
        argv.push(id);
        argv.push("/bin/sh".to_string());

        let err = std::process::Command::new("docker").args(&argv).exec();
        Err(TestbedError::process(format!("failed to exec docker: {err}")))
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

    /// Container address with the configured API port
    async fn api_addr(&self) -> TestbedResult<String> {
        let id = self.container_id().await?;
        let ip = self.container_ip(&id).await?;
        let configured = ipfs::api_addr_from_repo(&self.dir).await?;
        let port = configured
            .rsplit_once(':')
            .map(|(_, port)| port.to_string())
            .unwrap_or_else(|| API_PORT.to_string());
        Ok(format!("{ip}:{port}"))
    }

    async fn swarm_addrs(&self) -> TestbedResult<Vec<String>> {
        let argv = [CONTAINER_BINARY, "id", "-f", "<addrs>"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self
            .run_cmd(ExecContext::background(), None, argv)
            .await?
            .into_result()?;
        Ok(ipfs::parse_swarm_addrs(&output.stdout_str()))
    }

    fn dir(&self) -> PathBuf {
        self.dir.clone()
    }

    fn type_name(&self) -> String {
        TYPE_NAME.to_string()
    }

    fn deployment(&self) -> DeploymentKind {
        DeploymentKind::Docker
    }

    fn attr_list(&self) -> Vec<String> {
        let mut attrs = ipfs::base_attr_list();
        attrs.push(ATTR_IFNAME.to_string());
        attrs.extend(netem::shaping_attrs());
        attrs
    }

    fn attr_desc(&self, name: &str) -> TestbedResult<String> {
        if name == ATTR_IFNAME {
            return Ok("host-side network interface of the container".to_string());
        }
        match netem::shaping_desc(name) {
            Some(desc) => Ok(desc.to_string()),
            None => ipfs::base_attr_desc(name),
        }
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
            ATTR_IFNAME => self.interface_name().await,
            other if netem::shaping_desc(other).is_some() => {
                let shaping = LinkShaping::load(&self.dir).await?;
                Ok(shaping.get(other).unwrap_or_default())
            }
            other => Err(TestbedError::not_found("attribute", other)),
        }
    }

    async fn set_attr(&self, name: &str, value: &str) -> TestbedResult<()> {
        if netem::shaping_desc(name).is_none() {
            return Err(TestbedError::not_found("settable attribute", name));
        }
        self.apply_shaping(name, value).await?;
        node_info!(self.label(), attr = name, value, "link shaping applied");
        Ok(())
    }

    async fn get_config(&self) -> TestbedResult<serde_json::Value> {
        ipfs::load_config(&self.dir).await
    }

    async fn write_config(&self, config: serde_json::Value) -> TestbedResult<()> {
        ipfs::write_config(&self.dir, &config).await
    }

    async fn metric(&self, name: &str) -> TestbedResult<String> {
        ipfs::metric_desc(name)?;
        let addr = self.api_addr().await?;
        let bandwidth = ipfs::http_bandwidth(&self.client, &addr).await?;
        ipfs::bandwidth_metric(name, &bandwidth)
    }

    async fn logs(&self) -> TestbedResult<Vec<u8>> {
        let id = self.container_id().await?;
        let output = self
            .docker(ExecContext::background(), None, &["logs", id.as_str()])
            .await?;
        if !output.success() {
            node_warn!(self.label(), code = output.exit_code, "docker logs failed");
        }
        let output = output.into_result()?;
        let mut logs = output.stdout;
        logs.extend(output.stderr);
        Ok(logs)
    }

    async fn events(&self) -> TestbedResult<Vec<u8>> {
        Err(TestbedError::not_implemented("events", TYPE_NAME))
    }
}
