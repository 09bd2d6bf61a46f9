//! Repo, config and attribute helpers shared by the built-in ipfs variants

use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;

use shared::{Attrs, SharedError};

use crate::error::{TestbedError, TestbedResult};
use crate::traits::Node;

/// Environment variable pointing a daemon at its repo
pub const DATA_DIR_VAR: &str = "IPFS_PATH";
pub const CONFIG_FILE: &str = "config";
/// Written by a running daemon with its actual API multiaddr
pub const API_FILE: &str = "api";

pub const DEFAULT_BINARY: &str = "ipfs";
pub const DEFAULT_BIND_IP: &str = "127.0.0.1";

pub const ATTR_ID: &str = "id";
pub const ATTR_PATH: &str = "path";
pub const ATTR_API: &str = "api";
pub const ATTR_SWARM: &str = "swarm";

pub const METRIC_BW_IN: &str = "bw_in";
pub const METRIC_BW_OUT: &str = "bw_out";

/// Swarm transport a node listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenType {
    #[default]
    Tcp,
    Ws,
    Utp,
}

impl FromStr for ListenType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "tcp" => Ok(ListenType::Tcp),
            "ws" => Ok(ListenType::Ws),
            "utp" => Ok(ListenType::Utp),
            other => Err(SharedError::invalid_attribute(
                "listentype",
                other,
                "expected tcp, ws or utp",
            )),
        }
    }
}

/// Swarm multiaddr for `ip:port` on the given transport
pub fn swarm_addr(listen_type: ListenType, ip: &str, port: u16) -> String {
    match listen_type {
        ListenType::Tcp => format!("/ip4/{ip}/tcp/{port}"),
        ListenType::Ws => format!("/ip4/{ip}/tcp/{port}/ws"),
        ListenType::Utp => format!("/ip4/{ip}/udp/{port}/utp"),
    }
}

/// Attribute-driven settings common to every built-in variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpfsSettings {
    pub binary: String,
    pub listen_type: ListenType,
    /// Presence of the `mdns` attribute enables local discovery
    pub mdns: bool,
    pub bind_ip: String,
}

impl IpfsSettings {
    pub fn from_attrs(attrs: &Attrs) -> TestbedResult<Self> {
        let listen_type = match attrs.get("listentype") {
            Some(raw) => raw.parse::<ListenType>()?,
            None => ListenType::default(),
        };
        Ok(Self {
            binary: attrs
                .get("binary")
                .cloned()
                .unwrap_or_else(|| DEFAULT_BINARY.to_string()),
            listen_type,
            mdns: attrs.contains_key("mdns"),
            bind_ip: attrs
                .get("ip")
                .cloned()
                .unwrap_or_else(|| DEFAULT_BIND_IP.to_string()),
        })
    }
}

pub async fn load_config(dir: &Path) -> TestbedResult<Value> {
    let raw = tokio::fs::read(dir.join(CONFIG_FILE)).await?;
    Ok(serde_json::from_slice(&raw)?)
}

pub async fn write_config(dir: &Path, config: &Value) -> TestbedResult<()> {
    let raw = serde_json::to_vec_pretty(config)?;
    tokio::fs::write(dir.join(CONFIG_FILE), raw).await?;
    Ok(())
}

pub fn config_exists(dir: &Path) -> bool {
    dir.join(CONFIG_FILE).exists()
}

/// Rewrite a freshly initialised config for testbed use
///
/// Bootstrap peers are cleared, swarm and API addresses bound to `ip` on the
/// requested ports (0 picks a free one), the gateway disabled and mDNS set
/// from the settings.
pub fn apply_init_config(config: &mut Value, settings: &IpfsSettings, ip: &str, swarm_port: u16, api_port: u16) {
    // Indexing below only inserts into objects, so make sure every level is one.
    if !config.is_object() {
        *config = json!({});
    }
    for section in ["Addresses", "Discovery"] {
        if !config[section].is_object() {
            config[section] = json!({});
        }
    }
    if !config["Discovery"]["MDNS"].is_object() {
        config["Discovery"]["MDNS"] = json!({});
    }

    config["Bootstrap"] = json!([]);
    config["Addresses"]["Swarm"] = json!([swarm_addr(settings.listen_type, ip, swarm_port)]);
    config["Addresses"]["API"] = json!(format!("/ip4/{ip}/tcp/{api_port}"));
    config["Addresses"]["Gateway"] = json!("");
    config["Discovery"]["MDNS"]["Enabled"] = json!(settings.mdns);
}

pub fn peer_id_from_config(config: &Value) -> TestbedResult<String> {
    config
        .pointer("/Identity/PeerID")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TestbedError::not_found("config field", "Identity.PeerID"))
}

/// API address of the node in `dir` as `host:port`
///
/// Prefers the `api` file a running daemon writes; falls back to the
/// configured address.
pub async fn api_addr_from_repo(dir: &Path) -> TestbedResult<String> {
    match tokio::fs::read_to_string(dir.join(API_FILE)).await {
        Ok(raw) => multiaddr_to_host_port(raw.trim()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let config = load_config(dir).await?;
            let api = config
                .pointer("/Addresses/API")
                .and_then(Value::as_str)
                .ok_or_else(|| TestbedError::not_found("config field", "Addresses.API"))?;
            multiaddr_to_host_port(api)
        }
        Err(e) => Err(e.into()),
    }
}

/// `/ip4/1.2.3.4/tcp/5001` to `1.2.3.4:5001` (ip6 hosts are bracketed)
pub fn multiaddr_to_host_port(addr: &str) -> TestbedResult<String> {
    let parts: Vec<&str> = addr.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        ["ip4" | "dns" | "dns4" | "dns6", host, "tcp", port, ..] => Ok(format!("{host}:{port}")),
        ["ip6", host, "tcp", port, ..] => Ok(format!("[{host}]:{port}")),
        _ => Err(TestbedError::parse(format!("unsupported API multiaddr {addr:?}"))),
    }
}

/// Non-empty lines of `ipfs id -f <addrs>` output
pub fn parse_swarm_addrs(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn base_attr_list() -> Vec<String> {
    [ATTR_ID, ATTR_PATH, ATTR_API, ATTR_SWARM]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn base_attr_desc(name: &str) -> TestbedResult<String> {
    let desc = match name {
        ATTR_ID => "peer id",
        ATTR_PATH => "node repo path",
        ATTR_API => "api address (host:port)",
        ATTR_SWARM => "swarm listen addresses",
        other => return Err(TestbedError::not_found("attribute", other)),
    };
    Ok(desc.to_string())
}

pub fn metric_list() -> Vec<String> {
    vec![METRIC_BW_IN.to_string(), METRIC_BW_OUT.to_string()]
}

pub fn metric_desc(name: &str) -> TestbedResult<String> {
    match name {
        METRIC_BW_IN => Ok("total bytes received".to_string()),
        METRIC_BW_OUT => Ok("total bytes sent".to_string()),
        other => Err(TestbedError::not_found("metric", other)),
    }
}

/// `/api/v0/stats/bw` response
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bandwidth {
    #[serde(rename = "TotalIn")]
    pub total_in: u64,
    #[serde(rename = "TotalOut")]
    pub total_out: u64,
}

pub fn parse_bandwidth(body: &[u8]) -> TestbedResult<Bandwidth> {
    Ok(serde_json::from_slice(body)?)
}

pub async fn http_bandwidth(client: &reqwest::Client, api_addr: &str) -> TestbedResult<Bandwidth> {
    let body = client
        .get(format!("http://{api_addr}/api/v0/stats/bw"))
        .send()
        .await?
        .bytes()
        .await?;
    parse_bandwidth(&body)
}

pub fn bandwidth_metric(name: &str, bw: &Bandwidth) -> TestbedResult<String> {
    match name {
        METRIC_BW_IN => Ok(bw.total_in.to_string()),
        METRIC_BW_OUT => Ok(bw.total_out.to_string()),
        other => Err(TestbedError::not_found("metric", other)),
    }
}

/// `NODE{i}=<peer id>` for every node, in list order
pub async fn shell_env(nodes: &[std::sync::Arc<dyn Node>]) -> TestbedResult<Vec<(String, String)>> {
    let mut env = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        env.push((format!("NODE{i}"), node.peer_id().await?));
    }
    Ok(env)
}

/// Concatenated daemon captures
pub async fn read_captures(stdout: &Path, stderr: &Path) -> TestbedResult<Vec<u8>> {
    let mut out = Vec::new();
    for path in [stdout, stderr] {
        match tokio::fs::read(path).await {
            Ok(bytes) => out.extend(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}
