//! Test fixtures and data for testbed tests
//!
//! Plugin scripts and manifests are plain `sh` scripts invoked as
//! `sh <script>`, so they never need to be executable.

use std::path::Path;
use std::time::Duration;

use testbed::nodes::RetryPolicy;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Name the scripted external plugin registers under
    pub const PLUGIN_NAME: &'static str = "simnode";

    /// Peer id prefix the fake daemon reports; the node directory name follows it
    pub const PEER_PREFIX: &'static str = "QmFake";

    /// Liveness policy that gives a local fake daemon plenty of time
    pub fn fast_liveness() -> RetryPolicy {
        RetryPolicy {
            attempts: 100,
            interval: Duration::from_millis(50),
        }
    }

    /// External plugin speaking the operation protocol
    pub fn plugin_script() -> &'static str {
        r#"
op="$1"; shift
name=$(basename "$IPTB_NODE_DIR")
case "$op" in
  init) mkdir -p "$IPTB_NODE_DIR" && echo "init $name" ;;
  start) echo "started $name" ;;
  stop) : ;;
  run) "$@" ;;
  peer-id) echo "QmSim$name" ;;
  swarm-addrs) echo "/ip4/10.0.0.$name/tcp/4001" ;;
  connect) echo "$1" >> "$IPTB_NODE_DIR/peers" ;;
  get-attr) echo "$name" ;;
  *) exit 78 ;;
esac
"#
    }

    /// Manifest registering `script` as an external node type
    pub fn plugin_manifest(name: &str, script: &Path) -> String {
        serde_json::json!({
            "name": name,
            "command": "sh",
            "args": [script.display().to_string()],
            "attrs": [{"name": "name", "description": "directory name of the node"}],
            "metrics": []
        })
        .to_string()
    }

    /// Stand-in for the ipfs binary
    ///
    /// `init` writes a config whose peer id is derived from the repo directory
    /// name, `daemon` advertises `api_addr` through the api file and idles until
    /// SIGTERM.
    pub fn fake_ipfs_script(api_addr: &str) -> String {
        let template = r#"#!/bin/sh
name=$(basename "$IPFS_PATH")
case "$1" in
  init)
    mkdir -p "$IPFS_PATH"
    printf '{"Identity":{"PeerID":"QmFake%s"},"Bootstrap":["/dnsaddr/bootstrap.example"],"Addresses":{}}\n' "$name" > "$IPFS_PATH/config"
    echo "initialized $name"
    ;;
  daemon)
    echo "/ip4/__API_ADDR__" > "$IPFS_PATH/api"
    trap 'echo "shutting down"; exit 0' TERM
    echo "daemon ready"
    while true; do sleep 0.1; done
    ;;
  id)
    echo "/ip4/127.0.0.1/tcp/4001/p2p/QmFake$name"
    ;;
  swarm)
    echo "connect $3 success"
    ;;
  *)
    echo "unknown command $1" >&2
    exit 1
    ;;
esac
"#;
        let (host, port) = api_addr.rsplit_once(':').unwrap_or((api_addr, "5001"));
        template.replace("__API_ADDR__", &format!("{host}/tcp/{port}"))
    }
}
