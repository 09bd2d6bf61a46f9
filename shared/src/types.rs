//! Descriptor types shared by every testbed component
//!
//! A testbed on disk is nothing more than a dense list of [`NodeSpec`]s; every
//! invocation rebuilds its fleet from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{SharedError, SharedResult};

/// Free-form node attributes (listen transport, mdns, image, ...)
pub type Attrs = BTreeMap<String, String>;

/// Where a node's daemon actually runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    /// Plain child process on this machine
    Local,
    /// Docker container
    Docker,
    /// Process inside a network namespace
    Netns,
    /// Delegated to an external plugin executable
    External,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Local => write!(f, "local"),
            DeploymentKind::Docker => write!(f, "docker"),
            DeploymentKind::Netns => write!(f, "netns"),
            DeploymentKind::External => write!(f, "external"),
        }
    }
}

impl FromStr for DeploymentKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(DeploymentKind::Local),
            "docker" => Ok(DeploymentKind::Docker),
            "netns" => Ok(DeploymentKind::Netns),
            "external" => Ok(DeploymentKind::External),
            other => Err(SharedError::UnknownDeployment {
                input: other.to_string(),
            }),
        }
    }
}

/// Persisted descriptor of one testbed member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub index: usize,
    #[serde(rename = "type")]
    pub type_name: String,
    pub dir: PathBuf,
    #[serde(default)]
    pub attrs: Attrs,
}

impl NodeSpec {
    pub fn new(index: usize, type_name: impl Into<String>, dir: PathBuf, attrs: Attrs) -> Self {
        Self {
            index,
            type_name: type_name.into(),
            dir,
            attrs,
        }
    }

    /// File name used for the spec of node `index`
    pub fn file_name(index: usize) -> String {
        format!("{index}.json")
    }

    pub fn to_json(&self) -> SharedResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SharedError::SerializationError {
            message: e.to_string(),
        })
    }

    pub fn from_json(path: &Path, raw: &str) -> SharedResult<Self> {
        serde_json::from_str(raw).map_err(|e| SharedError::DeserializationError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Attribute lookup treating an absent key as `None`
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Parse `--attr` flags of the form `key,value` (a bare `key` means `true`)
pub fn parse_attr_slice(raw: &[String]) -> Attrs {
    let mut attrs = Attrs::new();
    for attr in raw {
        match attr.split_once(',') {
            Some((key, value)) => attrs.insert(key.to_string(), value.to_string()),
            None => attrs.insert(attr.to_string(), "true".to_string()),
        };
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attr_slice() {
        let raw = vec![
            "mdns".to_string(),
            "listentype,ws".to_string(),
            "image,ipfs/kubo,latest".to_string(),
        ];
        let attrs = parse_attr_slice(&raw);

        assert_eq!(attrs.get("mdns").map(String::as_str), Some("true"));
        assert_eq!(attrs.get("listentype").map(String::as_str), Some("ws"));
        assert_eq!(attrs.get("image").map(String::as_str), Some("ipfs/kubo,latest"));
    }

    #[test]
    fn test_node_spec_json_shape() {
        let mut attrs = Attrs::new();
        attrs.insert("mdns".to_string(), "true".to_string());
        let spec = NodeSpec::new(3, "localipfs", PathBuf::from("/tmp/tb/3"), attrs);

        let json = spec.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "localipfs");
        assert_eq!(value["index"], 3);
        assert_eq!(value["attrs"]["mdns"], "true");

        let back = NodeSpec::from_json(Path::new("3.json"), &json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_node_spec_without_attrs() {
        let raw = r#"{"index": 0, "type": "dockeripfs", "dir": "/tb/0"}"#;
        let spec = NodeSpec::from_json(Path::new("0.json"), raw).unwrap();
        assert!(spec.attrs.is_empty());
        assert_eq!(spec.type_name, "dockeripfs");
    }

    #[test]
    fn test_bad_spec_reports_path() {
        let err = NodeSpec::from_json(Path::new("specs/7.json"), "{not json").unwrap_err();
        assert!(err.to_string().contains("specs/7.json"));
    }

    #[test]
    fn test_deployment_kind_round_trip() {
        for kind in [
            DeploymentKind::Local,
            DeploymentKind::Docker,
            DeploymentKind::Netns,
            DeploymentKind::External,
        ] {
            assert_eq!(kind.to_string().parse::<DeploymentKind>().unwrap(), kind);
        }
        assert!("vm".parse::<DeploymentKind>().is_err());
    }
}
