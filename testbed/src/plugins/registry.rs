//! Plugin registry mapping node type names to constructors
//!
//! The registry is an explicit value: built-ins are registered when it is
//! created, external plugins afterwards via [`PluginRegistry::load`]. An
//! external plugin may replace a built-in; a second built-in may not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use shared::{Attrs, DeploymentKind, NodeSpec};

use crate::error::{TestbedError, TestbedResult};
use crate::nodes::{docker, ipfs, local, netem, netns, DockerNode, LocalNode, NetnsNode};
use crate::plugins::external;
use crate::traits::Node;

pub type NodeConstructor = Arc<dyn Fn(PathBuf, &Attrs) -> TestbedResult<Arc<dyn Node>> + Send + Sync>;

/// Where a registration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOrigin {
    BuiltIn,
    External(PathBuf),
}

impl PluginOrigin {
    pub fn is_builtin(&self) -> bool {
        matches!(self, PluginOrigin::BuiltIn)
    }
}

impl fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginOrigin::BuiltIn => write!(f, "built-in"),
            PluginOrigin::External(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Name and description of an attribute or metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// One registered node type
#[derive(Clone)]
pub struct PluginRecord {
    pub name: String,
    pub deployment: DeploymentKind,
    pub origin: PluginOrigin,
    pub attrs: Vec<Descriptor>,
    pub metrics: Vec<Descriptor>,
    constructor: NodeConstructor,
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("deployment", &self.deployment)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl PluginRecord {
    pub fn new(
        name: impl Into<String>,
        deployment: DeploymentKind,
        origin: PluginOrigin,
        constructor: NodeConstructor,
    ) -> Self {
        Self {
            name: name.into(),
            deployment,
            origin,
            attrs: Vec::new(),
            metrics: Vec::new(),
            constructor,
        }
    }

    pub fn with_attrs(mut self, attrs: Vec<Descriptor>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Descriptor>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn attr_list(&self) -> Vec<String> {
        self.attrs.iter().map(|d| d.name.clone()).collect()
    }

    pub fn attr_desc(&self, name: &str) -> TestbedResult<String> {
        describe(&self.attrs, "attribute", name)
    }

    pub fn metric_list(&self) -> Vec<String> {
        self.metrics.iter().map(|d| d.name.clone()).collect()
    }

    pub fn metric_desc(&self, name: &str) -> TestbedResult<String> {
        describe(&self.metrics, "metric", name)
    }

    /// Build a node of this type rooted at `dir`
    pub fn construct(&self, dir: PathBuf, attrs: &Attrs) -> TestbedResult<Arc<dyn Node>> {
        (self.constructor)(dir, attrs)
    }
}

fn describe(list: &[Descriptor], what: &str, name: &str) -> TestbedResult<String> {
    list.iter()
        .find(|d| d.name == name)
        .map(|d| d.description.clone())
        .ok_or_else(|| TestbedError::not_found(what, name))
}

/// Outcome of scanning a plugin directory
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Built-in names replaced by a loaded plugin
    pub overridden: Vec<String>,
    pub failures: Vec<(PathBuf, TestbedError)>,
}

#[derive(Debug, Default)]
pub struct PluginRegistry {
    records: BTreeMap<String, PluginRecord>,
}

impl PluginRegistry {
    /// Registry with nothing registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in node types
    pub fn with_builtins() -> TestbedResult<Self> {
        let mut registry = Self::empty();
        for record in builtin_records() {
            registry.register(record, false)?;
        }
        Ok(registry)
    }

    /// Add or replace a registration; returns whether a built-in was replaced
    ///
    /// Replacing a built-in requires `allow_builtin_override` and an external
    /// record. A later external record silently takes over an earlier one.
    pub fn register(&mut self, record: PluginRecord, allow_builtin_override: bool) -> TestbedResult<bool> {
        if let Some(existing) = self.records.get(&record.name) {
            if existing.origin.is_builtin() && (record.origin.is_builtin() || !allow_builtin_override) {
                return Err(TestbedError::PluginConflict { name: record.name });
            }
            let replaced_builtin = existing.origin.is_builtin();
            if replaced_builtin {
                warn!(
                    plugin = %record.name,
                    replacement = %record.origin,
                    "plugin overrides a built-in"
                );
            } else {
                debug!(
                    plugin = %record.name,
                    previous = %existing.origin,
                    replacement = %record.origin,
                    "plugin replaces an earlier registration"
                );
            }
            self.records.insert(record.name.clone(), record);
            return Ok(replaced_builtin);
        }

        debug!(plugin = %record.name, origin = %record.origin, "plugin registered");
        self.records.insert(record.name.clone(), record);
        Ok(false)
    }

    /// Register every plugin manifest found in `dir`
    ///
    /// A missing directory loads nothing. Manifests that fail to parse or
    /// register are reported and skipped.
    pub async fn load(&mut self, dir: &Path) -> TestbedResult<LoadReport> {
        let mut report = LoadReport::default();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "no plugin directory");
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == external::MANIFEST_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let outcome = match external::load_manifest(&path).await {
                Ok(manifest) => {
                    let name = manifest.name.clone();
                    self.register(manifest.into_record(path.clone()), true)
                        .map(|replaced| (name, replaced))
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok((name, replaced)) => {
                    if replaced {
                        report.overridden.push(name.clone());
                    }
                    report.loaded.push(name);
                }
                Err(e) => {
                    warn!(path = %path.display(), "skipping plugin: {}", e);
                    report.failures.push((path, e));
                }
            }
        }

        Ok(report)
    }

    pub fn lookup(&self, name: &str) -> TestbedResult<&PluginRecord> {
        self.records
            .get(name)
            .ok_or_else(|| TestbedError::not_found("plugin", name))
    }

    /// Rebuild the node a spec describes
    pub fn construct(&self, spec: &NodeSpec) -> TestbedResult<Arc<dyn Node>> {
        self.lookup(&spec.type_name)?
            .construct(spec.dir.clone(), &spec.attrs)
    }

    /// Registrations sorted by name
    pub fn list(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.values()
    }
}

fn descriptors(names: Vec<String>, desc: impl Fn(&str) -> TestbedResult<String>) -> Vec<Descriptor> {
    names
        .into_iter()
        .map(|name| {
            let description = desc(&name).unwrap_or_default();
            Descriptor { name, description }
        })
        .collect()
}

fn builtin_records() -> Vec<PluginRecord> {
    let metrics = descriptors(ipfs::metric_list(), ipfs::metric_desc);

    let local_ctor: NodeConstructor = Arc::new(|dir: PathBuf, attrs: &Attrs| Ok(Arc::new(LocalNode::new(dir, attrs)?) as Arc<dyn Node>));
    let local = PluginRecord::new(local::TYPE_NAME, DeploymentKind::Local, PluginOrigin::BuiltIn, local_ctor)
        .with_attrs(descriptors(ipfs::base_attr_list(), ipfs::base_attr_desc))
        .with_metrics(metrics.clone());

    let docker_ctor: NodeConstructor =
        Arc::new(|dir: PathBuf, attrs: &Attrs| Ok(Arc::new(DockerNode::new(dir, attrs)?) as Arc<dyn Node>));
    let mut docker_attrs = descriptors(ipfs::base_attr_list(), ipfs::base_attr_desc);
    docker_attrs.push(Descriptor::new(
        docker::ATTR_IFNAME,
        "host-side network interface of the container",
    ));
    docker_attrs.extend(netem::shaping_attrs().into_iter().map(|name| {
        let description = netem::shaping_desc(&name).unwrap_or_default();
        Descriptor::new(name, description)
    }));
    let docker = PluginRecord::new(docker::TYPE_NAME, DeploymentKind::Docker, PluginOrigin::BuiltIn, docker_ctor)
        .with_attrs(docker_attrs)
        .with_metrics(metrics.clone());

    let netns_ctor: NodeConstructor = Arc::new(|dir: PathBuf, attrs: &Attrs| Ok(Arc::new(NetnsNode::new(dir, attrs)?) as Arc<dyn Node>));
    let mut netns_attrs = descriptors(ipfs::base_attr_list(), ipfs::base_attr_desc);
    netns_attrs.push(Descriptor::new(netns::ATTR_NETNS, "network namespace the daemon runs in"));
    let netns = PluginRecord::new(netns::TYPE_NAME, DeploymentKind::Netns, PluginOrigin::BuiltIn, netns_ctor)
        .with_attrs(netns_attrs)
        .with_metrics(metrics);

    vec![local, docker, netns]
}
