//! On-disk node-spec store
//!
//! ```text
//! <testbed>/specs/<i>.json   node spec i
//! <testbed>/<i>/             directory owned by node i
//! ```
//!
//! Specs are the only state that outlives an invocation; the fleet is rebuilt
//! from them every time through the plugin registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use shared::{Attrs, NodeSpec};

use crate::error::{TestbedError, TestbedResult};
use crate::plugins::PluginRegistry;
use crate::traits::Node;

pub const SPECS_DIR: &str = "specs";

pub fn node_dir(testbed: &Path, index: usize) -> PathBuf {
    testbed.join(index.to_string())
}

fn specs_dir(testbed: &Path) -> PathBuf {
    testbed.join(SPECS_DIR)
}

/// Dense specs `0..count`, all of one type
pub fn build_specs(testbed: &Path, count: usize, type_name: &str, attrs: &Attrs) -> Vec<NodeSpec> {
    (0..count)
        .map(|i| NodeSpec::new(i, type_name, node_dir(testbed, i), attrs.clone()))
        .collect()
}

pub async fn write_specs(testbed: &Path, specs: &[NodeSpec]) -> TestbedResult<()> {
    let dir = specs_dir(testbed);
    tokio::fs::create_dir_all(&dir).await?;
    for spec in specs {
        tokio::fs::write(dir.join(NodeSpec::file_name(spec.index)), spec.to_json()?).await?;
        tokio::fs::create_dir_all(&spec.dir).await?;
    }
    debug!(testbed = %testbed.display(), nodes = specs.len(), "specs written");
    Ok(())
}

/// Read every spec, ordered by index
///
/// Fails unless the indices are exactly `0..N`.
pub async fn load_specs(testbed: &Path) -> TestbedResult<Vec<NodeSpec>> {
    let dir = specs_dir(testbed);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TestbedError::not_found("testbed", testbed.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut specs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            let raw = tokio::fs::read_to_string(&path).await?;
            specs.push(NodeSpec::from_json(&path, &raw)?);
        }
    }
    specs.sort_by_key(|spec| spec.index);

    for (expected, spec) in specs.iter().enumerate() {
        if spec.index != expected {
            return Err(TestbedError::validation(format!(
                "node specs are not dense: expected node {expected}, found node {}",
                spec.index
            )));
        }
    }
    Ok(specs)
}

/// Refuse to overwrite an existing testbed unless forced
///
/// With `force` the whole testbed directory is removed first.
pub async fn already_init_check(testbed: &Path, force: bool) -> TestbedResult<()> {
    if !specs_dir(testbed).exists() {
        return Ok(());
    }
    if !force {
        return Err(TestbedError::validation(format!(
            "testbed exists at {}, use --force to overwrite",
            testbed.display()
        )));
    }
    info!(testbed = %testbed.display(), "removing existing testbed");
    tokio::fs::remove_dir_all(testbed).await?;
    Ok(())
}

/// A testbed directory and the fleet described in it
#[derive(Debug, Clone)]
pub struct Testbed {
    dir: PathBuf,
}

impl Testbed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a fresh fleet of `count` nodes of `type_name`
    pub async fn create(
        &self,
        registry: &PluginRegistry,
        count: usize,
        type_name: &str,
        attrs: &Attrs,
        force: bool,
    ) -> TestbedResult<Vec<NodeSpec>> {
        if count == 0 {
            return Err(TestbedError::validation("a testbed needs at least one node"));
        }
        registry.lookup(type_name)?;
        already_init_check(&self.dir, force).await?;

        let specs = build_specs(&self.dir, count, type_name, attrs);
        write_specs(&self.dir, &specs).await?;
        info!(testbed = %self.dir.display(), count, type_name, "testbed created");
        Ok(specs)
    }

    pub async fn specs(&self) -> TestbedResult<Vec<NodeSpec>> {
        load_specs(&self.dir).await
    }

    /// Rebuild every node, in index order
    pub async fn nodes(&self, registry: &PluginRegistry) -> TestbedResult<Vec<Arc<dyn Node>>> {
        self.specs()
            .await?
            .iter()
            .map(|spec| {
                registry
                    .construct(spec)
                    .map_err(|e| e.for_node(spec.index))
            })
            .collect()
    }
}
