//! Runtime configuration resolved from CLI flags and the environment

use std::path::{Path, PathBuf};

use crate::error::{TestbedError, TestbedResult};

pub const ROOT_VAR: &str = "IPTB_ROOT";
pub const PLUGINS_VAR: &str = "IPTB_PLUGINS";
pub const DEFAULT_TESTBED: &str = "default";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

const TESTBEDS_DIR: &str = "testbeds";
const PLUGINS_DIR: &str = "plugins";

/// Where testbeds and plugins live for this invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestbedConfig {
    pub root: PathBuf,
    pub testbed_name: String,
    pub plugins_dir: PathBuf,
    pub log_level: String,
}

impl TestbedConfig {
    /// Resolve paths; a missing root falls back to `$HOME/testbed`
    pub fn resolve(
        root: Option<PathBuf>,
        testbed_name: &str,
        plugins_dir: Option<PathBuf>,
        log_level: &str,
    ) -> TestbedResult<Self> {
        let root = match root {
            Some(root) => root,
            None => default_root()?,
        };
        if testbed_name.is_empty() || testbed_name.contains(std::path::MAIN_SEPARATOR) {
            return Err(TestbedError::config(format!(
                "invalid testbed name {testbed_name:?}"
            )));
        }

        Ok(Self {
            plugins_dir: plugins_dir.unwrap_or_else(|| root.join(PLUGINS_DIR)),
            testbed_name: testbed_name.to_string(),
            log_level: log_level.to_string(),
            root,
        })
    }

    /// `<root>/testbeds/<name>`
    pub fn testbed_dir(&self) -> PathBuf {
        self.root.join(TESTBEDS_DIR).join(&self.testbed_name)
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }
}

fn default_root() -> TestbedResult<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join("testbed"))
        .ok_or_else(|| TestbedError::config(format!("{ROOT_VAR} is not set and HOME is unknown")))
}
