//! Testbed engine: node fleets for integration and bench testing
//!
//! A testbed is a dense, on-disk list of node specs. Each invocation rebuilds
//! the fleet through the plugin registry, selects nodes with a range or a
//! topology, fans work out through the fleet engine and reports the results.

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod nodes;
pub mod plugins;
pub mod testbed;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::TestbedConfig;
pub use core::{build_report, map_list_with_output, map_with_output, parse_range, unit, Encoding, ExecutionResult, NodeRef};
pub use error::{TestbedError, TestbedResult};
pub use plugins::{PluginRecord, PluginRegistry};
pub use testbed::Testbed;
pub use traits::Node;
pub use types::{ExecContext, Output};
