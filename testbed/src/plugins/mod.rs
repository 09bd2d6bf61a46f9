//! Node type registration: built-in variants and external plugins

pub mod external;
pub mod registry;

pub use external::{ExecNode, PluginManifest};
pub use registry::{Descriptor, LoadReport, NodeConstructor, PluginOrigin, PluginRecord, PluginRegistry};
