//! Core fleet logic
//!
//! Parsers, the fan-out engine and reporting. Nothing here knows how a node
//! is deployed; everything goes through the [`crate::traits::Node`] trait.

pub mod batch;
pub mod dispatch;
pub mod duration;
pub mod range;
pub mod report;
pub mod stats;
pub mod topology;

pub use dispatch::{map_list_with_output, map_with_output, unit, ExecutionResult, NodeRef, UnitOfWork};
pub use range::{parse_range, parse_range_or_all};
pub use report::{build_report, Encoding};
pub use stats::ElapsedStats;
pub use topology::{load_topology, parse_topology_str, TopologyRow};
