//! Built-in node variants and the process plumbing they share

pub mod docker;
pub mod exec;
pub mod ipfs;
pub mod lifecycle;
pub mod liveness;
pub mod local;
pub mod netem;
pub mod netns;

pub use docker::DockerNode;
pub use lifecycle::{default_escalation, EscalationStep, ProcessLifecycle, StopReport};
pub use liveness::RetryPolicy;
pub use local::LocalNode;
pub use netns::NetnsNode;
