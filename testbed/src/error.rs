//! Testbed error types

use shared::SharedError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestbedError {
    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Line {line}: {message}")]
    LineParseError { line: usize, message: String },

    #[error("Validation failed: {message}")]
    ValidationError { message: String },

    #[error("Node range contains value ({index}) outside of valid range [0-{}]", .total.saturating_sub(1))]
    IndexOutOfRange { index: usize, total: usize },

    #[error("{what} not found: {name}")]
    NotFound { what: String, name: String },

    #[error("Node at {dir} is not running")]
    NotRunning { dir: String },

    #[error("Node at {dir} is already running")]
    AlreadyRunning { dir: String },

    #[error("{operation} is not implemented for {node_type} nodes")]
    NotImplemented { operation: String, node_type: String },

    #[error("Context deadline exceeded for command {command:?} after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Node {peer_id} failed to come online after {attempts} attempts")]
    LivenessTimeout { peer_id: String, attempts: u32 },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("Process error: {message}")]
    ProcessError { message: String },

    #[error("Plugin {name} is already registered as a built-in")]
    PluginConflict { name: String },

    #[error("Failed to load plugin {path}: {message}")]
    PluginLoadError { path: String, message: String },

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("node[{index}]: {source}")]
    NodeError {
        index: usize,
        #[source]
        source: Box<TestbedError>,
    },

    #[error("node[{from}] => node[{to}]: {source}")]
    ConnectionError {
        from: usize,
        to: usize,
        #[source]
        source: Box<TestbedError>,
    },

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<TestbedError>),

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Signal error: {0}")]
    SignalError(#[from] nix::Error),
}

fn join_errors(errors: &[TestbedError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl TestbedError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
        }
    }

    pub fn line(line: usize, message: impl Into<String>) -> Self {
        Self::LineParseError {
            line,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::ProcessError {
            message: message.into(),
        }
    }

    pub fn config(field: impl Into<String>) -> Self {
        Self::ConfigurationError { field: field.into() }
    }

    pub fn not_found(what: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            name: name.into(),
        }
    }

    pub fn not_implemented(operation: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
            node_type: node_type.into(),
        }
    }

    /// Attach node-index context
    ///
    /// Errors already naming the node, such as a connection failure from it,
    /// are returned unchanged.
    pub fn for_node(self, index: usize) -> Self {
        match self {
            Self::NodeError { index: owner, .. } | Self::ConnectionError { from: owner, .. } if owner == index => self,
            other => Self::NodeError {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Collapse a list of failures; `None` when there were none
    pub fn aggregate(mut errors: Vec<TestbedError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// True for liveness and command deadlines, looking through node context
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::CommandTimeout { .. } | Self::LivenessTimeout { .. } | Self::Timeout { .. } => true,
            Self::NodeError { source, .. } | Self::ConnectionError { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// True when the failure means no daemon was running
    pub fn is_not_running(&self) -> bool {
        match self {
            Self::NotRunning { .. } => true,
            Self::NodeError { source, .. } => source.is_not_running(),
            _ => false,
        }
    }
}

pub type TestbedResult<T> = Result<T, TestbedError>;
