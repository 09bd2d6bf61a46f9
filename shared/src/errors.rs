//! Shared error types for testbed descriptors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Node spec serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Node spec {path} could not be decoded: {message}")]
    DeserializationError { path: String, message: String },

    #[error("Invalid attribute: {name} = {value} ({reason})")]
    InvalidAttribute { name: String, value: String, reason: String },

    #[error("Unknown deployment kind: {input}")]
    UnknownDeployment { input: String },
}

impl SharedError {
    pub fn invalid_attribute(name: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;
