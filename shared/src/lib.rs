//! Shared types for the testbed tooling
//!
//! Contains the on-disk descriptor types every component agrees on, the shared
//! error type, and the logging setup used by all binaries.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
