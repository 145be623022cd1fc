//! Utility modules shared by the core and the CLI.

pub mod errors;
pub mod logger;

pub use errors::{Result, SnapError};
