//! Snapslot core library
//!
//! Single-snapshot, content-deduplicated, encrypted backups to a remote store
//! that is only reachable through discrete remote commands.

pub mod archive;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod fs;
pub mod inventory;
pub mod layout;
pub mod remote;
pub mod rotation;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use archive::{Archive, ArchiveSource};
pub use config::Config;
pub use executor::{PipelineMode, RunExecutor, RunOptions};
pub use remote::RemoteGateway;
pub use transfer::fingerprint::Fingerprint;
pub use utils::errors::SnapError;
pub type Result<T> = std::result::Result<T, SnapError>;
