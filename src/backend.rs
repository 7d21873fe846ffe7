//! Platform backends for the engine's collaborators.
//!
//! - [`mount::MountBackend`]: volume enumeration and unmounting
//! - [`script::ProcessGateway`]: script execution through subprocesses
//! - [`json::JsonStore`]: durable store on the local filesystem

pub mod json;
pub mod mount;
pub mod script;
