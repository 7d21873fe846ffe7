//! In-memory models behind the engine.

pub mod registry;
pub mod tasks;
