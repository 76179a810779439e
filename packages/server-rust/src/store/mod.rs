//! In-memory store backends and the cluster file loader.

pub mod loader;
pub mod memory;

pub use loader::ClusterFile;
pub use memory::{MemoryDefinitionStore, MemoryWorkStore};
