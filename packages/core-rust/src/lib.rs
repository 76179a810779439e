//! Servicer core: service definitions, server overrides, work items and store traits.

pub mod traits;
pub mod types;

pub use traits::{DefinitionStore, WorkItemStore};
pub use types::{
    service_names, Attributes, HostList, Server, ServiceDefinition, WorkItem, WorkKind, WorkState,
};
