//! Service lifecycle and scheduling.
//!
//! 1. **Lifecycle** (`lifecycle`): the `Service` trait, states, and `ServiceBase`
//! 2. **Context** (`context`): shared collaborators handed to each service
//! 3. **Factory** (`factory`): service kind -> constructor
//! 4. **Bootstrap** (`bootstrap`): definition loading and placement checks
//! 5. **Servicer** (`servicer`): per-process coordinator loop
//! 6. **Workers** (`worker`): background loops behind continuous services
//! 7. **Domain services** (`domain`): the built-in service kinds

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod domain;
pub mod factory;
pub mod lifecycle;
pub mod servicer;
pub mod worker;

// Re-export key types for convenient access.
pub use config::ServicerConfig;
pub use context::{ServiceContext, ServicerEnv};
pub use factory::{FactoryError, ServiceConstructor, ServiceFactory};
pub use lifecycle::{
    ExecutionMode, NullMonitor, Service, ServiceBase, ServiceError, ServiceState, ServiceStatus,
    TaskMonitor,
};
pub use servicer::{Servicer, ServicerCommand, ServicerHandle};
pub use worker::{BackgroundRunnable, BackgroundWorker};
