//! BasePlate module host core: message bus, module contract, static
//! discovery/registry, loader, OS manager, and system-check aggregation.

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod loader;
pub mod module;
pub mod osmanager;
pub mod registry;
pub mod systemcheck;

pub use bus::{Message, MessageBus};
pub use context::ModuleCtx;
pub use error::{BaseplateError, BaseplateResult};
pub use loader::ModuleLoader;
pub use module::{HealthReport, Module, ModuleDescriptor};
pub use osmanager::OsManager;
pub use registry::{ModuleLayer, ModuleRegistry, Registrator, RegistryBuilder};
pub use systemcheck::AggregateHealth;
