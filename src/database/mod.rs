pub mod connection;
pub mod definitions;
pub mod executor;
pub mod manager;
pub mod model;
pub mod models;
pub mod sweeper;

pub use connection::{ConnectionEntry, ConnectionRegistry};
pub use definitions::{DefinitionSource, StaticDefinitions};
pub use executor::Executor;
pub use manager::DbManager;
pub use model::{ModelEntry, ModelRegistry};
pub use models::{ModelDefinition, Tenant};
pub use sweeper::{Sweeper, SweeperHandle};
