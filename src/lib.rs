pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod query;
pub mod schema;

pub use database::{DbManager, DefinitionSource, ModelDefinition, StaticDefinitions, Tenant};
pub use error::DbError;
pub use query::{DeleteData, FindData, UpdateData};
pub use schema::{CollectionSchema, FieldSpec, FieldType};
