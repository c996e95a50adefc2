pub mod types;
pub mod builder;

pub use types::*;
pub use builder::{build_create, build_delete, build_find, build_update};
