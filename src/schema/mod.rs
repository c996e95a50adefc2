pub mod types;
pub mod compiler;
pub mod validate;

pub use types::*;
pub use compiler::compile;
pub use validate::validate;
