pub mod assembler;
pub mod constraints;
pub mod costs;
pub mod model;
pub mod strategies;
pub mod types;
pub mod variables;

pub use assembler::*;
pub use constraints::*;
pub use costs::*;
pub use model::{build, build_assembler, solve, BuildOptions, StorageResult};
pub use strategies::*;
pub use types::*;
pub use variables::*;
