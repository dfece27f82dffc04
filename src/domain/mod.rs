pub mod index;
pub mod parameters;
pub mod types;

pub use index::*;
pub use parameters::*;
pub use types::*;
