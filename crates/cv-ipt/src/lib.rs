pub mod actions;
pub mod fetch;
pub mod parser;

pub use actions::*;
pub use fetch::*;
pub use parser::*;
