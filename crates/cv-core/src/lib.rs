pub mod config;
pub mod error;
pub mod format;
pub mod model;
pub mod xref;

pub use config::*;
pub use error::*;
pub use model::*;
pub use xref::*;
