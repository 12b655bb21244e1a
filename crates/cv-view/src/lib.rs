pub mod diff;
pub mod interact;
pub mod live;
pub mod scheduler;
pub mod tree;

pub use diff::*;
pub use interact::*;
pub use live::*;
pub use scheduler::*;
pub use tree::*;
