pub mod common;
pub mod container;
pub mod quality;
pub mod stack;

pub use common::*;
pub use container::*;
pub use quality::*;
pub use stack::*;
