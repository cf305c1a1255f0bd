pub mod machine_manager;
pub mod merge;
pub mod notify;
pub mod quality_manager;
pub mod resolve;
pub mod stack_ops;
pub mod tree;

pub use machine_manager::*;
pub use merge::*;
pub use notify::*;
pub use quality_manager::*;
pub use resolve::*;
pub use stack_ops::*;
pub use tree::*;
