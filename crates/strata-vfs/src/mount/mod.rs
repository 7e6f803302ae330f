//! Mount points and the composite filesystem built on them.

mod table;
mod tree;

pub use table::{MountInfo, MountableFileSystem};
pub use tree::{Lookup, MountTree, Resolution};
