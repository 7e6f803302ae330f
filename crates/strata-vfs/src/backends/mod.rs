//! Filesystem backends and adapters.
//!
//! Backends implement [`FileSystem`](crate::FileSystem) for different kinds
//! of storage; adapters wrap another filesystem.

mod chroot;
mod memory;
mod routed;

pub use chroot::ChRoot;
pub use memory::MemoryBackend;
pub use routed::{BufferBlob, OpenArgs, RoutedFileSystem, RoutedFileSystemBuilder};
