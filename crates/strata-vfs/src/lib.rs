//! # strata-vfs
//!
//! Mountable virtual filesystem.
//!
//! Independent storage backends are attached at mount points of one
//! hierarchical namespace, and a composite filesystem routes each operation
//! to the backend owning the path. Key pieces:
//!
//! - [`VfsPath`] - Normalized, segment-based virtual paths
//! - [`Router`] - Ordered pattern dispatch with `{name}` captures and a trailing `*`
//! - [`MountTree`] - Mount points and the virtual directories between them
//! - [`MountableFileSystem`] - Composite filesystem over a mount tree
//! - [`FileSystem`] - The contract every backend implements
//! - [`MemoryBackend`], [`ChRoot`], [`RoutedFileSystem`] - Backends and adapters
//!
//! ## Design Decisions
//!
//! - **Synchronous core**: operations block; a [`Context`] carries
//!   cancellation and per-call values such as transaction state.
//! - **No global state**: callers construct a [`MountableFileSystem`] and
//!   pass it around.
//! - **Same-mount mutations only**: operations on two paths under different
//!   mount points are refused without touching either backend.

pub mod backends;
pub mod config;
mod context;
mod error;
pub mod mount;
mod ops;
mod path;
mod result_set;
mod router;
mod types;

pub use backends::{
    BufferBlob, ChRoot, MemoryBackend, OpenArgs, RoutedFileSystem, RoutedFileSystemBuilder,
};
pub use config::{BackendRegistry, MountConfig, VfsConfig};
pub use context::{Context, ContextKey};
pub use error::{ErrorKind, VfsError, VfsResult};
pub use mount::{Lookup, MountInfo, MountTree, MountableFileSystem, Resolution};
pub use ops::{Blob, FileSystem, ListenerHandle, PathAttrs, ResourceListener};
pub use path::{FORK_SEPARATOR, PATH_SEPARATOR, VfsPath, concat_paths, unportable_character};
pub use result_set::{JoinedResultSet, ResultSet, VecResultSet, collect_all};
pub use router::{Pattern, Router, RoutingContext};
pub use types::{
    Attr, Entry, Event, FileType, IsolationLevel, LinkMode, Opaque, OpenFlags, Options, TxOptions,
    option_bool, option_u64,
};

/// Re-exported so callers can build and cancel [`Context`]s.
pub use tokio_util::sync::CancellationToken;
