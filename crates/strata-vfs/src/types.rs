//! Core VFS types.
//!
//! Attributes are modelled as a closed set of kinds the core understands
//! plus an opaque escape hatch that only the owning backend inspects.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Free-form, backend-specific options (e.g. `{"page_size": 50}`).
pub type Options = serde_json::Map<String, serde_json::Value>;

/// Type-erased payload the core never inspects.
pub type Opaque = Arc<dyn Any + Send + Sync>;

/// Read an unsigned integer option, ignoring values of the wrong type.
pub fn option_u64(options: &Options, key: &str) -> Option<u64> {
    options.get(key).and_then(serde_json::Value::as_u64)
}

/// Read a boolean option, ignoring values of the wrong type.
pub fn option_bool(options: &Options, key: &str) -> Option<bool> {
    options.get(key).and_then(serde_json::Value::as_bool)
}

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    /// Regular file (a blob).
    File,
    /// Directory (a bucket).
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Metadata of a single resource, as returned by attribute reads and
/// directory listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Entry name (last path segment, not the full path).
    pub name: String,
    pub kind: FileType,
    /// Size in bytes, or `-1` when unknown.
    pub size: i64,
    /// Unix-style permission bits.
    pub mode: u32,
    pub mtime: Option<SystemTime>,
    /// Backend-specific payload. Not serialized.
    #[serde(skip)]
    pub sys: Option<Opaque>,
}

impl Entry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        let mode = match kind {
            FileType::Directory => 0o755,
            FileType::File => 0o644,
            FileType::Symlink => 0o777,
        };
        Self {
            name: name.into(),
            kind,
            size: -1,
            mode,
            mtime: None,
            sys: None,
        }
    }

    /// A file entry of known size.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, FileType::File).with_size(size as i64)
    }

    /// A directory entry. Directories report a size of zero.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory).with_size(0)
    }

    /// A symlink entry; its size is the length of the target.
    pub fn symlink(name: impl Into<String>, target_len: u64) -> Self {
        Self::new(name, FileType::Symlink).with_size(target_len as i64)
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_sys(mut self, sys: Opaque) -> Self {
        self.sys = Some(sys);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Size if known.
    pub fn known_size(&self) -> Option<u64> {
        u64::try_from(self.size).ok()
    }

    /// Downcast the backend payload.
    pub fn sys_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.sys.as_deref().and_then(|s| s.downcast_ref::<T>())
    }
}

/// One attribute to write.
#[derive(Debug, Clone)]
pub enum Attr {
    /// Rename within the same parent.
    Name(String),
    /// Truncate or extend.
    Size(u64),
    Mode(u32),
    ModTime(SystemTime),
    /// Backend-specific attribute; backends that do not recognize the
    /// payload fail with `UnsupportedAttributes`.
    Opaque(Opaque),
}

impl Attr {
    pub fn label(&self) -> &'static str {
        match self {
            Attr::Name(_) => "name",
            Attr::Size(_) => "size",
            Attr::Mode(_) => "mode",
            Attr::ModTime(_) => "mtime",
            Attr::Opaque(_) => "opaque",
        }
    }
}

/// Events delivered to resource listeners.
///
/// Mutation events are fired after the fact. `Before*` events fire ahead of
/// dispatch in routed filesystems; a listener returning an error vetoes the
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Created,
    Modified,
    Deleted,
    BeforeOpen,
    BeforeBucketRead,
    BeforeDelete,
    BeforeReadAttrs,
    BeforeSymLink,
    BeforeHardLink,
    BeforeMkBucket,
    /// Application-defined event.
    Custom(serde_json::Value),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Custom(value) => write!(f, "Custom({value})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Transaction isolation levels, weakest to strongest.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum IsolationLevel {
    /// Whatever the backend does by default.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    WriteCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
    Linearizable,
}

/// Options for beginning a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    /// Mutations inside a read-only transaction fail.
    pub read_only: bool,
}

impl TxOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

/// Kind of link for two-path link operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum LinkMode {
    /// Symbolic link: a new entry pointing at the old path.
    Sym,
    /// Reference link: a copy that may share storage.
    Ref,
    /// Hard link: a second name for the same data.
    Hard,
}

/// Open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Writes go to the end.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Read and write an existing blob.
    pub fn write() -> Self {
        Self {
            write: true,
            ..Default::default()
        }
    }

    /// Create or append.
    pub fn append() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create with write access, keeping existing content.
    pub fn create() -> Self {
        Self {
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::create()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            truncate: true,
            ..Self::create()
        }
    }

    /// Returns true if the open may modify the blob.
    pub fn is_mutating(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }
}
