//! The filesystem contract.
//!
//! Every backend and the composite [`MountableFileSystem`](crate::MountableFileSystem)
//! implement [`FileSystem`]. Operations are path-based and synchronous; each
//! takes the caller's [`Context`] and a [`VfsPath`] relative to the
//! implementor's own root.

use std::io::{Read, Seek, Write};

use crate::context::Context;
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::result_set::{ResultSet, collect_all};
use crate::types::{Attr, Entry, Event, LinkMode, OpenFlags, Options, TxOptions};

/// Opaque listener registration handle.
pub type ListenerHandle = u64;

/// Receives events for a subtree.
///
/// Returning an error from a `Before*` event vetoes the operation that
/// fired it.
pub trait ResourceListener: Send + Sync {
    fn on_event(&self, path: &VfsPath, event: &Event) -> VfsResult<()>;
}

impl<F> ResourceListener for F
where
    F: Fn(&VfsPath, &Event) -> VfsResult<()> + Send + Sync,
{
    fn on_event(&self, path: &VfsPath, event: &Event) -> VfsResult<()> {
        self(path, event)
    }
}

/// An open resource.
///
/// Besides streaming through `Read`/`Write`/`Seek`, blobs support
/// positional access that does not move the cursor.
pub trait Blob: Read + Write + Seek + Send {
    /// Read into `buf` starting at `offset`. Returns 0 at end of data.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize>;

    /// Write `buf` at `offset`, extending the blob as needed.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize>;

    /// Flush and release the blob. Further use is undefined.
    fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}

/// Byte range `offset..offset + len` of an in-memory blob, or an error if it
/// cannot be addressed.
pub(crate) fn blob_range(offset: u64, len: usize) -> VfsResult<std::ops::Range<usize>> {
    let end = usize::try_from(offset)
        .ok()
        .and_then(|start| start.checked_add(len).map(|end| (start, end)))
        .filter(|(_, end)| *end <= isize::MAX as usize);
    match end {
        Some((start, end)) => Ok(start..end),
        None => Err(VfsError::other(format!(
            "offset {offset} plus {len} bytes is out of range"
        ))),
    }
}

/// Path plus attributes, for batch writes.
#[derive(Debug, Clone)]
pub struct PathAttrs {
    pub path: VfsPath,
    pub attrs: Vec<Attr>,
}

impl PathAttrs {
    pub fn new(path: impl Into<VfsPath>, attrs: Vec<Attr>) -> Self {
        Self {
            path: path.into(),
            attrs,
        }
    }
}

/// Core filesystem operations.
///
/// Optional capabilities (connection management, listeners, transactions,
/// forks, invoke, links) default to [`VfsError::Unsupported`] naming the
/// operation and [`name`](Self::name) of the implementor.
pub trait FileSystem: Send + Sync {
    /// Human-readable name, used in error messages and logs.
    fn name(&self) -> String;

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Authenticate or otherwise prepare the resource at `path`. Backends
    /// may write back into `options` (e.g. refreshed credentials).
    fn connect(&self, _ctx: &Context, _path: &VfsPath, _options: &mut Options) -> VfsResult<()> {
        Err(VfsError::unsupported("connect", &self.name()))
    }

    fn disconnect(&self, _ctx: &Context, _path: &VfsPath) -> VfsResult<()> {
        Err(VfsError::unsupported("disconnect", &self.name()))
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Deliver `event` to the listeners registered for `path`.
    fn fire_event(&self, _ctx: &Context, _path: &VfsPath, _event: &Event) -> VfsResult<()> {
        Err(VfsError::unsupported("fire_event", &self.name()))
    }

    fn add_listener(
        &self,
        _ctx: &Context,
        _path: &VfsPath,
        _listener: Box<dyn ResourceListener>,
    ) -> VfsResult<ListenerHandle> {
        Err(VfsError::unsupported("add_listener", &self.name()))
    }

    /// Unregister a listener. Unknown handles are not an error.
    fn remove_listener(&self, _ctx: &Context, _handle: ListenerHandle) -> VfsResult<()> {
        Err(VfsError::unsupported("remove_listener", &self.name()))
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a transaction covering `path`. The returned context must be
    /// passed, unmodified, to [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback) and to every operation inside it.
    fn begin(&self, _ctx: &Context, _path: &VfsPath, _options: &TxOptions) -> VfsResult<Context> {
        Err(VfsError::unsupported("begin", &self.name()))
    }

    fn commit(&self, _ctx: &Context) -> VfsResult<()> {
        Err(VfsError::unsupported("commit", &self.name()))
    }

    fn rollback(&self, _ctx: &Context) -> VfsResult<()> {
        Err(VfsError::unsupported("rollback", &self.name()))
    }

    // ========================================================================
    // Resources
    // ========================================================================

    fn open(
        &self,
        ctx: &Context,
        path: &VfsPath,
        flags: OpenFlags,
        options: &Options,
    ) -> VfsResult<Box<dyn Blob>>;

    /// Delete `path` and everything below it. Deleting a missing resource
    /// succeeds.
    fn delete(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()>;

    fn read_attrs(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Entry>;

    /// Names of the alternate data streams attached to `path`.
    fn read_forks(&self, _ctx: &Context, _path: &VfsPath) -> VfsResult<Vec<String>> {
        Err(VfsError::unsupported("read_forks", &self.name()))
    }

    /// Apply `attrs` in order and return the resulting entry.
    fn write_attrs(&self, ctx: &Context, path: &VfsPath, attrs: &[Attr]) -> VfsResult<Entry>;

    /// List the direct children of a bucket.
    fn read_bucket(
        &self,
        ctx: &Context,
        path: &VfsPath,
        options: &Options,
    ) -> VfsResult<Box<dyn ResultSet>>;

    /// Call a backend-specific endpoint that is not a filesystem operation.
    fn invoke(
        &self,
        _ctx: &Context,
        endpoint: &str,
        _args: &[serde_json::Value],
    ) -> VfsResult<serde_json::Value> {
        Err(VfsError::unsupported(&format!("invoke {endpoint}"), &self.name()))
    }

    /// Create a bucket and any missing parents. Existing buckets are fine.
    fn mk_bucket(&self, ctx: &Context, path: &VfsPath, options: &Options) -> VfsResult<()>;

    /// Move `old` to `new`, replacing `new` if it exists.
    fn rename(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()>;

    fn sym_link(&self, _ctx: &Context, _old: &VfsPath, _new: &VfsPath) -> VfsResult<()> {
        Err(VfsError::unsupported("sym_link", &self.name()))
    }

    fn hard_link(&self, _ctx: &Context, _old: &VfsPath, _new: &VfsPath) -> VfsResult<()> {
        Err(VfsError::unsupported("hard_link", &self.name()))
    }

    /// Copy `old` to `new`, sharing storage where the backend can.
    fn ref_link(&self, _ctx: &Context, _old: &VfsPath, _new: &VfsPath) -> VfsResult<()> {
        Err(VfsError::unsupported("ref_link", &self.name()))
    }

    /// Release the filesystem. Further use is undefined.
    fn close(&self) -> VfsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, ctx: &Context, path: &VfsPath) -> bool {
        self.read_attrs(ctx, path).is_ok()
    }

    /// Read entire blob contents.
    fn read_all(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Vec<u8>> {
        let mut blob = self.open(ctx, path, OpenFlags::read(), &Options::new())?;
        let mut buf = Vec::new();
        let read = blob.read_to_end(&mut buf);
        let closed = blob.close();
        read?;
        closed?;
        Ok(buf)
    }

    /// Replace the blob at `path` with `data`, creating it if needed.
    fn write_all(&self, ctx: &Context, path: &VfsPath, data: &[u8]) -> VfsResult<()> {
        let mut blob = self.open(ctx, path, OpenFlags::create_truncate(), &Options::new())?;
        let written = blob.write_all(data);
        let closed = blob.close();
        written?;
        closed
    }

    /// List a bucket by draining every page.
    fn list_all(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Vec<Entry>> {
        let mut set = self.read_bucket(ctx, path, &Options::new())?;
        let listed = collect_all(set.as_mut(), ctx);
        let closed = set.close();
        let entries = listed?;
        closed?;
        Ok(entries)
    }

    /// Visit every entry below `path` depth-first with its full path.
    /// Buckets are visited before their children.
    fn walk(
        &self,
        ctx: &Context,
        path: &VfsPath,
        visit: &mut dyn FnMut(&VfsPath, &Entry) -> VfsResult<()>,
    ) -> VfsResult<()> {
        for entry in self.list_all(ctx, path)? {
            ctx.check_cancelled()?;
            let child = path.child(&entry.name);
            visit(&child, &entry)?;
            if entry.is_dir() {
                self.walk(ctx, &child, visit)?;
            }
        }
        Ok(())
    }

    /// Create a link of the given kind at `new` pointing to `old`.
    fn link(&self, ctx: &Context, mode: LinkMode, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        match mode {
            LinkMode::Sym => self.sym_link(ctx, old, new),
            LinkMode::Hard => self.hard_link(ctx, old, new),
            LinkMode::Ref => self.ref_link(ctx, old, new),
        }
    }

    /// Delete several paths; stops at the first failure.
    fn batch_delete(&self, ctx: &Context, paths: &[VfsPath]) -> VfsResult<()> {
        for path in paths {
            self.delete(ctx, path)
                .map_err(|e| e.context(format!("batch delete {path}")))?;
        }
        Ok(())
    }

    /// Read attributes of several paths, in order.
    fn batch_read_attrs(&self, ctx: &Context, paths: &[VfsPath]) -> VfsResult<Vec<Entry>> {
        paths
            .iter()
            .map(|path| {
                self.read_attrs(ctx, path)
                    .map_err(|e| e.context(format!("batch read attrs {path}")))
            })
            .collect()
    }

    /// Write attributes of several paths, in order.
    fn batch_write_attrs(&self, ctx: &Context, batch: &[PathAttrs]) -> VfsResult<Vec<Entry>> {
        batch
            .iter()
            .map(|item| {
                self.write_attrs(ctx, &item.path, &item.attrs)
                    .map_err(|e| e.context(format!("batch write attrs {}", item.path)))
            })
            .collect()
    }
}
