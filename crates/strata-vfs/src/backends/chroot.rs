//! Prefixing adapter.
//!
//! Exposes a subtree of another filesystem as if it were the whole thing.

use std::sync::Arc;

use tracing::trace;

use crate::context::Context;
use crate::error::VfsResult;
use crate::ops::{Blob, FileSystem, ListenerHandle, ResourceListener};
use crate::path::VfsPath;
use crate::result_set::ResultSet;
use crate::types::{Attr, Entry, Event, OpenFlags, Options, TxOptions};

/// Adds `prefix` to every path and delegates.
///
/// Paths are normalized before the prefix is added, so `..` cannot climb
/// out of the prefix.
pub struct ChRoot {
    prefix: VfsPath,
    inner: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for ChRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChRoot")
            .field("prefix", &self.prefix)
            .field("inner", &self.inner.name())
            .finish()
    }
}

impl ChRoot {
    pub fn new(prefix: impl Into<VfsPath>, inner: impl FileSystem + 'static) -> Self {
        Self::from_arc(prefix, Arc::new(inner))
    }

    pub fn from_arc(prefix: impl Into<VfsPath>, inner: Arc<dyn FileSystem>) -> Self {
        Self {
            prefix: prefix.into().normalize(),
            inner,
        }
    }

    pub fn prefix(&self) -> &VfsPath {
        &self.prefix
    }

    /// The path handed to the wrapped filesystem for `path`.
    pub fn resolve(&self, path: &VfsPath) -> VfsPath {
        self.prefix.join(&path.normalize())
    }
}

/// Rewrites wrapped-filesystem paths back into the chroot's namespace.
struct ChRootListener {
    prefix: VfsPath,
    delegate: Box<dyn ResourceListener>,
}

impl ResourceListener for ChRootListener {
    fn on_event(&self, path: &VfsPath, event: &Event) -> VfsResult<()> {
        match path.trim_prefix(&self.prefix) {
            Ok(local) => self.delegate.on_event(&local, event),
            Err(_) => {
                trace!(%path, prefix = %self.prefix, "event outside chroot dropped");
                Ok(())
            }
        }
    }
}

impl FileSystem for ChRoot {
    fn name(&self) -> String {
        format!("chroot({})", self.inner.name())
    }

    fn connect(&self, ctx: &Context, path: &VfsPath, options: &mut Options) -> VfsResult<()> {
        self.inner.connect(ctx, &self.resolve(path), options)
    }

    fn disconnect(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        self.inner.disconnect(ctx, &self.resolve(path))
    }

    fn fire_event(&self, ctx: &Context, path: &VfsPath, event: &Event) -> VfsResult<()> {
        self.inner.fire_event(ctx, &self.resolve(path), event)
    }

    fn add_listener(
        &self,
        ctx: &Context,
        path: &VfsPath,
        listener: Box<dyn ResourceListener>,
    ) -> VfsResult<ListenerHandle> {
        let wrapped = ChRootListener {
            prefix: self.prefix.clone(),
            delegate: listener,
        };
        self.inner
            .add_listener(ctx, &self.resolve(path), Box::new(wrapped))
    }

    fn remove_listener(&self, ctx: &Context, handle: ListenerHandle) -> VfsResult<()> {
        self.inner.remove_listener(ctx, handle)
    }

    fn begin(&self, ctx: &Context, path: &VfsPath, options: &TxOptions) -> VfsResult<Context> {
        self.inner.begin(ctx, &self.resolve(path), options)
    }

    fn commit(&self, ctx: &Context) -> VfsResult<()> {
        self.inner.commit(ctx)
    }

    fn rollback(&self, ctx: &Context) -> VfsResult<()> {
        self.inner.rollback(ctx)
    }

    fn open(
        &self,
        ctx: &Context,
        path: &VfsPath,
        flags: OpenFlags,
        options: &Options,
    ) -> VfsResult<Box<dyn Blob>> {
        self.inner.open(ctx, &self.resolve(path), flags, options)
    }

    fn delete(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        self.inner.delete(ctx, &self.resolve(path))
    }

    fn read_attrs(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Entry> {
        let mut entry = self.inner.read_attrs(ctx, &self.resolve(path))?;
        if path.normalize().is_root() {
            entry.name.clear();
        }
        Ok(entry)
    }

    fn read_forks(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Vec<String>> {
        self.inner.read_forks(ctx, &self.resolve(path))
    }

    fn write_attrs(&self, ctx: &Context, path: &VfsPath, attrs: &[Attr]) -> VfsResult<Entry> {
        self.inner.write_attrs(ctx, &self.resolve(path), attrs)
    }

    fn read_bucket(
        &self,
        ctx: &Context,
        path: &VfsPath,
        options: &Options,
    ) -> VfsResult<Box<dyn ResultSet>> {
        self.inner.read_bucket(ctx, &self.resolve(path), options)
    }

    fn invoke(
        &self,
        ctx: &Context,
        endpoint: &str,
        args: &[serde_json::Value],
    ) -> VfsResult<serde_json::Value> {
        self.inner.invoke(ctx, endpoint, args)
    }

    fn mk_bucket(&self, ctx: &Context, path: &VfsPath, options: &Options) -> VfsResult<()> {
        self.inner.mk_bucket(ctx, &self.resolve(path), options)
    }

    fn rename(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.inner.rename(ctx, &self.resolve(old), &self.resolve(new))
    }

    fn sym_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.inner.sym_link(ctx, &self.resolve(old), &self.resolve(new))
    }

    fn hard_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.inner.hard_link(ctx, &self.resolve(old), &self.resolve(new))
    }

    fn ref_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.inner.ref_link(ctx, &self.resolve(old), &self.resolve(new))
    }

    fn close(&self) -> VfsResult<()> {
        self.inner.close()
    }
}
