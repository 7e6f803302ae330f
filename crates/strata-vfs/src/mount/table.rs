//! Composite filesystem over a tree of mount points.
//!
//! Routes every operation to the backend mounted at the longest matching
//! prefix, passing the residual path. Unmounted intermediate nodes of the
//! tree behave like read-only virtual directories.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::tree::{Lookup, MountTree, Resolution};
use crate::context::{Context, ContextKey};
use crate::error::{VfsError, VfsResult};
use crate::ops::{Blob, FileSystem, ListenerHandle, ResourceListener};
use crate::path::VfsPath;
use crate::result_set::{JoinedResultSet, ResultSet, VecResultSet};
use crate::types::{Attr, Entry, Event, OpenFlags, Options, TxOptions, option_u64};

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g. "/mnt/project").
    pub path: VfsPath,
    /// Name of the mounted backend.
    pub backend: String,
}

/// Backend-side registration behind a virtual listener handle.
struct WrappedHandle {
    backend: Arc<dyn FileSystem>,
    handle: ListenerHandle,
    mount_point: VfsPath,
}

/// Rewrites backend-relative event paths to full virtual paths.
struct MountPointListener {
    prefix: VfsPath,
    delegate: Box<dyn ResourceListener>,
}

impl ResourceListener for MountPointListener {
    fn on_event(&self, path: &VfsPath, event: &Event) -> VfsResult<()> {
        self.delegate.on_event(&self.prefix.join(path), event)
    }
}

/// Stitches independent backends into one hierarchy.
///
/// ```
/// use strata_vfs::{Context, FileSystem, MemoryBackend, MountableFileSystem, VfsPath};
///
/// let fs = MountableFileSystem::new();
/// fs.mount("/scratch", MemoryBackend::new()).unwrap();
///
/// let ctx = Context::new();
/// let path = VfsPath::new("/scratch/notes.txt");
/// fs.write_all(&ctx, &path, b"hello").unwrap();
/// assert_eq!(fs.read_all(&ctx, &path).unwrap(), b"hello");
/// ```
pub struct MountableFileSystem {
    tree: RwLock<MountTree>,
    handles: DashMap<ListenerHandle, WrappedHandle>,
    next_handle: AtomicU64,
    /// Where `begin` stashes the transaction path in the returned context.
    tx_key: ContextKey,
}

impl std::fmt::Debug for MountableFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountableFileSystem")
            .field("tree", &*self.tree.read())
            .field("listeners", &self.handles.len())
            .finish()
    }
}

impl Default for MountableFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MountableFileSystem {
    /// Create a composite filesystem with nothing mounted.
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(MountTree::new()),
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
            tx_key: ContextKey::unique("mountable.tx-path"),
        }
    }

    /// Mount a filesystem at the given path.
    ///
    /// Anything already mounted at exactly this path, including a subtree of
    /// mount points, is replaced. Mounting at the root or below another
    /// mounted backend fails.
    pub fn mount(&self, path: impl Into<VfsPath>, fs: impl FileSystem + 'static) -> VfsResult<()> {
        self.mount_arc(path, Arc::new(fs))
    }

    /// Mount a filesystem (already wrapped in Arc) at the given path.
    pub fn mount_arc(&self, path: impl Into<VfsPath>, fs: Arc<dyn FileSystem>) -> VfsResult<()> {
        let path = path.into();
        let backend = fs.name();
        self.tree.write().mount(&path, fs)?;
        debug!(%path, %backend, "mounted");
        Ok(())
    }

    /// Unmount whatever is at exactly `path`.
    ///
    /// Returns `true` if something was removed. Listener handles into the
    /// removed backends stay valid until removed.
    pub fn unmount(&self, path: impl Into<VfsPath>) -> bool {
        let path = path.into();
        let removed = self.tree.write().remove(&path);
        if removed {
            debug!(%path, "unmounted");
        }
        removed
    }

    /// List all current mounts.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.tree
            .read()
            .mounts()
            .into_iter()
            .map(|(path, fs)| MountInfo {
                path,
                backend: fs.name(),
            })
            .collect()
    }

    /// Resolve `path` to `(mount point, residual path, backend)`.
    pub fn resolve(&self, path: &VfsPath) -> VfsResult<Resolution> {
        self.tree.read().resolve(path)
    }

    fn lookup(&self, path: &VfsPath) -> Lookup {
        self.tree.read().lookup(path)
    }

    /// Resolve both sides of a two-path operation. They must share a mount
    /// point; no backend is touched otherwise.
    fn resolve_pair(
        &self,
        op: &str,
        old: &VfsPath,
        new: &VfsPath,
    ) -> VfsResult<(Arc<dyn FileSystem>, VfsPath, VfsPath)> {
        let (from, to) = {
            let tree = self.tree.read();
            (tree.resolve(old)?, tree.resolve(new)?)
        };
        if from.mount_point != to.mount_point {
            return Err(VfsError::Unsupported(format!(
                "{op} across mount points: {old} ({}) -> {new} ({})",
                from.mount_point, to.mount_point
            )));
        }
        Ok((from.backend, from.provider_path, to.provider_path))
    }

    /// List several buckets, possibly on different backends, as one
    /// result set in the given order.
    pub fn read_buckets(
        &self,
        ctx: &Context,
        paths: &[VfsPath],
        options: &Options,
    ) -> VfsResult<JoinedResultSet> {
        let mut joined = JoinedResultSet::default();
        for path in paths {
            match self.read_bucket(ctx, path, options) {
                Ok(set) => joined.push(set),
                Err(e) => {
                    // Release what was already opened; the listing error wins.
                    if let Err(close_err) = joined.close() {
                        warn!(error = %close_err, "closing partial listing failed");
                    }
                    return Err(e);
                }
            }
        }
        Ok(joined)
    }

    fn tx_path<'c>(&self, ctx: &'c Context) -> VfsResult<&'c VfsPath> {
        ctx.value::<VfsPath>(self.tx_key)
            .ok_or_else(|| VfsError::invalid_transaction("wrong context"))
    }
}

impl FileSystem for MountableFileSystem {
    fn name(&self) -> String {
        "MountableFileSystem".to_string()
    }

    fn connect(&self, ctx: &Context, path: &VfsPath, options: &mut Options) -> VfsResult<()> {
        let res = self.resolve(path)?;
        res.backend.connect(ctx, &res.provider_path, options)
    }

    /// Disconnects the backend and always removes its mount point, even
    /// when the backend reports an error.
    fn disconnect(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        let res = self.resolve(path)?;
        let result = res.backend.disconnect(ctx, &res.provider_path);
        self.tree.write().remove(&res.mount_point);
        debug!(mount_point = %res.mount_point, "unmounted on disconnect");
        if let Err(e) = &result {
            warn!(mount_point = %res.mount_point, error = %e, "backend disconnect failed");
        }
        result
    }

    fn fire_event(&self, ctx: &Context, path: &VfsPath, event: &Event) -> VfsResult<()> {
        let res = self.resolve(path)?;
        res.backend.fire_event(ctx, &res.provider_path, event)
    }

    fn add_listener(
        &self,
        ctx: &Context,
        path: &VfsPath,
        listener: Box<dyn ResourceListener>,
    ) -> VfsResult<ListenerHandle> {
        let res = self.resolve(path)?;
        let adapter = MountPointListener {
            prefix: res.mount_point.clone(),
            delegate: listener,
        };
        let handle = res
            .backend
            .add_listener(ctx, &res.provider_path, Box::new(adapter))?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            id,
            WrappedHandle {
                backend: res.backend,
                handle,
                mount_point: res.mount_point,
            },
        );
        Ok(id)
    }

    fn remove_listener(&self, ctx: &Context, handle: ListenerHandle) -> VfsResult<()> {
        match self.handles.remove(&handle) {
            Some((_, wrapped)) => {
                debug!(handle, mount_point = %wrapped.mount_point, "removing listener");
                wrapped.backend.remove_listener(ctx, wrapped.handle)
            }
            None => Ok(()),
        }
    }

    fn begin(&self, ctx: &Context, path: &VfsPath, options: &TxOptions) -> VfsResult<Context> {
        let res = self.resolve(path)?;
        let tx = res.backend.begin(ctx, &res.provider_path, options)?;
        Ok(tx.with_value(self.tx_key, path.clone()))
    }

    fn commit(&self, ctx: &Context) -> VfsResult<()> {
        let path = self.tx_path(ctx)?;
        self.resolve(path)?.backend.commit(ctx)
    }

    fn rollback(&self, ctx: &Context) -> VfsResult<()> {
        let path = self.tx_path(ctx)?;
        self.resolve(path)?.backend.rollback(ctx)
    }

    fn open(
        &self,
        ctx: &Context,
        path: &VfsPath,
        flags: OpenFlags,
        options: &Options,
    ) -> VfsResult<Box<dyn Blob>> {
        let res = self.resolve(path)?;
        res.backend.open(ctx, &res.provider_path, flags, options)
    }

    /// Deleting a mount point or an intermediate node unmounts everything
    /// below it instead of touching backend data.
    fn delete(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        if path.is_root() {
            return Err(VfsError::permission_denied("cannot delete the root"));
        }
        match self.lookup(path) {
            Lookup::Mounted(res) if !res.provider_path.is_root() => {
                res.backend.delete(ctx, &res.provider_path)
            }
            Lookup::Mounted(_) | Lookup::Directory(_) => {
                self.unmount(path.clone());
                Ok(())
            }
            Lookup::Missing => Ok(()),
        }
    }

    fn read_attrs(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Entry> {
        match self.lookup(path) {
            Lookup::Mounted(res) => {
                let mut entry = res.backend.read_attrs(ctx, &res.provider_path)?;
                if res.provider_path.is_root() {
                    entry.name = path.name().unwrap_or_default().to_string();
                }
                Ok(entry)
            }
            Lookup::Directory(_) => Ok(Entry::directory(path.name().unwrap_or_default())),
            Lookup::Missing => Err(VfsError::mount_point_not_found(path.to_string())),
        }
    }

    fn read_forks(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Vec<String>> {
        let res = self.resolve(path)?;
        res.backend.read_forks(ctx, &res.provider_path)
    }

    fn write_attrs(&self, ctx: &Context, path: &VfsPath, attrs: &[Attr]) -> VfsResult<Entry> {
        let res = self.resolve(path)?;
        res.backend.write_attrs(ctx, &res.provider_path, attrs)
    }

    fn read_bucket(
        &self,
        ctx: &Context,
        path: &VfsPath,
        options: &Options,
    ) -> VfsResult<Box<dyn ResultSet>> {
        match self.lookup(path) {
            Lookup::Mounted(res) => res.backend.read_bucket(ctx, &res.provider_path, options),
            Lookup::Directory(names) => {
                let entries = names.into_iter().map(Entry::directory).collect();
                let set = match option_u64(options, "page_size") {
                    Some(size) => VecResultSet::paged(entries, size as usize),
                    None => VecResultSet::new(entries),
                };
                Ok(Box::new(set))
            }
            Lookup::Missing => Err(VfsError::mount_point_not_found(path.to_string())),
        }
    }

    /// Endpoints are addressed like paths and routed to the owning backend.
    fn invoke(
        &self,
        ctx: &Context,
        endpoint: &str,
        args: &[serde_json::Value],
    ) -> VfsResult<serde_json::Value> {
        let res = self.resolve(&VfsPath::new(endpoint))?;
        res.backend
            .invoke(ctx, &res.provider_path.to_string(), args)
    }

    fn mk_bucket(&self, ctx: &Context, path: &VfsPath, options: &Options) -> VfsResult<()> {
        match self.lookup(path) {
            Lookup::Mounted(res) => res.backend.mk_bucket(ctx, &res.provider_path, options),
            Lookup::Directory(_) => Ok(()),
            Lookup::Missing => Err(VfsError::mount_point_not_found(path.to_string())),
        }
    }

    fn rename(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let (fs, from, to) = self.resolve_pair("rename", old, new)?;
        fs.rename(ctx, &from, &to)
    }

    fn sym_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let (fs, from, to) = self.resolve_pair("sym_link", old, new)?;
        fs.sym_link(ctx, &from, &to)
    }

    fn hard_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let (fs, from, to) = self.resolve_pair("hard_link", old, new)?;
        fs.hard_link(ctx, &from, &to)
    }

    fn ref_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let (fs, from, to) = self.resolve_pair("ref_link", old, new)?;
        fs.ref_link(ctx, &from, &to)
    }

    /// Backends are shared and closed by their owners.
    fn close(&self) -> VfsResult<()> {
        Ok(())
    }
}
