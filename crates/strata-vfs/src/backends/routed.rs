//! Filesystems assembled from route handlers.
//!
//! [`RoutedFileSystemBuilder`] maps path patterns to closures, which is the
//! quickest way to expose something that is not a filesystem (an API, a
//! catalog, generated content) through the [`FileSystem`] contract.
//!
//! Every operation fires its `Before*` event to listeners registered at
//! exactly that path before dispatching, so a listener can veto it.
//! Operations with no handlers configured are `Unsupported`.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::context::Context;
use crate::error::{VfsError, VfsResult};
use crate::ops::{Blob, FileSystem, ListenerHandle, ResourceListener, blob_range};
use crate::path::VfsPath;
use crate::result_set::{ResultSet, VecResultSet};
use crate::router::{Router, RoutingContext};
use crate::types::{Entry, Event, OpenFlags, Options, option_u64};

type PathHandler<T> = Box<dyn Fn(&Context, &VfsPath) -> VfsResult<T> + Send + Sync>;
type MkBucketHandler = Box<dyn Fn(&Context, &VfsPath, &Options) -> VfsResult<()> + Send + Sync>;
type LinkHandler = Box<dyn Fn(&Context, &VfsPath, &VfsPath) -> VfsResult<()> + Send + Sync>;

/// Arguments handed to blob handlers.
#[derive(Debug, Clone)]
pub struct OpenArgs {
    pub flags: OpenFlags,
    pub options: Options,
}

/// A blob over an in-memory buffer.
///
/// Handy as the return value of blob handlers. Writes land in the buffer
/// only; use [`into_inner`](Self::into_inner) to get them back.
#[derive(Debug, Default)]
pub struct BufferBlob {
    cursor: Cursor<Vec<u8>>,
    writable: bool,
}

impl BufferBlob {
    /// Read-only blob over `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            cursor: Cursor::new(data.into()),
            writable: false,
        }
    }

    /// Read-write blob starting with `data`.
    pub fn writable(data: impl Into<Vec<u8>>) -> Self {
        Self {
            cursor: Cursor::new(data.into()),
            writable: true,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(VfsError::permission_denied("blob is read-only"))
        }
    }
}

impl Read for BufferBlob {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for BufferBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_writable()?;
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for BufferBlob {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl Blob for BufferBlob {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let data = self.cursor.get_ref();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.check_writable()?;
        let data = self.cursor.get_mut();
        let range = blob_range(offset, buf.len())?;
        if range.end > data.len() {
            data.resize(range.end, 0);
        }
        data[range].copy_from_slice(buf);
        Ok(buf.len())
    }
}

/// A [`FileSystem`] whose operations are dispatched to route handlers.
///
/// Dispatch rules:
/// - `open` and `read_bucket` use the blob and bucket routes; an unmatched
///   path is `NotFound`.
/// - `delete` tries the delete routes, then the fallback; an unmatched path
///   succeeds since the resource is absent anyway.
/// - `read_attrs` tries the attribute routes, then the fallback; an
///   unmatched path is `NotFound`.
/// - `mk_bucket`, `sym_link` and `hard_link` call their single handler.
pub struct RoutedFileSystem {
    name: String,
    blobs: Router<Box<dyn Blob>, OpenArgs>,
    buckets: Router<Vec<Entry>, Options>,
    deletes: Router<()>,
    attrs: Router<Entry>,
    fallback_delete: Option<PathHandler<()>>,
    fallback_read_attrs: Option<PathHandler<Entry>>,
    mk_bucket: Option<MkBucketHandler>,
    sym_link: Option<LinkHandler>,
    hard_link: Option<LinkHandler>,
    listeners: DashMap<ListenerHandle, (VfsPath, Arc<dyn ResourceListener>)>,
    next_handle: AtomicU64,
}

impl std::fmt::Debug for RoutedFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedFileSystem")
            .field("name", &self.name)
            .field("blobs", &self.blobs)
            .field("buckets", &self.buckets)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl RoutedFileSystem {
    pub fn builder() -> RoutedFileSystemBuilder {
        RoutedFileSystemBuilder::new()
    }

    /// Deliver `event` to listeners registered at exactly `path`.
    fn notify(&self, path: &VfsPath, event: &Event) -> VfsResult<()> {
        let matching: Vec<Arc<dyn ResourceListener>> = self
            .listeners
            .iter()
            .filter(|l| l.value().0 == *path)
            .map(|l| Arc::clone(&l.value().1))
            .collect();
        for listener in matching {
            listener.on_event(path, event)?;
        }
        Ok(())
    }

    fn handles_resources(&self) -> bool {
        !(self.blobs.is_empty() && self.buckets.is_empty())
    }

    fn unsupported(&self, op: &str) -> VfsError {
        VfsError::unsupported(op, &self.name)
    }
}

impl FileSystem for RoutedFileSystem {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn fire_event(&self, ctx: &Context, path: &VfsPath, event: &Event) -> VfsResult<()> {
        ctx.check_cancelled()?;
        self.notify(path, event)
    }

    fn add_listener(
        &self,
        _ctx: &Context,
        path: &VfsPath,
        listener: Box<dyn ResourceListener>,
    ) -> VfsResult<ListenerHandle> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .insert(handle, (path.clone(), Arc::from(listener)));
        Ok(handle)
    }

    fn remove_listener(&self, _ctx: &Context, handle: ListenerHandle) -> VfsResult<()> {
        self.listeners.remove(&handle);
        Ok(())
    }

    fn open(
        &self,
        ctx: &Context,
        path: &VfsPath,
        flags: OpenFlags,
        options: &Options,
    ) -> VfsResult<Box<dyn Blob>> {
        if self.blobs.is_empty() {
            return Err(self.unsupported("open"));
        }
        self.notify(path, &Event::BeforeOpen)?;
        let args = OpenArgs {
            flags,
            options: options.clone(),
        };
        self.blobs
            .dispatch_with(ctx, path, &args)
            .unwrap_or_else(|| Err(VfsError::not_found(format!("unmatched blob: {path}"))))
    }

    fn delete(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        if !self.handles_resources() && self.deletes.is_empty() && self.fallback_delete.is_none() {
            return Err(self.unsupported("delete"));
        }
        self.notify(path, &Event::BeforeDelete)?;
        if let Some(result) = self.deletes.dispatch(ctx, path) {
            return result;
        }
        match &self.fallback_delete {
            Some(fallback) => fallback(ctx, path),
            None => {
                debug!(%path, "delete matched no route, nothing to do");
                Ok(())
            }
        }
    }

    fn read_attrs(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Entry> {
        if !self.handles_resources() && self.attrs.is_empty() && self.fallback_read_attrs.is_none()
        {
            return Err(self.unsupported("read_attrs"));
        }
        self.notify(path, &Event::BeforeReadAttrs)?;
        if let Some(result) = self.attrs.dispatch(ctx, path) {
            return result;
        }
        match &self.fallback_read_attrs {
            Some(fallback) => fallback(ctx, path),
            None => Err(VfsError::not_found(path.to_string())),
        }
    }

    fn write_attrs(
        &self,
        _ctx: &Context,
        _path: &VfsPath,
        _attrs: &[crate::types::Attr],
    ) -> VfsResult<Entry> {
        Err(self.unsupported("write_attrs"))
    }

    fn read_bucket(
        &self,
        ctx: &Context,
        path: &VfsPath,
        options: &Options,
    ) -> VfsResult<Box<dyn ResultSet>> {
        if self.buckets.is_empty() {
            return Err(self.unsupported("read_bucket"));
        }
        self.notify(path, &Event::BeforeBucketRead)?;
        let entries = self
            .buckets
            .dispatch_with(ctx, path, options)
            .unwrap_or_else(|| Err(VfsError::not_found(format!("unmatched bucket: {path}"))))?;
        let set = match option_u64(options, "page_size") {
            Some(size) => VecResultSet::paged(entries, size as usize),
            None => VecResultSet::new(entries),
        };
        Ok(Box::new(set))
    }

    fn mk_bucket(&self, ctx: &Context, path: &VfsPath, options: &Options) -> VfsResult<()> {
        let Some(handler) = &self.mk_bucket else {
            return Err(self.unsupported("mk_bucket"));
        };
        self.notify(path, &Event::BeforeMkBucket)?;
        handler(ctx, path, options)
    }

    fn rename(&self, _ctx: &Context, _old: &VfsPath, _new: &VfsPath) -> VfsResult<()> {
        Err(self.unsupported("rename"))
    }

    fn sym_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let Some(handler) = &self.sym_link else {
            return Err(self.unsupported("sym_link"));
        };
        self.notify(old, &Event::BeforeSymLink)?;
        handler(ctx, old, new)
    }

    fn hard_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let Some(handler) = &self.hard_link else {
            return Err(self.unsupported("hard_link"));
        };
        self.notify(old, &Event::BeforeHardLink)?;
        handler(ctx, old, new)
    }
}

/// Collects routes and handlers for a [`RoutedFileSystem`].
///
/// Route methods parse their pattern and fail with `InvalidPattern` on bad
/// input, so they chain with `?`:
///
/// ```
/// use strata_vfs::{BufferBlob, Context, Entry, FileSystem, RoutedFileSystem, VfsPath};
///
/// # fn main() -> strata_vfs::VfsResult<()> {
/// let fs = RoutedFileSystem::builder()
///     .details("greeter", "1.0.0")
///     .bucket("/people", |_| Ok(vec![Entry::file("amy", 5)]))?
///     .blob("/people/{name}", |rc| {
///         Ok(Box::new(BufferBlob::new(format!("hello {}", rc.value_of("name")?))))
///     })?
///     .build();
///
/// let ctx = Context::new();
/// assert_eq!(fs.read_all(&ctx, &VfsPath::new("/people/amy"))?, b"hello amy");
/// # Ok(())
/// # }
/// ```
pub struct RoutedFileSystemBuilder {
    name: String,
    blobs: Router<Box<dyn Blob>, OpenArgs>,
    buckets: Router<Vec<Entry>, Options>,
    deletes: Router<()>,
    attrs: Router<Entry>,
    fallback_delete: Option<PathHandler<()>>,
    fallback_read_attrs: Option<PathHandler<Entry>>,
    mk_bucket: Option<MkBucketHandler>,
    sym_link: Option<LinkHandler>,
    hard_link: Option<LinkHandler>,
}

impl Default for RoutedFileSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutedFileSystemBuilder {
    pub fn new() -> Self {
        Self {
            name: "RoutedFileSystem".to_string(),
            blobs: Router::new(),
            buckets: Router::new(),
            deletes: Router::new(),
            attrs: Router::new(),
            fallback_delete: None,
            fallback_read_attrs: None,
            mk_bucket: None,
            sym_link: None,
            hard_link: None,
        }
    }

    /// Name and version reported by [`FileSystem::name`].
    pub fn details(mut self, name: &str, version: &str) -> Self {
        self.name = format!("{name} {version}");
        self
    }

    /// Serve `open` for paths matching `pattern`.
    pub fn blob<F>(mut self, pattern: &str, handler: F) -> VfsResult<Self>
    where
        F: Fn(&RoutingContext<'_, OpenArgs>) -> VfsResult<Box<dyn Blob>> + Send + Sync + 'static,
    {
        self.blobs.register(pattern, handler)?;
        Ok(self)
    }

    /// Serve `read_bucket` for paths matching `pattern`.
    pub fn bucket<F>(mut self, pattern: &str, handler: F) -> VfsResult<Self>
    where
        F: Fn(&RoutingContext<'_, Options>) -> VfsResult<Vec<Entry>> + Send + Sync + 'static,
    {
        self.buckets.register(pattern, handler)?;
        Ok(self)
    }

    /// Serve `delete` for paths matching `pattern`.
    pub fn delete<F>(mut self, pattern: &str, handler: F) -> VfsResult<Self>
    where
        F: Fn(&RoutingContext<'_>) -> VfsResult<()> + Send + Sync + 'static,
    {
        self.deletes.register(pattern, handler)?;
        Ok(self)
    }

    /// Serve `read_attrs` for paths matching `pattern`.
    pub fn attrs<F>(mut self, pattern: &str, handler: F) -> VfsResult<Self>
    where
        F: Fn(&RoutingContext<'_>) -> VfsResult<Entry> + Send + Sync + 'static,
    {
        self.attrs.register(pattern, handler)?;
        Ok(self)
    }

    /// Called for deletes no route matched.
    pub fn on_delete<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &VfsPath) -> VfsResult<()> + Send + Sync + 'static,
    {
        self.fallback_delete = Some(Box::new(handler));
        self
    }

    /// Called for attribute reads no route matched.
    pub fn on_read_attrs<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &VfsPath) -> VfsResult<Entry> + Send + Sync + 'static,
    {
        self.fallback_read_attrs = Some(Box::new(handler));
        self
    }

    pub fn on_mk_bucket<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &VfsPath, &Options) -> VfsResult<()> + Send + Sync + 'static,
    {
        self.mk_bucket = Some(Box::new(handler));
        self
    }

    pub fn on_sym_link<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &VfsPath, &VfsPath) -> VfsResult<()> + Send + Sync + 'static,
    {
        self.sym_link = Some(Box::new(handler));
        self
    }

    pub fn on_hard_link<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &VfsPath, &VfsPath) -> VfsResult<()> + Send + Sync + 'static,
    {
        self.hard_link = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> RoutedFileSystem {
        debug!(
            name = %self.name,
            blobs = self.blobs.len(),
            buckets = self.buckets.len(),
            "built routed filesystem"
        );
        RoutedFileSystem {
            name: self.name,
            blobs: self.blobs,
            buckets: self.buckets,
            deletes: self.deletes,
            attrs: self.attrs,
            fallback_delete: self.fallback_delete,
            fallback_read_attrs: self.fallback_read_attrs,
            mk_bucket: self.mk_bucket,
            sym_link: self.sym_link,
            hard_link: self.hard_link,
            listeners: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }
}
