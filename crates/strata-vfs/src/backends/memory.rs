//! In-memory filesystem backend.
//!
//! Used for `/scratch` and testing. All data is ephemeral.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{Context, ContextKey};
use crate::error::{VfsError, VfsResult};
use crate::ops::{Blob, FileSystem, ListenerHandle, ResourceListener, blob_range};
use crate::path::VfsPath;
use crate::result_set::{ResultSet, VecResultSet};
use crate::types::{
    Attr, Entry, Event, IsolationLevel, OpenFlags, Options, TxOptions, option_u64,
};

/// Symlinks followed before giving up.
const MAX_LINK_DEPTH: usize = 8;

/// Node in the memory filesystem.
#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        mode: u32,
        mtime: SystemTime,
    },
    Directory {
        mode: u32,
        mtime: SystemTime,
    },
    Symlink {
        target: VfsPath,
        mtime: SystemTime,
    },
}

impl Node {
    fn directory() -> Self {
        Node::Directory {
            mode: 0o755,
            mtime: SystemTime::now(),
        }
    }

    fn file(data: Vec<u8>) -> Self {
        Node::File {
            data,
            mode: 0o644,
            mtime: SystemTime::now(),
        }
    }

    fn entry(&self, name: &str) -> Entry {
        match self {
            Node::File { data, mode, mtime } => Entry::file(name, data.len() as u64)
                .with_mode(*mode)
                .with_mtime(*mtime),
            Node::Directory { mode, mtime } => {
                Entry::directory(name).with_mode(*mode).with_mtime(*mtime)
            }
            Node::Symlink { target, mtime } => {
                Entry::symlink(name, target.to_string().len() as u64).with_mtime(*mtime)
            }
        }
    }

    fn touch(&mut self) {
        let now = SystemTime::now();
        match self {
            Node::File { mtime, .. } | Node::Directory { mtime, .. } | Node::Symlink { mtime, .. } => {
                *mtime = now
            }
        }
    }
}

type Nodes = HashMap<VfsPath, Node>;

/// Snapshot taken at `begin`, restored on rollback.
struct Transaction {
    snapshot: Nodes,
    read_only: bool,
}

struct Inner {
    nodes: RwLock<Nodes>,
    read_only: AtomicBool,
    listeners: DashMap<ListenerHandle, (VfsPath, Arc<dyn ResourceListener>)>,
    next_handle: AtomicU64,
    transactions: Mutex<HashMap<Uuid, Transaction>>,
    tx_key: ContextKey,
}

impl Inner {
    /// Deliver an event to every listener registered at or above `path`.
    /// Listeners run outside of all locks.
    fn notify(&self, path: &VfsPath, event: &Event) -> VfsResult<()> {
        let matching: Vec<Arc<dyn ResourceListener>> = self
            .listeners
            .iter()
            .filter(|l| path.starts_with(&l.value().0))
            .map(|l| Arc::clone(&l.value().1))
            .collect();
        for listener in matching {
            listener.on_event(path, event)?;
        }
        Ok(())
    }

    /// Post-mutation notification. The change already happened, so listener
    /// errors are logged rather than returned.
    fn notify_after(&self, path: &VfsPath, event: Event) {
        if let Err(e) = self.notify(path, &event) {
            warn!(%path, %event, error = %e, "listener failed");
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `parking_lot` locks. Clones share the same
/// storage. All data is lost when the last clone is dropped.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("nodes", &self.inner.nodes.read().len())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        // Root directory always exists
        nodes.insert(VfsPath::root(), Node::directory());
        Self {
            inner: Arc::new(Inner {
                nodes: RwLock::new(nodes),
                read_only: AtomicBool::new(false),
                listeners: DashMap::new(),
                next_handle: AtomicU64::new(1),
                transactions: Mutex::new(HashMap::new()),
                tx_key: ContextKey::unique("memory.tx"),
            }),
        }
    }

    /// Reject every mutation from now on (or accept them again).
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::Relaxed);
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::Relaxed)
    }

    fn check_writable(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        if self.is_read_only() {
            return Err(VfsError::permission_denied(format!("{path}: read-only filesystem")));
        }
        if let Some(id) = ctx.value::<Uuid>(self.inner.tx_key) {
            if self
                .inner
                .transactions
                .lock()
                .get(id)
                .is_some_and(|tx| tx.read_only)
            {
                return Err(VfsError::permission_denied(format!(
                    "{path}: read-only transaction"
                )));
            }
        }
        Ok(())
    }

    /// Ensure all parent directories exist.
    fn ensure_parents(nodes: &mut Nodes, path: &VfsPath) -> VfsResult<()> {
        let mut current = VfsPath::root();
        for name in path.parent().names() {
            current = current.child(name);
            match nodes.get(&current) {
                Some(Node::Directory { .. }) => {}
                Some(_) => return Err(VfsError::not_a_directory(current.to_string())),
                None => {
                    nodes.insert(current.clone(), Node::directory());
                }
            }
        }
        Ok(())
    }

    /// Follow symlinks starting at `path`.
    fn follow(nodes: &Nodes, path: &VfsPath) -> VfsResult<VfsPath> {
        let mut current = path.clone();
        for _ in 0..MAX_LINK_DEPTH {
            match nodes.get(&current) {
                Some(Node::Symlink { target, .. }) => current = target.clone(),
                _ => return Ok(current),
            }
        }
        Err(VfsError::other(format!("{path}: too many levels of symbolic links")))
    }

    /// Remove `path` and everything below it. Returns the removed nodes.
    fn remove_tree(nodes: &mut Nodes, path: &VfsPath) -> Vec<(VfsPath, Node)> {
        let keys: Vec<VfsPath> = nodes.keys().filter(|k| k.starts_with(path)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| nodes.remove(&k).map(|n| (k, n)))
            .collect()
    }

    fn counts(nodes: &Nodes) -> serde_json::Value {
        let mut files = 0u64;
        let mut directories = 0u64;
        let mut symlinks = 0u64;
        let mut bytes = 0u64;
        for (path, node) in nodes {
            match node {
                Node::File { data, .. } => {
                    files += 1;
                    bytes += data.len() as u64;
                }
                Node::Directory { .. } if path.is_root() => {}
                Node::Directory { .. } => directories += 1,
                Node::Symlink { .. } => symlinks += 1,
            }
        }
        serde_json::json!({
            "files": files,
            "directories": directories,
            "symlinks": symlinks,
            "bytes": bytes,
        })
    }
}

impl FileSystem for MemoryBackend {
    fn name(&self) -> String {
        "MemoryBackend".to_string()
    }

    fn connect(&self, ctx: &Context, _path: &VfsPath, _options: &mut Options) -> VfsResult<()> {
        ctx.check_cancelled()
    }

    fn disconnect(&self, ctx: &Context, _path: &VfsPath) -> VfsResult<()> {
        ctx.check_cancelled()
    }

    fn fire_event(&self, ctx: &Context, path: &VfsPath, event: &Event) -> VfsResult<()> {
        ctx.check_cancelled()?;
        self.inner.notify(&path.normalize(), event)
    }

    fn add_listener(
        &self,
        ctx: &Context,
        path: &VfsPath,
        listener: Box<dyn ResourceListener>,
    ) -> VfsResult<ListenerHandle> {
        ctx.check_cancelled()?;
        let handle = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .insert(handle, (path.normalize(), Arc::from(listener)));
        Ok(handle)
    }

    fn remove_listener(&self, _ctx: &Context, handle: ListenerHandle) -> VfsResult<()> {
        self.inner.listeners.remove(&handle);
        Ok(())
    }

    /// Snapshots the whole store. Isolation stronger than snapshot is not
    /// offered.
    fn begin(&self, ctx: &Context, path: &VfsPath, options: &TxOptions) -> VfsResult<Context> {
        ctx.check_cancelled()?;
        if options.isolation > IsolationLevel::Snapshot {
            return Err(VfsError::Unsupported(format!(
                "isolation level {} not supported: {}",
                options.isolation,
                self.name()
            )));
        }
        let id = Uuid::new_v4();
        let snapshot = self.inner.nodes.read().clone();
        self.inner.transactions.lock().insert(
            id,
            Transaction {
                snapshot,
                read_only: options.read_only,
            },
        );
        debug!(%id, %path, isolation = %options.isolation, "began transaction");
        Ok(ctx.with_value(self.inner.tx_key, id))
    }

    fn commit(&self, ctx: &Context) -> VfsResult<()> {
        let id = ctx
            .value::<Uuid>(self.inner.tx_key)
            .ok_or_else(|| VfsError::invalid_transaction("no transaction in context"))?;
        match self.inner.transactions.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(VfsError::invalid_transaction(format!("transaction {id} already finished"))),
        }
    }

    fn rollback(&self, ctx: &Context) -> VfsResult<()> {
        let id = ctx
            .value::<Uuid>(self.inner.tx_key)
            .ok_or_else(|| VfsError::invalid_transaction("no transaction in context"))?;
        let tx = self
            .inner
            .transactions
            .lock()
            .remove(id)
            .ok_or_else(|| VfsError::invalid_transaction(format!("transaction {id} already finished")))?;
        *self.inner.nodes.write() = tx.snapshot;
        debug!(%id, "rolled back transaction");
        Ok(())
    }

    fn open(
        &self,
        ctx: &Context,
        path: &VfsPath,
        flags: OpenFlags,
        _options: &Options,
    ) -> VfsResult<Box<dyn Blob>> {
        ctx.check_cancelled()?;
        let normalized = path.normalize();
        if flags.is_mutating() {
            self.check_writable(ctx, &normalized)?;
        }

        let mut created = false;
        let target = {
            let mut nodes = self.inner.nodes.write();
            let target = Self::follow(&nodes, &normalized)?;
            match nodes.get_mut(&target) {
                Some(Node::File { .. }) if flags.create && flags.exclusive => {
                    return Err(VfsError::already_exists(target.to_string()));
                }
                Some(Node::File { data, .. }) => {
                    if flags.truncate {
                        data.clear();
                    }
                }
                Some(Node::Directory { .. }) => {
                    return Err(VfsError::is_a_directory(target.to_string()));
                }
                Some(Node::Symlink { .. }) => {
                    return Err(VfsError::other(format!("{target}: dangling symbolic link")));
                }
                None if flags.create => {
                    Self::ensure_parents(&mut nodes, &target)?;
                    nodes.insert(target.clone(), Node::file(Vec::new()));
                    created = true;
                }
                None => return Err(VfsError::not_found(target.to_string())),
            }
            target
        };

        if created {
            self.inner.notify_after(&target, Event::Created);
        }
        Ok(Box::new(MemoryBlob {
            inner: Arc::clone(&self.inner),
            path: target,
            flags,
            pos: 0,
            dirty: flags.truncate && !created,
        }))
    }

    fn delete(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        ctx.check_cancelled()?;
        let normalized = path.normalize();
        if normalized.is_root() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        self.check_writable(ctx, &normalized)?;

        let removed = Self::remove_tree(&mut self.inner.nodes.write(), &normalized);
        if !removed.is_empty() {
            self.inner.notify_after(&normalized, Event::Deleted);
        }
        Ok(())
    }

    fn read_attrs(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Entry> {
        ctx.check_cancelled()?;
        let normalized = path.normalize();
        let nodes = self.inner.nodes.read();
        nodes
            .get(&normalized)
            .map(|n| n.entry(normalized.name().unwrap_or_default()))
            .ok_or_else(|| VfsError::not_found(normalized.to_string()))
    }

    fn write_attrs(&self, ctx: &Context, path: &VfsPath, attrs: &[Attr]) -> VfsResult<Entry> {
        ctx.check_cancelled()?;
        let mut current = path.normalize();
        self.check_writable(ctx, &current)?;
        if let Some(attr) = attrs.iter().find(|a| matches!(a, Attr::Opaque(_))) {
            return Err(VfsError::unsupported_attributes(format!(
                "{current}: {} attributes",
                attr.label()
            )));
        }

        let entry = {
            let mut nodes = self.inner.nodes.write();
            if !nodes.contains_key(&current) {
                return Err(VfsError::not_found(current.to_string()));
            }
            for attr in attrs {
                match attr {
                    Attr::Name(name) => {
                        if current.is_root() {
                            return Err(VfsError::permission_denied("cannot rename root"));
                        }
                        let renamed = current.parent().child(name);
                        if renamed.name_count() != current.name_count() {
                            return Err(VfsError::invalid_path(format!("invalid name {name:?}")));
                        }
                        if renamed != current {
                            if nodes.contains_key(&renamed) {
                                return Err(VfsError::already_exists(renamed.to_string()));
                            }
                            for (old, node) in Self::remove_tree(&mut nodes, &current) {
                                let rel = old.trim_prefix(&current)?;
                                nodes.insert(renamed.join(&rel), node);
                            }
                            current = renamed;
                        }
                    }
                    Attr::Size(size) => match nodes.get_mut(&current) {
                        Some(Node::File { data, .. }) => data.resize(blob_range(*size, 0)?.end, 0),
                        _ => return Err(VfsError::is_a_directory(current.to_string())),
                    },
                    Attr::Mode(m) => match nodes.get_mut(&current) {
                        Some(Node::File { mode, .. } | Node::Directory { mode, .. }) => *mode = *m,
                        _ => {
                            return Err(VfsError::unsupported_attributes(format!(
                                "{current}: mode of symbolic link"
                            )));
                        }
                    },
                    Attr::ModTime(t) => {
                        if let Some(
                            Node::File { mtime, .. }
                            | Node::Directory { mtime, .. }
                            | Node::Symlink { mtime, .. },
                        ) = nodes.get_mut(&current)
                        {
                            *mtime = *t;
                        }
                    }
                    Attr::Opaque(_) => {}
                }
            }
            nodes
                .get(&current)
                .map(|n| n.entry(current.name().unwrap_or_default()))
                .ok_or_else(|| VfsError::not_found(current.to_string()))?
        };

        self.inner.notify_after(&current, Event::Modified);
        Ok(entry)
    }

    fn read_bucket(
        &self,
        ctx: &Context,
        path: &VfsPath,
        options: &Options,
    ) -> VfsResult<Box<dyn ResultSet>> {
        ctx.check_cancelled()?;
        let normalized = path.normalize();
        let nodes = self.inner.nodes.read();

        match nodes.get(&normalized) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized.to_string())),
            None => return Err(VfsError::not_found(normalized.to_string())),
        }

        // Find all direct children
        let mut entries: Vec<Entry> = nodes
            .iter()
            .filter(|(p, _)| !p.is_root() && p.parent() == normalized)
            .map(|(p, n)| n.entry(p.name().unwrap_or_default()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let set = match option_u64(options, "page_size") {
            Some(size) => VecResultSet::paged(entries, size as usize),
            None => VecResultSet::new(entries),
        };
        Ok(Box::new(set))
    }

    /// Supports the `stats` endpoint: node counts and total bytes.
    fn invoke(
        &self,
        ctx: &Context,
        endpoint: &str,
        _args: &[serde_json::Value],
    ) -> VfsResult<serde_json::Value> {
        ctx.check_cancelled()?;
        match VfsPath::new(endpoint).to_string().as_str() {
            "/stats" => Ok(Self::counts(&self.inner.nodes.read())),
            _ => Err(VfsError::unsupported(&format!("invoke {endpoint}"), &self.name())),
        }
    }

    fn mk_bucket(&self, ctx: &Context, path: &VfsPath, _options: &Options) -> VfsResult<()> {
        ctx.check_cancelled()?;
        let normalized = path.normalize();
        self.check_writable(ctx, &normalized)?;

        {
            let mut nodes = self.inner.nodes.write();
            match nodes.get(&normalized) {
                Some(Node::Directory { .. }) => return Ok(()),
                Some(_) => return Err(VfsError::already_exists(normalized.to_string())),
                None => {
                    Self::ensure_parents(&mut nodes, &normalized)?;
                    nodes.insert(normalized.clone(), Node::directory());
                }
            }
        }
        self.inner.notify_after(&normalized, Event::Created);
        Ok(())
    }

    fn rename(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        ctx.check_cancelled()?;
        let from = old.normalize();
        let to = new.normalize();
        self.check_writable(ctx, &from)?;
        if from.is_root() || to.is_root() {
            return Err(VfsError::permission_denied("cannot rename root"));
        }
        if from == to {
            return Ok(());
        }
        if to.starts_with(&from) {
            return Err(VfsError::invalid_path(format!("cannot move {from} into itself")));
        }
        if from.starts_with(&to) {
            return Err(VfsError::invalid_path(format!(
                "cannot move {from} over its ancestor {to}"
            )));
        }

        {
            let mut nodes = self.inner.nodes.write();
            if !nodes.contains_key(&from) {
                return Err(VfsError::not_found(from.to_string()));
            }
            Self::ensure_parents(&mut nodes, &to)?;
            Self::remove_tree(&mut nodes, &to);
            for (path, mut node) in Self::remove_tree(&mut nodes, &from) {
                let rel = path.trim_prefix(&from)?;
                if rel.is_root() {
                    node.touch();
                }
                nodes.insert(to.join(&rel), node);
            }
        }

        self.inner.notify_after(&from, Event::Deleted);
        self.inner.notify_after(&to, Event::Created);
        Ok(())
    }

    /// Creates `new` pointing at `old`. The target does not have to exist.
    fn sym_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        ctx.check_cancelled()?;
        let link = new.normalize();
        self.check_writable(ctx, &link)?;

        {
            let mut nodes = self.inner.nodes.write();
            if nodes.contains_key(&link) {
                return Err(VfsError::already_exists(link.to_string()));
            }
            Self::ensure_parents(&mut nodes, &link)?;
            nodes.insert(
                link.clone(),
                Node::Symlink {
                    target: old.normalize(),
                    mtime: SystemTime::now(),
                },
            );
        }
        self.inner.notify_after(&link, Event::Created);
        Ok(())
    }

    /// Copies the blob at `old` to `new`, replacing `new`.
    fn ref_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        ctx.check_cancelled()?;
        let to = new.normalize();
        self.check_writable(ctx, &to)?;

        {
            let mut nodes = self.inner.nodes.write();
            let from = Self::follow(&nodes, &old.normalize())?;
            let data = match nodes.get(&from) {
                Some(Node::File { data, .. }) => data.clone(),
                Some(_) => return Err(VfsError::is_a_directory(from.to_string())),
                None => return Err(VfsError::not_found(from.to_string())),
            };
            if matches!(nodes.get(&to), Some(Node::Directory { .. })) {
                return Err(VfsError::is_a_directory(to.to_string()));
            }
            Self::ensure_parents(&mut nodes, &to)?;
            nodes.insert(to.clone(), Node::file(data));
        }
        self.inner.notify_after(&to, Event::Created);
        Ok(())
    }
}

/// Open handle on a memory file. Reads and writes go straight to the store.
struct MemoryBlob {
    inner: Arc<Inner>,
    path: VfsPath,
    flags: OpenFlags,
    pos: u64,
    dirty: bool,
}

impl MemoryBlob {
    fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> VfsResult<R> {
        match self.inner.nodes.read().get(&self.path) {
            Some(Node::File { data, .. }) => Ok(f(data)),
            _ => Err(VfsError::not_found(self.path.to_string())),
        }
    }

    fn len(&self) -> VfsResult<u64> {
        self.with_data(|d| d.len() as u64)
    }
}

impl Blob for MemoryBlob {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        if !self.flags.read {
            return Err(VfsError::permission_denied(format!("{}: not open for reading", self.path)));
        }
        self.with_data(|data| {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
            let end = start.saturating_add(buf.len()).min(data.len());
            buf[..end - start].copy_from_slice(&data[start..end]);
            end - start
        })
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        if !self.flags.write {
            return Err(VfsError::permission_denied(format!("{}: not open for writing", self.path)));
        }
        let mut nodes = self.inner.nodes.write();
        match nodes.get_mut(&self.path) {
            Some(Node::File { data, mtime, .. }) => {
                let range = blob_range(offset, buf.len())?;
                // Extend if necessary
                if range.end > data.len() {
                    data.resize(range.end, 0);
                }
                data[range].copy_from_slice(buf);
                *mtime = SystemTime::now();
                self.dirty = true;
                Ok(buf.len())
            }
            _ => Err(VfsError::not_found(self.path.to_string())),
        }
    }

    fn close(&mut self) -> VfsResult<()> {
        if std::mem::take(&mut self.dirty) {
            self.inner.notify_after(&self.path, Event::Modified);
        }
        Ok(())
    }
}

impl Read for MemoryBlob {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.flags.append {
            self.pos = self.len()?;
        }
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryBlob {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len()?.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match next {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of blob",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LinkMode;

    fn p(s: &str) -> VfsPath {
        VfsPath::new(s)
    }

    fn names(fs: &MemoryBackend, path: &str) -> Vec<String> {
        fs.list_all(&Context::new(), &p(path))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    #[test]
    fn test_create_and_read() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("test.txt"), b"hello world").unwrap();

        assert_eq!(fs.read_all(&ctx, &p("test.txt")).unwrap(), b"hello world");
    }

    #[test]
    fn test_partial_read() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("test.txt"), b"hello world").unwrap();

        let mut blob = fs.open(&ctx, &p("test.txt"), OpenFlags::read(), &Options::new()).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(blob.read_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"world");

        blob.seek(SeekFrom::End(-5)).unwrap();
        let mut rest = String::new();
        blob.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "world");
    }

    #[test]
    fn test_append() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("log"), b"one ").unwrap();

        let mut blob = fs.open(&ctx, &p("log"), OpenFlags::append(), &Options::new()).unwrap();
        blob.write_all(b"two").unwrap();
        blob.close().unwrap();

        assert_eq!(fs.read_all(&ctx, &p("log")).unwrap(), b"one two");
    }

    #[test]
    fn test_read_only_blob_rejects_writes() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("f"), b"x").unwrap();

        let mut blob = fs.open(&ctx, &p("f"), OpenFlags::read(), &Options::new()).unwrap();
        assert!(matches!(blob.write_at(b"y", 0), Err(VfsError::PermissionDenied(_))));
    }

    #[test]
    fn test_write_at_out_of_range_offset() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        let mut blob = fs.open(&ctx, &p("f"), OpenFlags::create(), &Options::new()).unwrap();

        assert!(matches!(blob.write_at(b"x", u64::MAX), Err(VfsError::Other(_))));
        let mut buf = [0u8; 4];
        assert_eq!(blob.read_at(&mut buf, u64::MAX).unwrap(), 0);
        blob.close().unwrap();
        assert_eq!(fs.read_attrs(&ctx, &p("f")).unwrap().size, 0);

        let err = fs.write_attrs(&ctx, &p("f"), &[Attr::Size(u64::MAX)]).unwrap_err();
        assert!(matches!(err, VfsError::Other(_)));
    }

    #[test]
    fn test_open_missing_and_exclusive() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        let err = fs.open(&ctx, &p("nope"), OpenFlags::read(), &Options::new()).err().unwrap();
        assert!(err.is_not_found());

        fs.write_all(&ctx, &p("there"), b"").unwrap();
        let err = fs
            .open(&ctx, &p("there"), OpenFlags::create_exclusive(), &Options::new())
            .err()
            .unwrap();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[test]
    fn test_mk_bucket_and_list() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.mk_bucket(&ctx, &p("subdir"), &Options::new()).unwrap();
        fs.write_all(&ctx, &p("subdir/file.txt"), b"").unwrap();
        fs.write_all(&ctx, &p("root.txt"), b"").unwrap();

        assert_eq!(names(&fs, "/"), ["root.txt", "subdir"]);
        assert_eq!(names(&fs, "subdir"), ["file.txt"]);
    }

    #[test]
    fn test_list_file_is_not_a_directory() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("f"), b"").unwrap();
        let err = fs.read_bucket(&ctx, &p("f"), &Options::new()).err().unwrap();
        assert!(matches!(err, VfsError::NotADirectory(_)));
    }

    #[test]
    fn test_paged_listing() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        for name in ["a", "b", "c", "d", "e"] {
            fs.write_all(&ctx, &p(name), b"").unwrap();
        }
        let mut opts = Options::new();
        opts.insert("page_size".into(), 2.into());

        let mut set = fs.read_bucket(&ctx, &VfsPath::root(), &opts).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.pages(), 3);
        let all = crate::result_set::collect_all(set.as_mut(), &ctx).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_delete_is_recursive_and_idempotent() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("a/b/c.txt"), b"x").unwrap();

        fs.delete(&ctx, &p("a")).unwrap();
        assert!(!fs.exists(&ctx, &p("a/b/c.txt")));
        assert!(!fs.exists(&ctx, &p("a")));

        fs.delete(&ctx, &p("a")).unwrap();
        assert!(matches!(
            fs.delete(&ctx, &VfsPath::root()),
            Err(VfsError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("old/inner.txt"), b"content").unwrap();

        fs.rename(&ctx, &p("old"), &p("new/place")).unwrap();

        assert!(!fs.exists(&ctx, &p("old")));
        assert_eq!(fs.read_all(&ctx, &p("new/place/inner.txt")).unwrap(), b"content");
        assert!(fs.rename(&ctx, &p("missing"), &p("x")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_into_itself_rejected() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.mk_bucket(&ctx, &p("a"), &Options::new()).unwrap();
        assert!(matches!(
            fs.rename(&ctx, &p("a"), &p("a/b")),
            Err(VfsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_rename_over_ancestor_rejected() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("a/b"), b"child").unwrap();
        fs.write_all(&ctx, &p("a/sibling"), b"kept").unwrap();

        assert!(matches!(
            fs.rename(&ctx, &p("a/b"), &p("a")),
            Err(VfsError::InvalidPath(_))
        ));
        assert_eq!(fs.read_all(&ctx, &p("a/b")).unwrap(), b"child");
        assert_eq!(fs.read_all(&ctx, &p("a/sibling")).unwrap(), b"kept");
        assert_eq!(names(&fs, "a"), ["b", "sibling"]);
    }

    #[test]
    fn test_symlink_is_followed_on_open() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("target/file"), b"linked").unwrap();
        fs.sym_link(&ctx, &p("target/file"), &p("link")).unwrap();

        let attr = fs.read_attrs(&ctx, &p("link")).unwrap();
        assert!(attr.kind.is_symlink());
        assert_eq!(fs.read_all(&ctx, &p("link")).unwrap(), b"linked");
    }

    #[test]
    fn test_ref_link_copies() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("a"), b"data").unwrap();
        fs.ref_link(&ctx, &p("a"), &p("copy/b")).unwrap();
        fs.write_all(&ctx, &p("a"), b"changed").unwrap();

        assert_eq!(fs.read_all(&ctx, &p("copy/b")).unwrap(), b"data");
    }

    #[test]
    fn test_hard_link_unsupported() {
        let fs = MemoryBackend::new();
        let err = fs.hard_link(&Context::new(), &p("a"), &p("b")).unwrap_err();
        assert!(matches!(err, VfsError::Unsupported(_)));
    }

    #[test]
    fn test_link_by_mode() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("a"), b"data").unwrap();

        fs.link(&ctx, LinkMode::Sym, &p("a"), &p("sym")).unwrap();
        fs.link(&ctx, LinkMode::Ref, &p("a"), &p("copy")).unwrap();
        assert!(fs.read_attrs(&ctx, &p("sym")).unwrap().kind.is_symlink());
        assert!(fs.read_attrs(&ctx, &p("copy")).unwrap().is_file());
        assert!(fs.link(&ctx, LinkMode::Hard, &p("a"), &p("hard")).is_err());
    }

    #[test]
    fn test_write_attrs() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("dir/test.txt"), b"hello world").unwrap();

        let entry = fs
            .write_attrs(
                &ctx,
                &p("dir/test.txt"),
                &[Attr::Size(5), Attr::Mode(0o600), Attr::Name("short.txt".into())],
            )
            .unwrap();
        assert_eq!(entry.name, "short.txt");
        assert_eq!(entry.size, 5);
        assert_eq!(entry.mode, 0o600);
        assert_eq!(fs.read_all(&ctx, &p("dir/short.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_write_attrs_opaque_rejected() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("f"), b"").unwrap();
        let err = fs
            .write_attrs(&ctx, &p("f"), &[Attr::Mode(0o600), Attr::Opaque(Arc::new(1u8))])
            .unwrap_err();
        assert!(matches!(err, VfsError::UnsupportedAttributes(_)));
        assert_eq!(fs.read_attrs(&ctx, &p("f")).unwrap().mode, 0o644);
    }

    #[test]
    fn test_auto_create_parents() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("a/b/c/file.txt"), b"").unwrap();

        assert!(fs.read_attrs(&ctx, &p("a")).unwrap().is_dir());
        assert!(fs.read_attrs(&ctx, &p("a/b")).unwrap().is_dir());
        assert!(fs.read_attrs(&ctx, &p("a/b/c")).unwrap().is_dir());
    }

    #[test]
    fn test_parent_is_file() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("a"), b"").unwrap();
        let err = fs.write_all(&ctx, &p("a/b"), b"").unwrap_err();
        assert!(matches!(err, VfsError::NotADirectory(_)));
    }

    #[test]
    fn test_path_normalization() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("/a/b/c.txt"), b"").unwrap();

        // Various path forms should all work
        assert!(fs.exists(&ctx, &p("a/b/c.txt")));
        assert!(fs.exists(&ctx, &p("/a/b/c.txt")));
        assert!(fs.exists(&ctx, &p("a/./b/c.txt")));
        assert!(fs.exists(&ctx, &p("a/b/../b/c.txt")));
    }

    #[test]
    fn test_listeners_see_subtree_events() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = fs
            .add_listener(
                &ctx,
                &p("watched"),
                Box::new(move |path: &VfsPath, event: &Event| {
                    sink.lock().push((path.to_string(), event.clone()));
                    Ok(())
                }),
            )
            .unwrap();

        fs.write_all(&ctx, &p("watched/a"), b"1").unwrap();
        fs.write_all(&ctx, &p("elsewhere"), b"1").unwrap();
        fs.delete(&ctx, &p("watched/a")).unwrap();

        fs.remove_listener(&ctx, handle).unwrap();
        fs.remove_listener(&ctx, handle).unwrap();
        fs.write_all(&ctx, &p("watched/b"), b"1").unwrap();

        let seen = seen.lock();
        assert_eq!(
            *seen,
            [
                ("/watched/a".to_string(), Event::Created),
                ("/watched/a".to_string(), Event::Modified),
                ("/watched/a".to_string(), Event::Deleted),
            ]
        );
    }

    #[test]
    fn test_fire_event_propagates_listener_error() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.add_listener(
            &ctx,
            &VfsPath::root(),
            Box::new(|_: &VfsPath, _: &Event| Err(VfsError::permission_denied("vetoed"))),
        )
        .unwrap();
        let err = fs.fire_event(&ctx, &p("x"), &Event::BeforeOpen).unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));
    }

    #[test]
    fn test_transaction_rollback_restores() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("keep"), b"v1").unwrap();

        let tx = fs.begin(&ctx, &VfsPath::root(), &TxOptions::default()).unwrap();
        fs.write_all(&tx, &p("keep"), b"v2").unwrap();
        fs.write_all(&tx, &p("temp"), b"x").unwrap();
        fs.rollback(&tx).unwrap();

        assert_eq!(fs.read_all(&ctx, &p("keep")).unwrap(), b"v1");
        assert!(!fs.exists(&ctx, &p("temp")));
        assert!(matches!(fs.commit(&tx), Err(VfsError::InvalidTransactionContext(_))));
    }

    #[test]
    fn test_transaction_commit_keeps_changes() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        let tx = fs.begin(&ctx, &VfsPath::root(), &TxOptions::default()).unwrap();
        fs.write_all(&tx, &p("new"), b"x").unwrap();
        fs.commit(&tx).unwrap();
        assert!(fs.exists(&ctx, &p("new")));
    }

    #[test]
    fn test_read_only_transaction() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        let tx = fs.begin(&ctx, &VfsPath::root(), &TxOptions::read_only()).unwrap();
        let err = fs.write_all(&tx, &p("f"), b"x").unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));
        fs.write_all(&ctx, &p("f"), b"x").unwrap();
        fs.commit(&tx).unwrap();
    }

    #[test]
    fn test_unsupported_isolation() {
        let fs = MemoryBackend::new();
        let opts = TxOptions::default().with_isolation(IsolationLevel::Linearizable);
        let err = fs.begin(&Context::new(), &VfsPath::root(), &opts).unwrap_err();
        assert!(matches!(err, VfsError::Unsupported(_)));
    }

    #[test]
    fn test_read_only_backend() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("f"), b"x").unwrap();
        fs.set_read_only(true);

        assert!(matches!(
            fs.write_all(&ctx, &p("f"), b"y"),
            Err(VfsError::PermissionDenied(_))
        ));
        assert!(matches!(fs.delete(&ctx, &p("f")), Err(VfsError::PermissionDenied(_))));
        assert_eq!(fs.read_all(&ctx, &p("f")).unwrap(), b"x");
    }

    #[test]
    fn test_cancelled_context() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        ctx.cancel();
        let err = fs.read_attrs(&ctx, &VfsPath::root()).unwrap_err();
        assert!(matches!(err, VfsError::Cancelled));
    }

    #[test]
    fn test_stats_endpoint() {
        let fs = MemoryBackend::new();
        let ctx = Context::new();
        fs.write_all(&ctx, &p("d/a"), b"abc").unwrap();
        fs.sym_link(&ctx, &p("d/a"), &p("l")).unwrap();

        let stats = fs.invoke(&ctx, "stats", &[]).unwrap();
        assert_eq!(stats["files"], 1);
        assert_eq!(stats["directories"], 1);
        assert_eq!(stats["symlinks"], 1);
        assert_eq!(stats["bytes"], 3);
        assert!(fs.invoke(&ctx, "other", &[]).is_err());
    }

    #[test]
    fn test_clones_share_storage() {
        let fs = MemoryBackend::new();
        let other = fs.clone();
        fs.write_all(&Context::new(), &p("shared"), b"1").unwrap();
        assert!(other.exists(&Context::new(), &p("shared")));
    }
}
