//! Integration tests for the composite filesystem.
//!
//! Covers routing across several backends, listener virtualization,
//! transactions, teardown and batch operations through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use strata_vfs::{
    Attr, Blob, Context, Entry, Event, FileSystem, IsolationLevel, MemoryBackend,
    MountableFileSystem, OpenFlags, Options, PathAttrs, ResultSet, TxOptions, VfsError,
    VfsPath, VfsResult, collect_all,
};

/// Initialize tracing for tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("strata_vfs=debug")
        .with_test_writer()
        .try_init();
}

fn p(s: &str) -> VfsPath {
    VfsPath::new(s)
}

/// Memory backend that counts every call it receives and can be told to
/// fail on disconnect or when a listing is closed.
struct Probe {
    inner: MemoryBackend,
    calls: Arc<AtomicUsize>,
    fail_disconnect: bool,
    fail_close: bool,
}

impl Probe {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = Self {
            inner: MemoryBackend::new(),
            calls: calls.clone(),
            fail_disconnect: false,
            fail_close: false,
        };
        (probe, calls)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl FileSystem for Probe {
    fn name(&self) -> String {
        "Probe".to_string()
    }

    fn disconnect(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        self.hit();
        if self.fail_disconnect {
            return Err(VfsError::other("connection reset"));
        }
        self.inner.disconnect(ctx, path)
    }

    fn open(
        &self,
        ctx: &Context,
        path: &VfsPath,
        flags: OpenFlags,
        options: &Options,
    ) -> VfsResult<Box<dyn Blob>> {
        self.hit();
        self.inner.open(ctx, path, flags, options)
    }

    fn delete(&self, ctx: &Context, path: &VfsPath) -> VfsResult<()> {
        self.hit();
        self.inner.delete(ctx, path)
    }

    fn read_attrs(&self, ctx: &Context, path: &VfsPath) -> VfsResult<Entry> {
        self.hit();
        self.inner.read_attrs(ctx, path)
    }

    fn write_attrs(&self, ctx: &Context, path: &VfsPath, attrs: &[Attr]) -> VfsResult<Entry> {
        self.hit();
        self.inner.write_attrs(ctx, path, attrs)
    }

    fn read_bucket(
        &self,
        ctx: &Context,
        path: &VfsPath,
        options: &Options,
    ) -> VfsResult<Box<dyn ResultSet>> {
        self.hit();
        let set = self.inner.read_bucket(ctx, path, options)?;
        if self.fail_close {
            return Ok(Box::new(FailingClose(set)));
        }
        Ok(set)
    }

    fn mk_bucket(&self, ctx: &Context, path: &VfsPath, options: &Options) -> VfsResult<()> {
        self.hit();
        self.inner.mk_bucket(ctx, path, options)
    }

    fn rename(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.hit();
        self.inner.rename(ctx, old, new)
    }

    fn sym_link(&self, ctx: &Context, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.hit();
        self.inner.sym_link(ctx, old, new)
    }
}

/// Listing whose `close` always fails.
struct FailingClose(Box<dyn ResultSet>);

impl ResultSet for FailingClose {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn entry_at(&self, idx: usize) -> Option<&Entry> {
        self.0.entry_at(idx)
    }

    fn total(&self) -> i64 {
        self.0.total()
    }

    fn pages(&self) -> i64 {
        self.0.pages()
    }

    fn next_page(&mut self, ctx: &Context) -> VfsResult<()> {
        self.0.next_page(ctx)
    }

    fn close(&mut self) -> VfsResult<()> {
        Err(VfsError::other("listing cursor lost"))
    }
}

/// Log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_cross_mount_operations_touch_no_backend() {
    init_tracing();
    let (a, a_calls) = Probe::new();
    let (b, b_calls) = Probe::new();
    let fs = MountableFileSystem::new();
    fs.mount("/a", a).unwrap();
    fs.mount("/b", b).unwrap();
    let ctx = Context::new();

    let err = fs.rename(&ctx, &p("/a/f"), &p("/b/f")).unwrap_err();
    assert!(matches!(err, VfsError::Unsupported(_)));
    let err = fs.sym_link(&ctx, &p("/a/f"), &p("/b/f")).unwrap_err();
    assert!(matches!(err, VfsError::Unsupported(_)));
    let err = fs.ref_link(&ctx, &p("/a/f"), &p("/b/f")).unwrap_err();
    assert!(matches!(err, VfsError::Unsupported(_)));

    assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_residual_paths_reach_backends() {
    let (probe, calls) = Probe::new();
    let inner = probe.inner.clone();
    let fs = MountableFileSystem::new();
    fs.mount("/mnt/data", probe).unwrap();
    let ctx = Context::new();

    fs.write_all(&ctx, &p("/mnt/data/x/y.txt"), b"payload").unwrap();
    assert_eq!(inner.read_all(&ctx, &p("/x/y.txt")).unwrap(), b"payload");
    assert!(calls.load(Ordering::SeqCst) > 0);

    fs.rename(&ctx, &p("/mnt/data/x/y.txt"), &p("/mnt/data/z.txt")).unwrap();
    assert!(inner.exists(&ctx, &p("/z.txt")));
}

#[test]
fn test_delete_is_idempotent() {
    let fs = MountableFileSystem::new();
    fs.mount("/a/b", MemoryBackend::new()).unwrap();
    let ctx = Context::new();

    // No mount point and no tree node at all.
    fs.delete(&ctx, &p("/nowhere/x")).unwrap();
    // Intermediate node exists but the child does not.
    fs.delete(&ctx, &p("/a/zzz")).unwrap();
    // Mounted backend, resource absent.
    fs.delete(&ctx, &p("/a/b/missing")).unwrap();

    assert_eq!(fs.mounts().len(), 1);
}

#[test]
fn test_delete_intermediate_unmounts_subtree() {
    let fs = MountableFileSystem::new();
    fs.mount("/a/b", MemoryBackend::new()).unwrap();
    fs.mount("/a/c", MemoryBackend::new()).unwrap();
    fs.mount("/d", MemoryBackend::new()).unwrap();

    fs.delete(&Context::new(), &p("/a")).unwrap();
    let paths: Vec<String> = fs.mounts().iter().map(|m| m.path.to_string()).collect();
    assert_eq!(paths, ["/d"]);
}

#[test]
fn test_listener_paths_are_rewritten() {
    let mem = MemoryBackend::new();
    let fs = MountableFileSystem::new();
    fs.mount("/mnt/x", mem.clone()).unwrap();
    let ctx = Context::new();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = fs
        .add_listener(
            &ctx,
            &p("/mnt/x"),
            Box::new(move |path: &VfsPath, event: &Event| {
                sink.lock().push((path.to_string(), event.clone()));
                Ok(())
            }),
        )
        .unwrap();

    // An event raised inside the backend, relative to its own root.
    mem.fire_event(&ctx, &p("/y"), &Event::Modified).unwrap();
    // And one raised through the composite.
    fs.fire_event(&ctx, &p("/mnt/x/z"), &Event::Custom(serde_json::json!({"k": 1})))
        .unwrap();

    assert_eq!(
        *seen.lock(),
        [
            ("/mnt/x/y".to_string(), Event::Modified),
            ("/mnt/x/z".to_string(), Event::Custom(serde_json::json!({"k": 1}))),
        ]
    );

    fs.remove_listener(&ctx, handle).unwrap();
    fs.remove_listener(&ctx, handle).unwrap();
    mem.fire_event(&ctx, &p("/y"), &Event::Modified).unwrap();
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_listener_handles_are_distinct_across_backends() {
    let fs = MountableFileSystem::new();
    fs.mount("/one", MemoryBackend::new()).unwrap();
    fs.mount("/two", MemoryBackend::new()).unwrap();
    let ctx = Context::new();
    let noop = || Box::new(|_: &VfsPath, _: &Event| -> VfsResult<()> { Ok(()) });

    // Each backend hands out handle 1; the composite must not.
    let h1 = fs.add_listener(&ctx, &p("/one"), noop()).unwrap();
    let h2 = fs.add_listener(&ctx, &p("/two"), noop()).unwrap();
    assert_ne!(h1, h2);
}

#[test]
fn test_listener_on_unmounted_path_fails() {
    let fs = MountableFileSystem::new();
    let err = fs
        .add_listener(
            &Context::new(),
            &p("/none"),
            Box::new(|_: &VfsPath, _: &Event| Ok(())),
        )
        .unwrap_err();
    assert!(matches!(err, VfsError::MountPointNotFound(_)));
}

#[test]
fn test_joined_listing_across_mounts() {
    let one = MemoryBackend::new();
    let two = MemoryBackend::new();
    let ctx = Context::new();
    for name in ["a", "b", "c"] {
        one.write_all(&ctx, &p(name), b"").unwrap();
    }
    for name in ["d", "e"] {
        two.write_all(&ctx, &p(name), b"").unwrap();
    }
    let fs = MountableFileSystem::new();
    fs.mount("/one", one).unwrap();
    fs.mount("/two", two).unwrap();

    let mut joined = fs
        .read_buckets(&ctx, &[p("/one"), p("/two")], &Options::new())
        .unwrap();
    assert_eq!(joined.total(), 5);
    let names: Vec<String> = collect_all(&mut joined, &ctx)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["a", "b", "c", "d", "e"]);
    joined.close().unwrap();
}

#[test]
fn test_joined_listing_fails_on_missing_bucket() {
    let fs = MountableFileSystem::new();
    fs.mount("/one", MemoryBackend::new()).unwrap();
    let err = fs
        .read_buckets(&Context::new(), &[p("/one"), p("/one/missing")], &Options::new())
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_joined_listing_failure_logs_close_errors() {
    let (mut probe, _) = Probe::new();
    probe.fail_close = true;
    let fs = MountableFileSystem::new();
    fs.mount("/one", probe).unwrap();
    fs.mount("/two", MemoryBackend::new()).unwrap();

    let logs = LogBuffer::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    let err = tracing::subscriber::with_default(subscriber, || {
        fs.read_buckets(&Context::new(), &[p("/one"), p("/two/missing")], &Options::new())
            .unwrap_err()
    });
    assert!(err.is_not_found());

    let logged = String::from_utf8(logs.0.lock().clone()).unwrap();
    assert!(logged.contains("listing cursor lost"), "{logged}");
}

#[test]
fn test_transactions_through_composite() {
    let mem = MemoryBackend::new();
    let fs = MountableFileSystem::new();
    fs.mount("/db", mem.clone()).unwrap();
    let ctx = Context::new();
    fs.write_all(&ctx, &p("/db/row"), b"v1").unwrap();

    let tx = fs.begin(&ctx, &p("/db"), &TxOptions::default()).unwrap();
    fs.write_all(&tx, &p("/db/row"), b"v2").unwrap();
    fs.rollback(&tx).unwrap();
    assert_eq!(fs.read_all(&ctx, &p("/db/row")).unwrap(), b"v1");

    let tx = fs
        .begin(&ctx, &p("/db"), &TxOptions::default().with_isolation(IsolationLevel::Snapshot))
        .unwrap();
    fs.write_all(&tx, &p("/db/row"), b"v3").unwrap();
    fs.commit(&tx).unwrap();
    assert_eq!(mem.read_all(&ctx, &p("/row")).unwrap(), b"v3");
}

#[test]
fn test_commit_with_wrong_context() {
    let fs = MountableFileSystem::new();
    fs.mount("/db", MemoryBackend::new()).unwrap();

    let err = fs.commit(&Context::new()).unwrap_err();
    assert!(matches!(err, VfsError::InvalidTransactionContext(_)));
    let err = fs.rollback(&Context::new()).unwrap_err();
    assert!(matches!(err, VfsError::InvalidTransactionContext(_)));

    // A context from another composite is just as wrong.
    let other = MountableFileSystem::new();
    other.mount("/db", MemoryBackend::new()).unwrap();
    let foreign = other.begin(&Context::new(), &p("/db"), &TxOptions::default()).unwrap();
    let err = fs.commit(&foreign).unwrap_err();
    assert!(matches!(err, VfsError::InvalidTransactionContext(_)));
}

#[test]
fn test_read_only_transaction_through_composite() {
    let fs = MountableFileSystem::new();
    fs.mount("/db", MemoryBackend::new()).unwrap();
    let ctx = Context::new();
    let tx = fs.begin(&ctx, &p("/db"), &TxOptions::read_only()).unwrap();

    let err = fs.write_all(&tx, &p("/db/x"), b"x").unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied(_)));
    fs.commit(&tx).unwrap();
}

#[test]
fn test_disconnect_failure_still_unmounts() {
    init_tracing();
    let (mut probe, calls) = Probe::new();
    probe.fail_disconnect = true;
    let fs = MountableFileSystem::new();
    fs.mount("/remote", probe).unwrap();
    fs.mount("/local", MemoryBackend::new()).unwrap();
    let ctx = Context::new();

    let err = fs.disconnect(&ctx, &p("/remote/sub")).unwrap_err();
    assert!(matches!(err, VfsError::Other(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let paths: Vec<String> = fs.mounts().iter().map(|m| m.path.to_string()).collect();
    assert_eq!(paths, ["/local"]);
    assert!(matches!(
        fs.read_attrs(&ctx, &p("/remote/sub")),
        Err(VfsError::MountPointNotFound(_))
    ));
}

#[test]
fn test_disconnect_success_unmounts() {
    let fs = MountableFileSystem::new();
    fs.mount("/m", MemoryBackend::new()).unwrap();
    fs.disconnect(&Context::new(), &p("/m")).unwrap();
    assert!(fs.mounts().is_empty());
}

#[test]
fn test_cancellation_propagates_unchanged() {
    let fs = MountableFileSystem::new();
    fs.mount("/m", MemoryBackend::new()).unwrap();
    let ctx = Context::new();
    let child = ctx.child();
    ctx.cancel();

    let err = fs.read_attrs(&child, &p("/m/x")).unwrap_err();
    assert!(matches!(err, VfsError::Cancelled));
}

#[test]
fn test_walk_spans_virtual_directories_and_mounts() {
    let fs = MountableFileSystem::new();
    let ctx = Context::new();
    let docs = MemoryBackend::new();
    docs.write_all(&ctx, &p("guide/intro.md"), b"hi").unwrap();
    fs.mount("/mnt/docs", docs).unwrap();
    fs.mount("/scratch", MemoryBackend::new()).unwrap();

    let mut visited = Vec::new();
    fs.walk(&ctx, &VfsPath::root(), &mut |path, entry| {
        visited.push((path.to_string(), entry.is_dir()));
        Ok(())
    })
    .unwrap();

    assert_eq!(
        visited,
        [
            ("/mnt".to_string(), true),
            ("/mnt/docs".to_string(), true),
            ("/mnt/docs/guide".to_string(), true),
            ("/mnt/docs/guide/intro.md".to_string(), false),
            ("/scratch".to_string(), true),
        ]
    );
}

#[test]
fn test_batch_operations() {
    let fs = MountableFileSystem::new();
    fs.mount("/a", MemoryBackend::new()).unwrap();
    fs.mount("/b", MemoryBackend::new()).unwrap();
    let ctx = Context::new();
    fs.write_all(&ctx, &p("/a/one"), b"1").unwrap();
    fs.write_all(&ctx, &p("/b/two"), b"22").unwrap();

    let sizes: Vec<i64> = fs
        .batch_read_attrs(&ctx, &[p("/a/one"), p("/b/two")])
        .unwrap()
        .into_iter()
        .map(|e| e.size)
        .collect();
    assert_eq!(sizes, [1, 2]);

    let updated = fs
        .batch_write_attrs(
            &ctx,
            &[
                PathAttrs::new("/a/one", vec![Attr::Size(4)]),
                PathAttrs::new("/b/two", vec![Attr::Mode(0o600)]),
            ],
        )
        .unwrap();
    assert_eq!(updated[0].size, 4);
    assert_eq!(updated[1].mode, 0o600);

    let err = fs
        .batch_read_attrs(&ctx, &[p("/a/one"), p("/a/missing")])
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("/a/missing"));

    fs.batch_delete(&ctx, &[p("/a/one"), p("/b/two")]).unwrap();
    assert!(!fs.exists(&ctx, &p("/a/one")));
    assert!(!fs.exists(&ctx, &p("/b/two")));
}

#[test]
fn test_intermediate_nodes_reject_blob_access() {
    let fs = MountableFileSystem::new();
    fs.mount("/a/b", MemoryBackend::new()).unwrap();
    let ctx = Context::new();

    let err = fs
        .open(&ctx, &p("/a"), OpenFlags::read(), &Options::new())
        .err()
        .unwrap();
    assert!(matches!(err, VfsError::MountPointNotFound(_)));
    assert!(fs.read_attrs(&ctx, &p("/a")).unwrap().is_dir());
}
