//! Per-call context: cancellation plus hidden, typed values.
//!
//! Every [`FileSystem`](crate::FileSystem) operation takes a `&Context`. The
//! composite layer never interprets cancellation itself; it forwards the
//! context untouched and lets backends call [`Context::check_cancelled`].
//! Values are how layers stash state across calls that share a context,
//! e.g. the path a transaction was begun on.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::error::{VfsError, VfsResult};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// Key for a value stored in a [`Context`].
///
/// Keys are compared by namespace and id, so two instances of the same
/// component can store values side by side without clobbering each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    namespace: &'static str,
    id: u64,
}

impl ContextKey {
    /// A fixed key. Use for values with one meaning per process.
    pub const fn new(namespace: &'static str, id: u64) -> Self {
        Self { namespace, id }
    }

    /// A key that no other call to `unique` will return.
    pub fn unique(namespace: &'static str) -> Self {
        Self {
            namespace,
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

struct ValueNode {
    key: ContextKey,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

/// Cancellation token plus an immutable chain of values.
///
/// Cloning is cheap. [`with_value`](Self::with_value) never mutates the
/// receiver; it returns a new context whose lookups see the new value first.
#[derive(Clone, Default)]
pub struct Context {
    token: CancellationToken,
    values: Option<Arc<ValueNode>>,
}

impl Context {
    /// A fresh, uncancelled context with no values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context observing an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            values: None,
        }
    }

    /// A context that is cancelled when this one is, but can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            values: self.values.clone(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns [`VfsError::Cancelled`] once the token has fired.
    pub fn check_cancelled(&self) -> VfsResult<()> {
        if self.token.is_cancelled() {
            Err(VfsError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Returns a new context carrying `value` under `key`.
    pub fn with_value<T>(&self, key: ContextKey, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            token: self.token.clone(),
            values: Some(Arc::new(ValueNode {
                key,
                value: Arc::new(value),
                parent: self.values.clone(),
            })),
        }
    }

    /// The most recently stored value for `key`, if it has type `T`.
    pub fn value<T>(&self, key: ContextKey) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        let mut node = self.values.as_deref();
        while let Some(n) = node {
            if n.key == key {
                return n.value.downcast_ref::<T>();
            }
            node = n.parent.as_deref();
        }
        None
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = Vec::new();
        let mut node = self.values.as_deref();
        while let Some(n) = node {
            keys.push(n.key);
            node = n.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("keys", &keys)
            .finish()
    }
}
