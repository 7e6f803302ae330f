//! Path pattern router.
//!
//! A [`Router`] binds handlers to path patterns and dispatches a concrete
//! path to the first handler, in registration order, whose pattern matches.
//!
//! Supported patterns:
//!
//! - `*` matches every path, including the root
//! - `/a/concrete/path` matches exactly that path
//! - `/{name}` matches any single segment and captures it as `name`
//! - `/fix/{var}/fix` mixes literals and captures
//! - `/fix/fix2/*` matches `/fix/fix2` and anything below it
//!
//! A `*` anywhere but the last segment is rejected at registration.

use std::fmt;

use tracing::trace;

use crate::context::Context;
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
    Wildcard,
}

impl Segment {
    fn accepts(&self, name: &str) -> bool {
        match self {
            Segment::Literal(lit) => lit == name,
            Segment::Capture(_) | Segment::Wildcard => true,
        }
    }
}

/// A parsed, validated route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> VfsResult<Self> {
        let path = VfsPath::new(raw);
        let count = path.name_count();
        let mut segments = Vec::with_capacity(count);
        for (idx, name) in path.names().iter().enumerate() {
            let segment = if name == "*" {
                if idx + 1 != count {
                    return Err(VfsError::invalid_pattern(format!(
                        "{raw}: '*' is only allowed as the last segment"
                    )));
                }
                Segment::Wildcard
            } else if let Some(var) = name.strip_prefix('{').and_then(|n| n.strip_suffix('}')) {
                if var.is_empty() {
                    return Err(VfsError::invalid_pattern(format!("{raw}: empty capture name")));
                }
                if segments
                    .iter()
                    .any(|s| matches!(s, Segment::Capture(c) if c == var))
                {
                    return Err(VfsError::invalid_pattern(format!(
                        "{raw}: capture '{var}' declared twice"
                    )));
                }
                Segment::Capture(var.to_string())
            } else {
                Segment::Literal(name.clone())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern ends in `*`.
    pub fn is_prefix(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }

    /// Number of segments before a trailing `*`.
    fn fixed_len(&self) -> usize {
        if self.is_prefix() {
            self.segments.len() - 1
        } else {
            self.segments.len()
        }
    }

    pub fn is_match(&self, path: &VfsPath) -> bool {
        let fixed = self.fixed_len();
        let count_ok = if self.is_prefix() {
            path.name_count() >= fixed
        } else {
            path.name_count() == fixed
        };
        count_ok
            && self.segments[..fixed]
                .iter()
                .zip(path.names())
                .all(|(seg, name)| seg.accepts(name))
    }

    /// Segment index of capture `name`.
    pub fn capture_index(&self, name: &str) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| matches!(s, Segment::Capture(c) if c == name))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// State handed to a handler for one dispatch.
pub struct RoutingContext<'a, A: ?Sized = ()> {
    ctx: &'a Context,
    path: &'a VfsPath,
    pattern: &'a Pattern,
    args: &'a A,
}

impl<'a, A: ?Sized> RoutingContext<'a, A> {
    /// The concrete path being dispatched.
    pub fn path(&self) -> &'a VfsPath {
        self.path
    }

    pub fn pattern(&self) -> &'a Pattern {
        self.pattern
    }

    /// Extra arguments supplied with the dispatch.
    pub fn args(&self) -> &'a A {
        self.args
    }

    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    /// Value of capture `{name}`.
    ///
    /// Returns an empty string when the pattern declares no such capture,
    /// and [`VfsError::InvalidPath`] when it does but the path has no
    /// segment at that position.
    pub fn value_of(&self, name: &str) -> VfsResult<&'a str> {
        let Some(idx) = self.pattern.capture_index(name) else {
            return Ok("");
        };
        if idx >= self.path.name_count() {
            return Err(VfsError::invalid_path(format!(
                "{}: no segment for capture '{name}' of {}",
                self.path, self.pattern
            )));
        }
        Ok(self.path.name_at(idx))
    }

    /// For `dir/*` patterns, the part of the path matched by `*`.
    /// Empty for exact patterns.
    pub fn tail(&self) -> VfsPath {
        if !self.pattern.is_prefix() {
            return VfsPath::root();
        }
        VfsPath::from_names(&self.path.names()[self.pattern.fixed_len()..])
    }
}

struct Route<T, A: ?Sized> {
    pattern: Pattern,
    handler: Box<dyn Fn(&RoutingContext<'_, A>) -> VfsResult<T> + Send + Sync>,
}

/// Ordered list of `(pattern, handler)` routes.
pub struct Router<T, A: ?Sized = ()> {
    routes: Vec<Route<T, A>>,
}

impl<T, A: ?Sized> Default for Router<T, A> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T, A: ?Sized> fmt::Debug for Router<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field(
                "patterns",
                &self.routes.iter().map(|r| r.pattern.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<T, A: ?Sized> Router<T, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Earlier routes take precedence.
    pub fn register<F>(&mut self, pattern: &str, handler: F) -> VfsResult<()>
    where
        F: Fn(&RoutingContext<'_, A>) -> VfsResult<T> + Send + Sync + 'static,
    {
        let pattern = Pattern::parse(pattern)?;
        self.routes.push(Route {
            pattern,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn route<F>(mut self, pattern: &str, handler: F) -> VfsResult<Self>
    where
        F: Fn(&RoutingContext<'_, A>) -> VfsResult<T> + Send + Sync + 'static,
    {
        self.register(pattern, handler)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Patterns in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.routes.iter().map(|r| &r.pattern)
    }

    /// Returns true if any route matches `path`.
    pub fn is_match(&self, path: &VfsPath) -> bool {
        self.routes.iter().any(|r| r.pattern.is_match(path))
    }

    /// Run the first matching handler with `args`.
    ///
    /// Returns `None` when no pattern matches; that is not an error at this
    /// level, callers decide what "unhandled" means.
    pub fn dispatch_with(&self, ctx: &Context, path: &VfsPath, args: &A) -> Option<VfsResult<T>> {
        let route = self.routes.iter().find(|r| r.pattern.is_match(path));
        let Some(route) = route else {
            trace!(%path, "no route matched");
            return None;
        };
        let rc = RoutingContext {
            ctx,
            path,
            pattern: &route.pattern,
            args,
        };
        Some((route.handler)(&rc))
    }
}

impl<T> Router<T, ()> {
    /// Run the first matching handler.
    pub fn dispatch(&self, ctx: &Context, path: &VfsPath) -> Option<VfsResult<T>> {
        self.dispatch_with(ctx, path, &())
    }
}
