//! Tree of mount points.
//!
//! Interior nodes are virtual directories that exist only to give mounted
//! backends a place in the hierarchy. Leaves are either empty virtual
//! directories or mounted backends. Resolution walks from the root one
//! segment at a time and stops at the first mounted backend.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{VfsError, VfsResult};
use crate::ops::FileSystem;
use crate::path::VfsPath;

enum Node {
    Dir(VirtualDir),
    Mounted(Arc<dyn FileSystem>),
}

struct NamedNode {
    name: String,
    node: Node,
}

/// Virtual directory: ordered children with unique names.
#[derive(Default)]
struct VirtualDir {
    children: Vec<NamedNode>,
}

impl VirtualDir {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name).map(|c| &c.node)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.node)
    }

    fn remove_child(&mut self, name: &str) -> Option<Node> {
        let idx = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(idx).node)
    }

    fn names(&self) -> Vec<String> {
        self.children.iter().map(|c| c.name.clone()).collect()
    }
}

/// Where a path landed in the tree.
#[derive(Clone)]
pub struct Resolution {
    /// The prefix at which the backend is mounted.
    pub mount_point: VfsPath,
    /// The rest of the path, relative to the backend's root.
    pub provider_path: VfsPath,
    pub backend: Arc<dyn FileSystem>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("mount_point", &self.mount_point)
            .field("provider_path", &self.provider_path)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Result of walking a path through the tree.
#[derive(Debug)]
pub enum Lookup {
    /// A mounted backend owns the path.
    Mounted(Resolution),
    /// The path is the root or an intermediate node. Holds its child names.
    Directory(Vec<String>),
    /// Nothing is mounted at or above the path.
    Missing,
}

/// The mount hierarchy of one composite filesystem.
#[derive(Default)]
pub struct MountTree {
    root: VirtualDir,
}

impl fmt::Debug for MountTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mounts: Vec<String> = self.mounts().iter().map(|(p, _)| p.to_string()).collect();
        f.debug_struct("MountTree").field("mounts", &mounts).finish()
    }
}

impl MountTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `backend` at `path`, creating intermediate nodes as needed.
    ///
    /// Whatever was at `path` before (another backend or a subtree of mount
    /// points) is discarded. Returns true if something was replaced.
    ///
    /// Fails with `InvalidPath` for the root and with `Unsupported` when an
    /// ancestor of `path` is already a mounted backend.
    pub fn mount(&mut self, path: &VfsPath, backend: Arc<dyn FileSystem>) -> VfsResult<bool> {
        let Some((leaf, parents)) = path.names().split_last() else {
            return Err(VfsError::invalid_path("cannot mount at the root"));
        };

        let mut dir = &mut self.root;
        for (depth, name) in parents.iter().enumerate() {
            let idx = match dir.children.iter().position(|c| c.name == *name) {
                Some(idx) => idx,
                None => {
                    dir.children.push(NamedNode {
                        name: name.clone(),
                        node: Node::Dir(VirtualDir::default()),
                    });
                    dir.children.len() - 1
                }
            };
            dir = match &mut dir.children[idx].node {
                Node::Dir(next) => next,
                Node::Mounted(existing) => {
                    let at = VfsPath::from_names(&path.names()[..=depth]);
                    return Err(VfsError::Unsupported(format!(
                        "cannot mount {path} inside {} mounted at {at}",
                        existing.name()
                    )));
                }
            };
        }

        let replaced = dir.remove_child(leaf).is_some();
        if replaced {
            debug!(%path, "replacing existing mount point");
        }
        dir.children.push(NamedNode {
            name: leaf.clone(),
            node: Node::Mounted(backend),
        });
        Ok(replaced)
    }

    /// Remove whatever is at exactly `path` and prune ancestors left empty.
    /// Returns true if something was removed.
    pub fn remove(&mut self, path: &VfsPath) -> bool {
        if path.is_root() {
            return false;
        }
        Self::remove_in(&mut self.root, path.names(), path)
    }

    fn remove_in(dir: &mut VirtualDir, names: &[String], full: &VfsPath) -> bool {
        let Some((first, rest)) = names.split_first() else {
            return false;
        };
        if rest.is_empty() {
            return dir.remove_child(first).is_some();
        }
        let Some(Node::Dir(sub)) = dir.child_mut(first) else {
            return false;
        };
        let removed = Self::remove_in(sub, rest, full);
        if removed && sub.children.is_empty() {
            dir.remove_child(first);
            debug!(path = %full, node = %first, "pruned empty mount directory");
        }
        removed
    }

    /// Walk `path` from the root.
    pub fn lookup(&self, path: &VfsPath) -> Lookup {
        let mut dir = &self.root;
        for (idx, name) in path.names().iter().enumerate() {
            match dir.child(name) {
                Some(Node::Mounted(backend)) => {
                    let names = path.names();
                    return Lookup::Mounted(Resolution {
                        mount_point: VfsPath::from_names(&names[..=idx]),
                        provider_path: VfsPath::from_names(&names[idx + 1..]),
                        backend: Arc::clone(backend),
                    });
                }
                Some(Node::Dir(next)) => dir = next,
                None => return Lookup::Missing,
            }
        }
        Lookup::Directory(dir.names())
    }

    /// Resolve `path` to its backend. Intermediate nodes never resolve.
    pub fn resolve(&self, path: &VfsPath) -> VfsResult<Resolution> {
        match self.lookup(path) {
            Lookup::Mounted(res) => Ok(res),
            Lookup::Directory(_) | Lookup::Missing => {
                trace!(%path, "no mount point");
                Err(VfsError::mount_point_not_found(path.to_string()))
            }
        }
    }

    /// Every mounted backend with its mount point, depth-first in
    /// insertion order.
    pub fn mounts(&self) -> Vec<(VfsPath, Arc<dyn FileSystem>)> {
        let mut out = Vec::new();
        Self::collect(&self.root, &VfsPath::root(), &mut out);
        out
    }

    fn collect(dir: &VirtualDir, at: &VfsPath, out: &mut Vec<(VfsPath, Arc<dyn FileSystem>)>) {
        for child in &dir.children {
            let path = at.child(&child.name);
            match &child.node {
                Node::Mounted(backend) => out.push((path, Arc::clone(backend))),
                Node::Dir(sub) => Self::collect(sub, &path, out),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}
