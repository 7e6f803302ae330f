//! Declarative mount configuration.
//!
//! ```toml
//! [[mounts]]
//! path = "/scratch"
//! backend = "memory"
//!
//! [[mounts]]
//! path = "/docs"
//! backend = "memory"
//! read_only = true
//! root = "/published"
//! options = { page_size = 50 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backends::{ChRoot, MemoryBackend};
use crate::error::{VfsError, VfsResult};
use crate::mount::MountableFileSystem;
use crate::ops::FileSystem;
use crate::path::{VfsPath, unportable_character};
use crate::types::Options;

/// A whole composite filesystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VfsConfig {
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

impl VfsConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> VfsResult<Self> {
        toml::from_str(s).map_err(|e| VfsError::other(format!("invalid vfs configuration: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VfsError::from(e).context(format!("reading {}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn with_mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }
}

/// One mount point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Where to mount (e.g. "/scratch").
    pub path: String,

    /// Backend kind, looked up in the [`BackendRegistry`].
    pub backend: String,

    /// Reject writes through this mount.
    #[serde(default)]
    pub read_only: bool,

    /// Expose only this subtree of the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Backend-specific settings.
    #[serde(default)]
    pub options: Options,
}

impl MountConfig {
    pub fn new(path: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            backend: backend.into(),
            read_only: false,
            root: None,
            options: Options::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The validated mount path.
    ///
    /// Rejects the root and paths with `.` or `..` segments.
    pub fn mount_path(&self) -> VfsResult<VfsPath> {
        let path = VfsPath::new(&self.path);
        if path.is_root() {
            return Err(VfsError::invalid_path(format!(
                "{:?}: cannot mount at the root",
                self.path
            )));
        }
        if path.normalize() != path {
            return Err(VfsError::invalid_path(format!(
                "{:?}: mount paths must be normalized",
                self.path
            )));
        }
        if let Some(idx) = unportable_character(&self.path) {
            warn!(path = %self.path, index = idx, "mount path contains an unportable character");
        }
        Ok(path)
    }
}

type Factory = Box<dyn Fn(&MountConfig) -> VfsResult<Arc<dyn FileSystem>> + Send + Sync>;

/// Backend constructors by kind name.
pub struct BackendRegistry {
    factories: HashMap<String, Factory>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Registry with the built-in `memory` backend.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", |mount| {
            let backend = MemoryBackend::new();
            backend.set_read_only(mount.read_only);
            Ok(Arc::new(backend))
        });
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&MountConfig) -> VfsResult<Arc<dyn FileSystem>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build the backend for one mount, applying `root` if set.
    pub fn create(&self, mount: &MountConfig) -> VfsResult<Arc<dyn FileSystem>> {
        let factory = self.factories.get(&mount.backend).ok_or_else(|| {
            VfsError::Unsupported(format!(
                "unknown backend kind {:?} for {}",
                mount.backend, mount.path
            ))
        })?;
        let backend = factory(mount)?;
        match &mount.root {
            Some(root) => Ok(Arc::new(ChRoot::from_arc(root.as_str(), backend))),
            None => Ok(backend),
        }
    }
}

impl MountableFileSystem {
    /// Build a composite filesystem from `config`.
    ///
    /// Mounts are applied in order, so a later entry at the same path
    /// replaces an earlier one.
    pub fn from_config(config: &VfsConfig, registry: &BackendRegistry) -> VfsResult<Self> {
        let fs = Self::new();
        for mount in &config.mounts {
            let path = mount.mount_path()?;
            let backend = registry.create(mount)?;
            debug!(%path, backend = %mount.backend, read_only = mount.read_only, "configured mount");
            fs.mount_arc(path, backend)?;
        }
        Ok(fs)
    }
}
