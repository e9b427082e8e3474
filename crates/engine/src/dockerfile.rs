//! Lazy, cached loading of Dockerfile content.
//!
//! Dockerfile text is only needed to compute content hashes and to feed
//! `docker build`, and many workflow runs need neither. The resolver
//! therefore defers all I/O until the first access and then caches the
//! outcome, so the loader runs at most once per path for the resolver's
//! lifetime (until [`DockerfileResolver::invalidate_cache`]).
//!
//! A load failure is swallowed: the content is treated as "none", logged
//! at debug level, and not retried. A missing or unreadable Dockerfile
//! downgrades change detection, it does not abort workflows.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

/// Pluggable content loader, replaceable in tests to observe call counts.
pub type DockerfileLoader = dyn Fn(&Path) -> io::Result<String> + Send + Sync;

/// Per-path cache cell distinguishing "not yet attempted" from "attempted
/// and found nothing".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum ContentCell {
    #[default]
    Unloaded,
    Loaded(String),
    /// The path was absent or the loader failed; treated as no content.
    Unavailable,
}

/// Holds the main and online-judge Dockerfile paths and loads their
/// content on demand.
pub struct DockerfileResolver {
    dockerfile_path: Option<PathBuf>,
    oj_dockerfile_path: Option<PathBuf>,
    loader: Box<DockerfileLoader>,
    dockerfile_cell: Mutex<ContentCell>,
    oj_dockerfile_cell: Mutex<ContentCell>,
}

impl DockerfileResolver {
    /// Resolver backed by the filesystem.
    pub fn new(dockerfile_path: Option<PathBuf>, oj_dockerfile_path: Option<PathBuf>) -> Self {
        Self::with_loader(dockerfile_path, oj_dockerfile_path, Box::new(|path| fs::read_to_string(path)))
    }

    /// Resolver with an injected loader function.
    pub fn with_loader(dockerfile_path: Option<PathBuf>, oj_dockerfile_path: Option<PathBuf>, loader: Box<DockerfileLoader>) -> Self {
        Self {
            dockerfile_path,
            oj_dockerfile_path,
            loader,
            dockerfile_cell: Mutex::new(ContentCell::Unloaded),
            oj_dockerfile_cell: Mutex::new(ContentCell::Unloaded),
        }
    }

    /// Resolver that knows about no Dockerfiles at all.
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    pub fn dockerfile_path(&self) -> Option<&Path> {
        self.dockerfile_path.as_deref()
    }

    pub fn oj_dockerfile_path(&self) -> Option<&Path> {
        self.oj_dockerfile_path.as_deref()
    }

    /// Content of the main Dockerfile, loading it on first access.
    pub fn dockerfile(&self) -> Option<String> {
        self.content(&self.dockerfile_cell, self.dockerfile_path.as_deref())
    }

    /// Content of the online-judge tooling Dockerfile, loading it on
    /// first access.
    pub fn oj_dockerfile(&self) -> Option<String> {
        self.content(&self.oj_dockerfile_cell, self.oj_dockerfile_path.as_deref())
    }

    /// Drops both cache cells so the next access hits the loader again.
    pub fn invalidate_cache(&self) {
        *self.dockerfile_cell.lock().expect("dockerfile cache lock poisoned") = ContentCell::Unloaded;
        *self.oj_dockerfile_cell.lock().expect("dockerfile cache lock poisoned") = ContentCell::Unloaded;
    }

    fn content(&self, cell: &Mutex<ContentCell>, path: Option<&Path>) -> Option<String> {
        let mut cell = cell.lock().expect("dockerfile cache lock poisoned");
        if let ContentCell::Unloaded = *cell {
            *cell = match path {
                Some(path) => match (self.loader)(path) {
                    Ok(content) => ContentCell::Loaded(content),
                    Err(error) => {
                        debug!(path = %path.display(), %error, "Dockerfile load failed; treating as no content");
                        ContentCell::Unavailable
                    }
                },
                None => ContentCell::Unavailable,
            };
        }
        match &*cell {
            ContentCell::Loaded(content) => Some(content.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for DockerfileResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerfileResolver")
            .field("dockerfile_path", &self.dockerfile_path)
            .field("oj_dockerfile_path", &self.oj_dockerfile_path)
            .finish_non_exhaustive()
    }
}
