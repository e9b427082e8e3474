//! Typed driver registry: the dependency-resolution boundary.
//!
//! Resolution failures are hard errors naming the missing key: a missing
//! driver is a wiring fault that must surface, never a condition to fall
//! back from silently.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::drivers::{DockerBackend, LocalFileDriver, ShellDriver};

/// Closed enumeration of resolvable driver identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKey {
    FileDriver,
    ShellDriver,
    DockerDriver,
}

impl fmt::Display for DriverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FileDriver => "FILE_DRIVER",
            Self::ShellDriver => "SHELL_DRIVER",
            Self::DockerDriver => "DOCKER_DRIVER",
        };
        write!(f, "{label}")
    }
}

/// Holds the backend drivers wired in by the caller.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    file: Option<Arc<LocalFileDriver>>,
    shell: Option<Arc<ShellDriver>>,
    docker: Option<Arc<dyn DockerBackend>>,
}

impl DriverRegistry {
    /// Registry with the local file and shell drivers, no Docker.
    pub fn local_defaults() -> Self {
        Self::default().with_file(Arc::new(LocalFileDriver)).with_shell(Arc::new(ShellDriver))
    }

    pub fn with_file(mut self, driver: Arc<LocalFileDriver>) -> Self {
        self.file = Some(driver);
        self
    }

    pub fn with_shell(mut self, driver: Arc<ShellDriver>) -> Self {
        self.shell = Some(driver);
        self
    }

    pub fn with_docker(mut self, driver: Arc<dyn DockerBackend>) -> Self {
        self.docker = Some(driver);
        self
    }

    pub fn resolve_file(&self) -> Result<Arc<LocalFileDriver>> {
        match &self.file {
            Some(driver) => Ok(Arc::clone(driver)),
            None => bail!("no driver registered for key {}", DriverKey::FileDriver),
        }
    }

    pub fn resolve_shell(&self) -> Result<Arc<ShellDriver>> {
        match &self.shell {
            Some(driver) => Ok(Arc::clone(driver)),
            None => bail!("no driver registered for key {}", DriverKey::ShellDriver),
        }
    }

    pub fn resolve_docker(&self) -> Result<Arc<dyn DockerBackend>> {
        match &self.docker {
            Some(driver) => Ok(Arc::clone(driver)),
            None => bail!("no driver registered for key {}", DriverKey::DockerDriver),
        }
    }

    /// Docker backend if one is wired, without treating absence as an
    /// error (used by local-env runs that never touch Docker).
    pub fn docker_if_registered(&self) -> Option<Arc<dyn DockerBackend>> {
        self.docker.clone()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("file", &self.file.is_some())
            .field("shell", &self.shell.is_some())
            .field("docker", &self.docker.is_some())
            .finish()
    }
}
