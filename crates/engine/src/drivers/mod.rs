//! Execution backends and the unified dispatch over them.

pub mod docker;
pub mod file;
pub mod shell;
pub mod tracking;

use std::sync::Arc;

use cpflow_types::{OperationResult, Request, RequestPayload};

pub use docker::{DockerBackend, DockerCliDriver, parse_container_names};
pub use file::LocalFileDriver;
pub use shell::ShellDriver;
pub use tracking::{
    ContainerRepository, ImageRepository, InMemoryContainerRepository, InMemoryImageRepository, TrackedDockerDriver, TrackingError,
};

/// Dispatches requests to the backend matching their payload variant.
///
/// The match is exhaustive over [`RequestPayload`]: a new request variant
/// fails compilation here instead of silently falling through at runtime.
#[derive(Clone)]
pub struct UnifiedDriver {
    file: Arc<LocalFileDriver>,
    shell: Arc<ShellDriver>,
    docker: Option<Arc<dyn DockerBackend>>,
}

impl UnifiedDriver {
    pub fn new(file: Arc<LocalFileDriver>, shell: Arc<ShellDriver>, docker: Option<Arc<dyn DockerBackend>>) -> Self {
        Self { file, shell, docker }
    }

    /// Driver for local-environment runs: file and shell backends only.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalFileDriver), Arc::new(ShellDriver), None)
    }

    /// Executes one request, stamping the request's label and
    /// allow-failure flag onto the result.
    pub fn execute(&self, request: &Request) -> OperationResult {
        let mut result = match &request.payload {
            RequestPayload::File(file_request) => self.file.execute(file_request),
            RequestPayload::Shell(shell_request) => self.shell.execute(shell_request),
            RequestPayload::Docker(docker_request) => match &self.docker {
                Some(backend) => docker::dispatch(backend.as_ref(), docker_request),
                None => OperationResult::failed("docker request reached a driver with no docker backend registered"),
            },
            RequestPayload::DockerFile(cp_request) => match &self.docker {
                Some(backend) => backend.cp(&cp_request.src_path, &cp_request.dst_path, &cp_request.container, cp_request.to_container),
                None => OperationResult::failed("docker cp request reached a driver with no docker backend registered"),
            },
        };
        result.label = Some(request.describe());
        result.allow_failure = request.meta.allow_failure;
        result.show_output = request.meta.show_output;
        result
    }
}

impl std::fmt::Debug for UnifiedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedDriver")
            .field("docker", &self.docker.is_some())
            .finish_non_exhaustive()
    }
}
