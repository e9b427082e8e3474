//! Executable request variants produced by the factory layer.
//!
//! A [`Request`] is one concrete unit of work addressed at exactly one
//! backend. The payload is a closed sum type so the unified driver can
//! dispatch with an exhaustive match: adding a variant is a compile-time
//! exhaustiveness failure at every dispatch site rather than a silent
//! runtime miss.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default timeout applied to shell and Docker subprocess invocations.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Metadata shared by every request variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequestMeta {
    /// Optional label used in progress reporting and result presentation.
    #[serde(default)]
    pub name: Option<String>,
    /// Mirrors the originating step's `allow_failure` flag.
    #[serde(default)]
    pub allow_failure: bool,
    /// Mirrors the originating step's `show_output` flag.
    #[serde(default)]
    pub show_output: bool,
}

/// File operation selector for [`FileRequest`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Read,
    Write,
    Copy,
    Move,
    Remove,
    Mkdir,
    Touch,
    CopyTree,
    RmTree,
    Exists,
}

/// A plain filesystem operation executed by the local file driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRequest {
    pub op: FileOp,
    /// Primary path (source for two-path operations).
    pub path: PathBuf,
    /// Destination path for copy/move style operations.
    #[serde(default)]
    pub dst_path: Option<PathBuf>,
    /// Payload for write operations.
    #[serde(default)]
    pub content: Option<String>,
}

/// A subprocess invocation executed by the shell driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellRequest {
    /// Argv vector; never a single shell-interpreted string.
    pub cmd: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Optional stdin payload (used e.g. to pipe Dockerfile text to
    /// `docker build -f -`).
    #[serde(default)]
    pub input: Option<String>,
    /// Wall-clock limit after which the invocation fails with a timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl ShellRequest {
    /// A request running `cmd` in the current directory with the default
    /// timeout and an empty environment overlay.
    pub fn new(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            cwd: None,
            env: HashMap::new(),
            input: None,
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

/// Docker operation selector for [`DockerRequest`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DockerOp {
    Run,
    Stop,
    Remove,
    Build,
    Exec,
    Ps,
    Logs,
}

/// Host directory mounted into a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
}

/// Options shared across Docker operations; unused fields are ignored by
/// operations they do not apply to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DockerOptions {
    /// `run`: detach the container.
    #[serde(default)]
    pub detach: bool,
    /// `rm`: force removal of a running container.
    #[serde(default)]
    pub force: bool,
    /// `ps`: include stopped containers.
    #[serde(default)]
    pub all: bool,
    /// `ps`: emit bare container names, one per line.
    #[serde(default)]
    pub names_only: bool,
    /// `run`: workspace mount.
    #[serde(default)]
    pub mount: Option<MountSpec>,
    /// `run`/`exec`: working directory inside the container.
    #[serde(default)]
    pub workdir: Option<String>,
    /// `stop`: grace period before the daemon kills the container.
    #[serde(default)]
    pub stop_timeout_secs: Option<u64>,
}

/// A Docker CLI operation executed by the Docker driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerRequest {
    pub op: DockerOp,
    /// Image reference (`build` tag, `run` image).
    #[serde(default)]
    pub image: Option<String>,
    /// Container name (`run --name`, `stop`, `rm`, `exec`, `logs`).
    #[serde(default)]
    pub container: Option<String>,
    /// Command argv for `exec` (and trailing command for `run`).
    #[serde(default)]
    pub command: Vec<String>,
    /// Dockerfile text for `build`, piped to the CLI on stdin.
    #[serde(default)]
    pub dockerfile_text: Option<String>,
    #[serde(default)]
    pub options: DockerOptions,
}

/// A host↔container file copy (`docker cp`).
///
/// Produced by the Docker file handler only when source and destination
/// classify differently against the workspace root; same-side copies stay
/// plain [`FileRequest`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerFileRequest {
    pub src_path: PathBuf,
    pub dst_path: PathBuf,
    pub container: String,
    /// Direction of the copy: true when the destination lives inside the
    /// container-mapped workspace and the source does not.
    pub to_container: bool,
}

/// Closed set of executable payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RequestPayload {
    File(FileRequest),
    Shell(ShellRequest),
    Docker(DockerRequest),
    DockerFile(DockerFileRequest),
}

/// One executable unit of work: shared metadata plus a backend payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    #[serde(default)]
    pub meta: RequestMeta,
    pub payload: RequestPayload,
}

impl Request {
    pub fn file(op: FileOp, path: impl Into<PathBuf>) -> Self {
        Self::from_payload(RequestPayload::File(FileRequest {
            op,
            path: path.into(),
            dst_path: None,
            content: None,
        }))
    }

    pub fn file_pair(op: FileOp, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self::from_payload(RequestPayload::File(FileRequest {
            op,
            path: src.into(),
            dst_path: Some(dst.into()),
            content: None,
        }))
    }

    pub fn shell(request: ShellRequest) -> Self {
        Self::from_payload(RequestPayload::Shell(request))
    }

    pub fn docker(request: DockerRequest) -> Self {
        Self::from_payload(RequestPayload::Docker(request))
    }

    pub fn docker_file(request: DockerFileRequest) -> Self {
        Self::from_payload(RequestPayload::DockerFile(request))
    }

    pub fn from_payload(payload: RequestPayload) -> Self {
        Self {
            meta: RequestMeta {
                show_output: true,
                ..RequestMeta::default()
            },
            payload,
        }
    }

    /// Attach a presentation label.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.meta.name = Some(name.into());
        self
    }

    /// Mark the request as non-fatal on failure.
    pub fn allowing_failure(mut self, allow: bool) -> Self {
        self.meta.allow_failure = allow;
        self
    }

    /// Short human label for progress output, falling back to the payload
    /// shape when no explicit name was attached.
    pub fn describe(&self) -> String {
        if let Some(name) = &self.meta.name {
            return name.clone();
        }
        match &self.payload {
            RequestPayload::File(f) => format!("file:{:?} {}", f.op, f.path.display()),
            RequestPayload::Shell(s) => format!("shell: {}", s.cmd.join(" ")),
            RequestPayload::Docker(d) => format!("docker:{:?}", d.op),
            RequestPayload::DockerFile(d) => {
                let direction = if d.to_container { "->" } else { "<-" };
                format!("docker cp {direction} {}", d.container)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders_set_metadata() {
        let request = Request::file(FileOp::Mkdir, "/tmp/work").named("make workspace").allowing_failure(true);
        assert_eq!(request.meta.name.as_deref(), Some("make workspace"));
        assert!(request.meta.allow_failure);
        assert!(request.meta.show_output);
    }

    #[test]
    fn describe_falls_back_to_payload_shape() {
        let request = Request::shell(ShellRequest::new(["echo", "hi"]));
        assert_eq!(request.describe(), "shell: echo hi");

        let named = request.named("greeting");
        assert_eq!(named.describe(), "greeting");
    }

    #[test]
    fn payload_serialization_is_tagged_by_backend() {
        let request = Request::file(FileOp::Touch, "main.rs");
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["payload"]["backend"], "file");
        assert_eq!(value["payload"]["op"], "touch");
    }
}
