//! File and run handler pairs: the polymorphic seam between the factory
//! layer and the execution backends.
//!
//! Handlers are pure request constructors. The Local variants always emit
//! plain file/shell requests; the Docker variants classify paths against
//! the container-mapped workspace and wrap boundary-crossing operations
//! in `docker cp` requests, and route command execution through
//! `docker exec` at the deterministically named container.
//!
//! Relative paths in step config are workspace-relative by convention;
//! every handler anchors them at the workspace root before using them.
//! Nothing here performs I/O beyond an `is_dir` probe used to route
//! directory copies.

use std::path::{Path, PathBuf};

use cpflow_types::{
    DockerFileRequest, DockerOp, DockerOptions, DockerRequest, FileOp, Request, ShellRequest,
};
use cpflow_util::WorkspaceChecker;

use crate::context::DockerNames;

/// Which container a run-style step is addressed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    /// The per-language workspace container (or the local shell).
    Workspace,
    /// The online-judge tooling container (or the local shell).
    Judge,
}

/// Constructs file-operation requests.
pub trait FileHandler {
    fn copy(&self, src: &Path, dst: &Path) -> Request;
    fn copytree(&self, src: &Path, dst: &Path) -> Request;
    fn move_entry(&self, src: &Path, dst: &Path) -> Request;
    fn mkdir(&self, path: &Path) -> Request;
    fn touch(&self, path: &Path) -> Request;
    fn remove(&self, path: &Path) -> Request;
    fn rmtree(&self, path: &Path) -> Request;
}

/// Constructs command-execution requests.
pub trait RunHandler {
    fn run(&self, cmd: Vec<String>, target: RunTarget) -> Request;
}

fn anchor(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() { path.to_path_buf() } else { root.join(path) }
}

/// Copy and tree-copy are different primitives; route by what the source
/// actually is.
fn copy_op(src: &Path) -> FileOp {
    if src.is_dir() { FileOp::CopyTree } else { FileOp::Copy }
}

/// Local variant: every operation is a plain request, no classification.
#[derive(Debug)]
pub struct LocalFileHandler {
    workspace_root: PathBuf,
}

impl LocalFileHandler {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl FileHandler for LocalFileHandler {
    fn copy(&self, src: &Path, dst: &Path) -> Request {
        let src = anchor(&self.workspace_root, src);
        let dst = anchor(&self.workspace_root, dst);
        Request::file_pair(copy_op(&src), src, dst)
    }

    fn copytree(&self, src: &Path, dst: &Path) -> Request {
        Request::file_pair(FileOp::CopyTree, anchor(&self.workspace_root, src), anchor(&self.workspace_root, dst))
    }

    fn move_entry(&self, src: &Path, dst: &Path) -> Request {
        Request::file_pair(FileOp::Move, anchor(&self.workspace_root, src), anchor(&self.workspace_root, dst))
    }

    fn mkdir(&self, path: &Path) -> Request {
        Request::file(FileOp::Mkdir, anchor(&self.workspace_root, path))
    }

    fn touch(&self, path: &Path) -> Request {
        Request::file(FileOp::Touch, anchor(&self.workspace_root, path))
    }

    fn remove(&self, path: &Path) -> Request {
        Request::file(FileOp::Remove, anchor(&self.workspace_root, path))
    }

    fn rmtree(&self, path: &Path) -> Request {
        Request::file(FileOp::RmTree, anchor(&self.workspace_root, path))
    }
}

/// Docker variant: same-side operations stay plain file requests (the
/// workspace is volume-mounted), boundary crossings become `docker cp`.
#[derive(Debug)]
pub struct DockerFileHandler {
    checker: WorkspaceChecker,
    container_name: String,
}

impl DockerFileHandler {
    pub fn new(workspace_root: impl Into<PathBuf>, container_name: impl Into<String>) -> Self {
        Self {
            checker: WorkspaceChecker::new(workspace_root),
            container_name: container_name.into(),
        }
    }

    fn anchor(&self, path: &Path) -> PathBuf {
        anchor(self.checker.root(), path)
    }

    fn pair_request(&self, op: FileOp, src: PathBuf, dst: PathBuf) -> Request {
        let src_inside = self.checker.is_inside(&src);
        let dst_inside = self.checker.is_inside(&dst);
        if src_inside == dst_inside {
            return Request::file_pair(op, src, dst);
        }
        Request::docker_file(DockerFileRequest {
            src_path: src,
            dst_path: dst,
            container: self.container_name.clone(),
            to_container: dst_inside && !src_inside,
        })
    }
}

impl FileHandler for DockerFileHandler {
    fn copy(&self, src: &Path, dst: &Path) -> Request {
        let src = self.anchor(src);
        let op = copy_op(&src);
        self.pair_request(op, src, self.anchor(dst))
    }

    fn copytree(&self, src: &Path, dst: &Path) -> Request {
        self.pair_request(FileOp::CopyTree, self.anchor(src), self.anchor(dst))
    }

    fn move_entry(&self, src: &Path, dst: &Path) -> Request {
        self.pair_request(FileOp::Move, self.anchor(src), self.anchor(dst))
    }

    fn mkdir(&self, path: &Path) -> Request {
        Request::file(FileOp::Mkdir, self.anchor(path))
    }

    fn touch(&self, path: &Path) -> Request {
        Request::file(FileOp::Touch, self.anchor(path))
    }

    fn remove(&self, path: &Path) -> Request {
        Request::file(FileOp::Remove, self.anchor(path))
    }

    fn rmtree(&self, path: &Path) -> Request {
        Request::file(FileOp::RmTree, self.anchor(path))
    }
}

/// Local variant: wraps the argv in a shell request rooted at the
/// workspace.
#[derive(Debug)]
pub struct LocalRunHandler {
    cwd: PathBuf,
}

impl LocalRunHandler {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl RunHandler for LocalRunHandler {
    fn run(&self, cmd: Vec<String>, _target: RunTarget) -> Request {
        let mut request = ShellRequest::new(cmd);
        request.cwd = Some(self.cwd.clone());
        Request::shell(request)
    }
}

/// Docker variant: wraps the argv in a `docker exec` request addressed at
/// the container matching the run target.
#[derive(Debug)]
pub struct DockerRunHandler {
    container_name: String,
    oj_container_name: String,
    workdir: Option<String>,
}

impl DockerRunHandler {
    pub fn new(names: &DockerNames, workdir: Option<String>) -> Self {
        Self {
            container_name: names.container_name.clone(),
            oj_container_name: names.oj_container_name.clone(),
            workdir,
        }
    }
}

impl RunHandler for DockerRunHandler {
    fn run(&self, cmd: Vec<String>, target: RunTarget) -> Request {
        let container = match target {
            RunTarget::Workspace => self.container_name.clone(),
            RunTarget::Judge => self.oj_container_name.clone(),
        };
        Request::docker(DockerRequest {
            op: DockerOp::Exec,
            image: None,
            container: Some(container),
            command: cmd,
            dockerfile_text: None,
            options: DockerOptions {
                workdir: self.workdir.clone(),
                ..DockerOptions::default()
            },
        })
    }
}
