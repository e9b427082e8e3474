//! Local filesystem driver.
//!
//! Executes [`FileRequest`]s with blocking `std::fs` calls. Failures are
//! captured in the returned result, never raised; the engine reports them
//! through the workflow result like any other execution fault.

use std::fs;
use std::io;
use std::path::Path;

use cpflow_types::{FileOp, FileRequest, OperationResult};

#[derive(Debug, Default)]
pub struct LocalFileDriver;

impl LocalFileDriver {
    pub fn execute(&self, request: &FileRequest) -> OperationResult {
        match self.run(request) {
            Ok(stdout) => OperationResult::ok_with_output(stdout),
            Err(error) => OperationResult::failed(format!(
                "file operation {:?} on '{}' failed: {error}",
                request.op,
                request.path.display()
            )),
        }
    }

    fn run(&self, request: &FileRequest) -> io::Result<String> {
        match request.op {
            FileOp::Read => fs::read_to_string(&request.path),
            FileOp::Write => {
                let content = request.content.as_deref().unwrap_or_default();
                ensure_parent(&request.path)?;
                fs::write(&request.path, content)?;
                Ok(String::new())
            }
            FileOp::Copy => {
                let dst = require_dst(request)?;
                ensure_parent(dst)?;
                fs::copy(&request.path, dst)?;
                Ok(String::new())
            }
            FileOp::Move => {
                let dst = require_dst(request)?;
                ensure_parent(dst)?;
                fs::rename(&request.path, dst)?;
                Ok(String::new())
            }
            FileOp::Remove => {
                fs::remove_file(&request.path)?;
                Ok(String::new())
            }
            FileOp::Mkdir => {
                fs::create_dir_all(&request.path)?;
                Ok(String::new())
            }
            FileOp::Touch => {
                ensure_parent(&request.path)?;
                fs::OpenOptions::new().create(true).append(true).open(&request.path)?;
                Ok(String::new())
            }
            FileOp::CopyTree => {
                let dst = require_dst(request)?;
                copy_tree(&request.path, dst)?;
                Ok(String::new())
            }
            FileOp::RmTree => {
                fs::remove_dir_all(&request.path)?;
                Ok(String::new())
            }
            FileOp::Exists => Ok(if request.path.exists() { "true" } else { "false" }.to_string()),
        }
    }
}

fn require_dst(request: &FileRequest) -> io::Result<&Path> {
    request
        .dst_path
        .as_deref()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination path missing"))
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
