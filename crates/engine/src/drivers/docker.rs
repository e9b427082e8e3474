//! Docker backend: the operation surface the engine needs from the
//! `docker` CLI, and the driver that shells out to it.
//!
//! The engine decides *which* operation to run and *which* image or
//! container names to use; this module owns the argv construction. The
//! surface is a trait so the tracking decorator and the tests can wrap or
//! replace the CLI-backed implementation.

use std::path::Path;

use cpflow_types::{DockerOptions, DockerRequest, OperationResult, ShellRequest};

use crate::drivers::shell::ShellDriver;

/// Timeout for image builds, which dwarf every other operation.
const BUILD_TIMEOUT_SECS: u64 = 600;

/// Operation surface of the Docker backend.
pub trait DockerBackend: Send + Sync {
    fn run_container(&self, image: &str, name: Option<&str>, options: &DockerOptions, command: &[String]) -> OperationResult;
    fn stop_container(&self, name: &str, timeout_secs: u64) -> OperationResult;
    fn remove_container(&self, name: &str, force: bool) -> OperationResult;
    fn exec_in_container(&self, name: &str, command: &[String], workdir: Option<&str>) -> OperationResult;
    /// Builds an image from Dockerfile text (piped to the CLI on stdin).
    fn build_image(&self, dockerfile_text: &str, tag: &str) -> OperationResult;
    fn image_rm(&self, image: &str) -> OperationResult;
    fn ps(&self, all: bool, names_only: bool) -> OperationResult;
    fn inspect(&self, target: &str) -> OperationResult;
    fn logs(&self, name: &str) -> OperationResult;
    fn cp(&self, src: &Path, dst: &Path, container: &str, to_container: bool) -> OperationResult;
}

/// Backend that invokes the `docker` CLI through the shell driver.
#[derive(Debug, Default)]
pub struct DockerCliDriver {
    shell: ShellDriver,
}

impl DockerCliDriver {
    fn invoke(&self, cmd: Vec<String>) -> OperationResult {
        self.shell.execute(&ShellRequest::new(cmd))
    }
}

impl DockerBackend for DockerCliDriver {
    fn run_container(&self, image: &str, name: Option<&str>, options: &DockerOptions, command: &[String]) -> OperationResult {
        self.invoke(build_run_command(image, name, options, command))
    }

    fn stop_container(&self, name: &str, timeout_secs: u64) -> OperationResult {
        self.invoke(vec![
            "docker".into(),
            "stop".into(),
            "-t".into(),
            timeout_secs.to_string(),
            name.into(),
        ])
    }

    fn remove_container(&self, name: &str, force: bool) -> OperationResult {
        let mut cmd = vec!["docker".to_string(), "rm".to_string()];
        if force {
            cmd.push("-f".into());
        }
        cmd.push(name.into());
        self.invoke(cmd)
    }

    fn exec_in_container(&self, name: &str, command: &[String], workdir: Option<&str>) -> OperationResult {
        let mut cmd = vec!["docker".to_string(), "exec".to_string()];
        if let Some(workdir) = workdir {
            cmd.push("-w".into());
            cmd.push(workdir.into());
        }
        cmd.push(name.into());
        cmd.extend(command.iter().cloned());
        self.invoke(cmd)
    }

    fn build_image(&self, dockerfile_text: &str, tag: &str) -> OperationResult {
        let mut request = ShellRequest::new(["docker", "build", "-t", tag, "-f", "-", "."]);
        request.input = Some(dockerfile_text.to_string());
        request.timeout_secs = BUILD_TIMEOUT_SECS;
        self.shell.execute(&request)
    }

    fn image_rm(&self, image: &str) -> OperationResult {
        self.invoke(vec!["docker".into(), "rmi".into(), image.into()])
    }

    fn ps(&self, all: bool, names_only: bool) -> OperationResult {
        let mut cmd = vec!["docker".to_string(), "ps".to_string()];
        if all {
            cmd.push("-a".into());
        }
        if names_only {
            cmd.push("--format".into());
            cmd.push("{{.Names}}".into());
        }
        self.invoke(cmd)
    }

    fn inspect(&self, target: &str) -> OperationResult {
        self.invoke(vec!["docker".into(), "inspect".into(), target.into()])
    }

    fn logs(&self, name: &str) -> OperationResult {
        self.invoke(vec!["docker".into(), "logs".into(), name.into()])
    }

    fn cp(&self, src: &Path, dst: &Path, container: &str, to_container: bool) -> OperationResult {
        let (from, to) = if to_container {
            (src.display().to_string(), format!("{container}:{}", dst.display()))
        } else {
            (format!("{container}:{}", src.display()), dst.display().to_string())
        };
        self.invoke(vec!["docker".into(), "cp".into(), from, to])
    }
}

fn build_run_command(image: &str, name: Option<&str>, options: &DockerOptions, command: &[String]) -> Vec<String> {
    let mut cmd = vec!["docker".to_string(), "run".to_string()];
    if options.detach {
        cmd.push("-d".into());
    }
    if let Some(name) = name {
        cmd.push("--name".into());
        cmd.push(name.into());
    }
    if let Some(mount) = &options.mount {
        cmd.push("-v".into());
        cmd.push(format!("{}:{}", mount.host_path.display(), mount.container_path));
    }
    if let Some(workdir) = &options.workdir {
        cmd.push("-w".into());
        cmd.push(workdir.into());
    }
    cmd.push(image.into());
    cmd.extend(command.iter().cloned());
    cmd
}

/// Routes a [`DockerRequest`] to the matching backend operation.
pub fn dispatch(backend: &dyn DockerBackend, request: &DockerRequest) -> OperationResult {
    use cpflow_types::DockerOp;

    match request.op {
        DockerOp::Run => match &request.image {
            Some(image) => backend.run_container(image, request.container.as_deref(), &request.options, &request.command),
            None => OperationResult::failed("docker run request has no image"),
        },
        DockerOp::Stop => match &request.container {
            Some(name) => backend.stop_container(name, request.options.stop_timeout_secs.unwrap_or(10)),
            None => OperationResult::failed("docker stop request has no container"),
        },
        DockerOp::Remove => match &request.container {
            Some(name) => backend.remove_container(name, request.options.force),
            None => OperationResult::failed("docker rm request has no container"),
        },
        DockerOp::Build => match (&request.dockerfile_text, &request.image) {
            (Some(text), Some(tag)) => backend.build_image(text, tag),
            (None, _) => OperationResult::failed("docker build request has no Dockerfile content"),
            (_, None) => OperationResult::failed("docker build request has no image tag"),
        },
        DockerOp::Exec => match &request.container {
            Some(name) => backend.exec_in_container(name, &request.command, request.options.workdir.as_deref()),
            None => OperationResult::failed("docker exec request has no container"),
        },
        DockerOp::Ps => backend.ps(request.options.all, request.options.names_only),
        DockerOp::Logs => match &request.container {
            Some(name) => backend.logs(name),
            None => OperationResult::failed("docker logs request has no container"),
        },
    }
}

/// Parses `docker ps --format {{.Names}}` output into bare names.
pub fn parse_container_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.trim().trim_matches('\'').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpflow_types::MountSpec;

    #[test]
    fn run_command_includes_name_mount_and_trailing_command() {
        let options = DockerOptions {
            detach: true,
            mount: Some(MountSpec {
                host_path: "/home/user/contest".into(),
                container_path: "/workspace".into(),
            }),
            workdir: Some("/workspace".into()),
            ..DockerOptions::default()
        };
        let cmd = build_run_command("cpflow-rust", Some("cpflow-rust-abc"), &options, &["sleep".into(), "infinity".into()]);
        assert_eq!(
            cmd,
            vec![
                "docker",
                "run",
                "-d",
                "--name",
                "cpflow-rust-abc",
                "-v",
                "/home/user/contest:/workspace",
                "-w",
                "/workspace",
                "cpflow-rust",
                "sleep",
                "infinity",
            ]
        );
    }

    #[test]
    fn parse_container_names_splits_and_trims_lines() {
        let names = parse_container_names("cpflow-rust-abc\n'cpflow-oj-def'\n\n");
        assert_eq!(names, vec!["cpflow-rust-abc", "cpflow-oj-def"]);
    }

    #[test]
    fn dispatch_reports_missing_identities_as_failures() {
        let backend = DockerCliDriver::default();
        let request = DockerRequest {
            op: cpflow_types::DockerOp::Exec,
            image: None,
            container: None,
            command: vec!["true".into()],
            dockerfile_text: None,
            options: DockerOptions::default(),
        };
        let result = dispatch(&backend, &request);
        assert!(!result.success);
        assert!(result.error_output().contains("no container"));
    }
}
