//! Environment preparation: turning a rebuild plan into executable
//! requests.
//!
//! Preparation runs strictly before the main workflow steps, always
//! sequentially (a container cannot be recreated while its image is still
//! building). The stale-container removal allows failure because the
//! container legitimately may not exist yet.

use std::path::Path;

use cpflow_types::{DockerOp, DockerOptions, DockerRequest, MountSpec, RebuildPlan, Request};

use crate::context::ExecutionContext;

/// Command that keeps a prepared container alive for later `exec`s.
const KEEPALIVE_COMMAND: [&str; 2] = ["sleep", "infinity"];

/// Ordered preparation requests for `plan`: image builds first, then
/// container recreation, for the main pair and then the judge-tools pair.
pub fn preparation_requests(context: &ExecutionContext, plan: &RebuildPlan) -> Vec<Request> {
    let names = context.docker_names();
    let mut requests = Vec::new();

    if plan.image_rebuild
        && let Some(dockerfile_text) = context.dockerfile_resolver.dockerfile()
    {
        requests.push(build_request(&names.image_name, dockerfile_text).named(format!("build {}", names.image_name)));
    }
    if plan.container_recreate {
        requests.extend(recreate_container_requests(
            &names.container_name,
            &names.image_name,
            &context.workspace_root,
        ));
    }

    // The judge-tools pair only exists when an oj Dockerfile is
    // configured; without one there is no image to build a container
    // from.
    if let Some(oj_dockerfile_text) = context.dockerfile_resolver.oj_dockerfile() {
        if plan.oj_image_rebuild {
            requests.push(build_request(&names.oj_image_name, oj_dockerfile_text).named(format!("build {}", names.oj_image_name)));
        }
        if plan.oj_container_recreate {
            requests.extend(recreate_container_requests(
                &names.oj_container_name,
                &names.oj_image_name,
                &context.workspace_root,
            ));
        }
    }

    requests
}

fn build_request(image_name: &str, dockerfile_text: String) -> Request {
    Request::docker(DockerRequest {
        op: DockerOp::Build,
        image: Some(image_name.to_string()),
        container: None,
        command: Vec::new(),
        dockerfile_text: Some(dockerfile_text),
        options: DockerOptions::default(),
    })
}

fn recreate_container_requests(container_name: &str, image_name: &str, workspace_root: &Path) -> Vec<Request> {
    let remove = Request::docker(DockerRequest {
        op: DockerOp::Remove,
        image: None,
        container: Some(container_name.to_string()),
        command: Vec::new(),
        dockerfile_text: None,
        options: DockerOptions {
            force: true,
            ..DockerOptions::default()
        },
    })
    .named(format!("remove stale {container_name}"))
    .allowing_failure(true);

    let run = Request::docker(DockerRequest {
        op: DockerOp::Run,
        image: Some(image_name.to_string()),
        container: Some(container_name.to_string()),
        command: KEEPALIVE_COMMAND.iter().map(ToString::to_string).collect(),
        dockerfile_text: None,
        options: DockerOptions {
            detach: true,
            mount: Some(MountSpec {
                host_path: workspace_root.to_path_buf(),
                container_path: "/workspace".to_string(),
            }),
            workdir: Some("/workspace".to_string()),
            ..DockerOptions::default()
        },
    })
    .named(format!("start {container_name}"));

    vec![remove, run]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::DockerfileResolver;
    use cpflow_types::{EnvKind, RequestPayload};
    use std::path::PathBuf;

    fn docker_context() -> ExecutionContext {
        let resolver = DockerfileResolver::with_loader(
            Some(PathBuf::from("/env/Dockerfile")),
            None,
            Box::new(|_| Ok("FROM rust:1.89\n".to_string())),
        );
        ExecutionContext::new("rust", EnvKind::Docker, "abc300", "a", "test", "/home/user/contest", resolver)
    }

    fn docker_ops(requests: &[Request]) -> Vec<DockerOp> {
        requests
            .iter()
            .map(|request| match &request.payload {
                RequestPayload::Docker(docker) => docker.op,
                other => panic!("expected docker request, got {other:?}"),
            })
            .collect()
    }

    fn docker_context_with_oj() -> ExecutionContext {
        let resolver = DockerfileResolver::with_loader(
            Some(PathBuf::from("/env/Dockerfile")),
            Some(PathBuf::from("/env/oj.Dockerfile")),
            Box::new(|path| {
                if path.ends_with("oj.Dockerfile") {
                    Ok("FROM python:3.12\nRUN pip install online-judge-tools\n".to_string())
                } else {
                    Ok("FROM rust:1.89\n".to_string())
                }
            }),
        );
        ExecutionContext::new("rust", EnvKind::Docker, "abc300", "a", "test", "/home/user/contest", resolver)
    }

    #[test]
    fn full_rebuild_builds_then_recreates() {
        let context = docker_context();
        let requests = preparation_requests(&context, &RebuildPlan::rebuild_everything());
        // No oj Dockerfile is configured, so only the main pair appears.
        assert_eq!(docker_ops(&requests), vec![DockerOp::Build, DockerOp::Remove, DockerOp::Run]);
    }

    #[test]
    fn oj_pair_is_prepared_when_its_dockerfile_exists() {
        let context = docker_context_with_oj();
        let requests = preparation_requests(&context, &RebuildPlan::rebuild_everything());
        assert_eq!(
            docker_ops(&requests),
            vec![DockerOp::Build, DockerOp::Remove, DockerOp::Run, DockerOp::Build, DockerOp::Remove, DockerOp::Run]
        );
    }

    #[test]
    fn stale_container_removal_allows_failure() {
        let context = docker_context();
        let requests = preparation_requests(&context, &RebuildPlan::rebuild_everything());
        let remove = requests
            .iter()
            .find(|request| matches!(&request.payload, RequestPayload::Docker(d) if d.op == DockerOp::Remove))
            .expect("removal request present");
        assert!(remove.meta.allow_failure);
    }

    #[test]
    fn container_run_mounts_the_workspace() {
        let context = docker_context();
        let requests = preparation_requests(&context, &RebuildPlan::rebuild_everything());
        let run = requests
            .iter()
            .find_map(|request| match &request.payload {
                RequestPayload::Docker(d) if d.op == DockerOp::Run => Some(d),
                _ => None,
            })
            .expect("run request present");
        let mount = run.options.mount.as_ref().expect("workspace mount");
        assert_eq!(mount.host_path, PathBuf::from("/home/user/contest"));
        assert_eq!(mount.container_path, "/workspace");
        assert!(run.options.detach);
    }

    #[test]
    fn no_work_means_no_requests() {
        let context = docker_context();
        assert!(preparation_requests(&context, &RebuildPlan::default()).is_empty());
    }
}
