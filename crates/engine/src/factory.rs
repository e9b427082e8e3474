//! The request factory layer: one factory per step kind, mapping a
//! declarative step descriptor to exactly one executable request.
//!
//! Factories construct, they never execute. All string arguments pass
//! through template formatting before they are embedded in a request;
//! arity violations and kind mismatches are reported at construction
//! time, before any side effect can occur.

use anyhow::{Result, bail};
use indexmap::IndexMap;

use cpflow_types::{DockerOp, DockerOptions, DockerRequest, Request, StepDescriptor, StepKind};

use crate::context::ExecutionContext;
use crate::handlers::{FileHandler, RunHandler, RunTarget};

/// Everything a factory needs from its surroundings: the context for
/// template formatting and the active handler pair for the current
/// environment.
pub struct StepEnvironment<'a> {
    pub context: &'a ExecutionContext,
    pub files: &'a dyn FileHandler,
    pub runner: &'a dyn RunHandler,
}

impl StepEnvironment<'_> {
    fn format_cmd(&self, step: &StepDescriptor) -> Vec<String> {
        step.cmd.iter().map(|arg| self.context.format_template(arg)).collect()
    }
}

/// Maps one step descriptor to one request.
pub trait RequestFactory {
    /// The step kind this factory accepts.
    fn kind(&self) -> StepKind;

    fn create_request(&self, step: &StepDescriptor, env: &StepEnvironment<'_>) -> Result<Request>;
}

/// Kind mismatches are programmer/config errors, not runtime conditions;
/// every factory checks before interpreting the command array.
fn ensure_kind(expected: StepKind, step: &StepDescriptor) -> Result<()> {
    if step.kind != expected {
        bail!("factory for '{expected}' steps received a step of type '{}'", step.kind);
    }
    Ok(())
}

fn ensure_exact_arity(step: &StepDescriptor, expected: usize, usage: &str) -> Result<()> {
    if step.cmd.len() != expected {
        bail!(
            "'{}' step requires exactly {expected} arguments ({usage}), got {}",
            step.kind,
            step.cmd.len()
        );
    }
    Ok(())
}

fn ensure_min_arity(step: &StepDescriptor, minimum: usize, usage: &str) -> Result<()> {
    if step.cmd.len() < minimum {
        bail!(
            "'{}' step requires at least {minimum} argument(s) ({usage}), got {}",
            step.kind,
            step.cmd.len()
        );
    }
    Ok(())
}

fn apply_step_meta(mut request: Request, step: &StepDescriptor) -> Request {
    request.meta.allow_failure = step.allow_failure;
    request.meta.show_output = step.show_output;
    request
}

macro_rules! pair_path_factory {
    ($name:ident, $kind:expr, $usage:literal, $method:ident) => {
        pub struct $name;

        impl RequestFactory for $name {
            fn kind(&self) -> StepKind {
                $kind
            }

            fn create_request(&self, step: &StepDescriptor, env: &StepEnvironment<'_>) -> Result<Request> {
                ensure_kind($kind, step)?;
                ensure_exact_arity(step, 2, $usage)?;
                let cmd = env.format_cmd(step);
                let request = env.files.$method(cmd[0].as_ref(), cmd[1].as_ref());
                Ok(apply_step_meta(request, step))
            }
        }
    };
}

macro_rules! single_path_factory {
    ($name:ident, $kind:expr, $usage:literal, $method:ident) => {
        pub struct $name;

        impl RequestFactory for $name {
            fn kind(&self) -> StepKind {
                $kind
            }

            fn create_request(&self, step: &StepDescriptor, env: &StepEnvironment<'_>) -> Result<Request> {
                ensure_kind($kind, step)?;
                ensure_exact_arity(step, 1, $usage)?;
                let cmd = env.format_cmd(step);
                let request = env.files.$method(cmd[0].as_ref());
                Ok(apply_step_meta(request, step))
            }
        }
    };
}

pair_path_factory!(CopyRequestFactory, StepKind::Copy, "src, dst", copy);
pair_path_factory!(MoveRequestFactory, StepKind::Move, "src, dst", move_entry);
single_path_factory!(MkdirRequestFactory, StepKind::Mkdir, "dir", mkdir);
single_path_factory!(TouchRequestFactory, StepKind::Touch, "path", touch);
single_path_factory!(RemoveRequestFactory, StepKind::Remove, "path", remove);
single_path_factory!(RmtreeRequestFactory, StepKind::Rmtree, "dir", rmtree);

pub struct ShellRequestFactory;

impl RequestFactory for ShellRequestFactory {
    fn kind(&self) -> StepKind {
        StepKind::Shell
    }

    fn create_request(&self, step: &StepDescriptor, env: &StepEnvironment<'_>) -> Result<Request> {
        ensure_kind(StepKind::Shell, step)?;
        ensure_min_arity(step, 1, "argv")?;
        let cmd = env.format_cmd(step);
        Ok(apply_step_meta(env.runner.run(cmd, RunTarget::Workspace), step))
    }
}

/// Online-judge tooling steps: the configured arguments are handed to the
/// `oj` binary, in the judge-tools container when running under Docker.
pub struct OjRequestFactory;

impl RequestFactory for OjRequestFactory {
    fn kind(&self) -> StepKind {
        StepKind::Oj
    }

    fn create_request(&self, step: &StepDescriptor, env: &StepEnvironment<'_>) -> Result<Request> {
        ensure_kind(StepKind::Oj, step)?;
        ensure_min_arity(step, 1, "oj arguments")?;
        let mut cmd = vec!["oj".to_string()];
        cmd.extend(env.format_cmd(step));
        Ok(apply_step_meta(env.runner.run(cmd, RunTarget::Judge), step))
    }
}

/// Raw Docker steps: the first element selects the operation, the rest
/// are operation arguments. Image and container identities default to the
/// context-derived names so config rarely has to spell them out.
pub struct DockerRequestFactory;

impl RequestFactory for DockerRequestFactory {
    fn kind(&self) -> StepKind {
        StepKind::Docker
    }

    fn create_request(&self, step: &StepDescriptor, env: &StepEnvironment<'_>) -> Result<Request> {
        ensure_kind(StepKind::Docker, step)?;
        ensure_min_arity(step, 1, "docker subcommand")?;
        let cmd = env.format_cmd(step);
        let names = env.context.docker_names();
        let (subcommand, args) = (cmd[0].as_str(), &cmd[1..]);

        let request = match subcommand {
            "build" => DockerRequest {
                op: DockerOp::Build,
                image: Some(args.first().cloned().unwrap_or(names.image_name)),
                container: None,
                command: Vec::new(),
                dockerfile_text: env.context.dockerfile_resolver.dockerfile(),
                options: DockerOptions::default(),
            },
            "run" => DockerRequest {
                op: DockerOp::Run,
                image: Some(args.first().cloned().unwrap_or(names.image_name)),
                container: Some(names.container_name),
                command: args.get(1..).unwrap_or_default().to_vec(),
                dockerfile_text: None,
                options: DockerOptions {
                    detach: true,
                    ..DockerOptions::default()
                },
            },
            "stop" => DockerRequest {
                op: DockerOp::Stop,
                image: None,
                container: Some(args.first().cloned().unwrap_or(names.container_name)),
                command: Vec::new(),
                dockerfile_text: None,
                options: DockerOptions::default(),
            },
            "rm" => DockerRequest {
                op: DockerOp::Remove,
                image: None,
                container: Some(args.first().cloned().unwrap_or(names.container_name)),
                command: Vec::new(),
                dockerfile_text: None,
                options: DockerOptions {
                    force: true,
                    ..DockerOptions::default()
                },
            },
            "exec" => {
                if args.is_empty() {
                    bail!("'docker' step with 'exec' requires a command to run, got none");
                }
                DockerRequest {
                    op: DockerOp::Exec,
                    image: None,
                    container: Some(names.container_name),
                    command: args.to_vec(),
                    dockerfile_text: None,
                    options: DockerOptions::default(),
                }
            }
            "ps" => DockerRequest {
                op: DockerOp::Ps,
                image: None,
                container: None,
                command: Vec::new(),
                dockerfile_text: None,
                options: DockerOptions {
                    all: true,
                    ..DockerOptions::default()
                },
            },
            "logs" => DockerRequest {
                op: DockerOp::Logs,
                image: None,
                container: Some(args.first().cloned().unwrap_or(names.container_name)),
                command: Vec::new(),
                dockerfile_text: None,
                options: DockerOptions::default(),
            },
            other => bail!("'docker' step has unknown subcommand '{other}'"),
        };

        Ok(apply_step_meta(Request::docker(request), step))
    }
}

/// Registry of all step factories, keyed by the kind they accept.
pub struct FactoryRegistry {
    factories: IndexMap<StepKind, Box<dyn RequestFactory + Send + Sync>>,
}

impl FactoryRegistry {
    pub fn with_default_factories() -> Self {
        let mut factories: IndexMap<StepKind, Box<dyn RequestFactory + Send + Sync>> = IndexMap::new();
        for factory in [
            Box::new(CopyRequestFactory) as Box<dyn RequestFactory + Send + Sync>,
            Box::new(MoveRequestFactory),
            Box::new(MkdirRequestFactory),
            Box::new(TouchRequestFactory),
            Box::new(RemoveRequestFactory),
            Box::new(RmtreeRequestFactory),
            Box::new(ShellRequestFactory),
            Box::new(DockerRequestFactory),
            Box::new(OjRequestFactory),
        ] {
            factories.insert(factory.kind(), factory);
        }
        Self { factories }
    }

    pub fn create_request(&self, step: &StepDescriptor, env: &StepEnvironment<'_>) -> Result<Request> {
        match self.factories.get(&step.kind) {
            Some(factory) => factory.create_request(step, env),
            None => bail!("no factory registered for step type '{}'", step.kind),
        }
    }

    /// Builds one request per descriptor, preserving order.
    pub fn build_requests(&self, steps: &[StepDescriptor], env: &StepEnvironment<'_>) -> Result<Vec<Request>> {
        steps.iter().map(|step| self.create_request(step, env)).collect()
    }
}
