//! Execution context: the resolved user input for one workflow run, plus
//! template formatting against it.

use std::path::PathBuf;

use cpflow_types::EnvKind;

use crate::dockerfile::DockerfileResolver;

/// Docker identity names derived from the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerNames {
    pub image_name: String,
    pub oj_image_name: String,
    pub container_name: String,
    pub oj_container_name: String,
}

/// Everything the engine knows about the current invocation: the parsed
/// user input (language, environment, contest, problem, command) plus the
/// workspace root and the lazy Dockerfile resolver.
///
/// Created once per run and treated as read-only by everything downstream.
#[derive(Debug)]
pub struct ExecutionContext {
    pub language: String,
    pub env: EnvKind,
    pub contest_name: String,
    pub problem_name: String,
    pub command_type: String,
    pub workspace_root: PathBuf,
    pub dockerfile_resolver: DockerfileResolver,
}

impl ExecutionContext {
    pub fn new(
        language: impl Into<String>,
        env: EnvKind,
        contest_name: impl Into<String>,
        problem_name: impl Into<String>,
        command_type: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        dockerfile_resolver: DockerfileResolver,
    ) -> Self {
        Self {
            language: language.into(),
            env,
            contest_name: contest_name.into(),
            problem_name: problem_name.into(),
            command_type: command_type.into(),
            workspace_root: workspace_root.into(),
            dockerfile_resolver,
        }
    }

    /// Replaces `{placeholder}` occurrences with context values.
    ///
    /// Unknown placeholders are left verbatim (braces included) so that
    /// partially resolved strings stay inspectable in logs and results
    /// instead of failing the run.
    pub fn format_template(&self, input: &str) -> String {
        let mut output = String::with_capacity(input.len());
        let mut remainder = input;

        while let Some(start) = remainder.find('{') {
            output.push_str(&remainder[..start]);
            let after_brace = &remainder[start + 1..];
            let Some(end) = after_brace.find('}') else {
                // No closing brace: keep the rest as-is.
                output.push_str(&remainder[start..]);
                return output;
            };
            let placeholder = &after_brace[..end];
            match self.lookup_variable(placeholder) {
                Some(value) => output.push_str(&value),
                None => {
                    output.push('{');
                    output.push_str(placeholder);
                    output.push('}');
                }
            }
            remainder = &after_brace[end + 1..];
        }

        output.push_str(remainder);
        output
    }

    fn lookup_variable(&self, name: &str) -> Option<String> {
        match name {
            "language" => Some(self.language.clone()),
            "env_type" => Some(self.env.to_string()),
            "contest_name" => Some(self.contest_name.clone()),
            "problem_name" => Some(self.problem_name.clone()),
            "command_type" => Some(self.command_type.clone()),
            "workspace_root" => Some(self.workspace_root.display().to_string()),
            "image_name" => Some(self.docker_names().image_name),
            "container_name" => Some(self.docker_names().container_name),
            _ => None,
        }
    }

    /// Image and container names for this context, derived from the
    /// language and the current Dockerfile content so that Dockerfile
    /// edits naturally produce new container names.
    pub fn docker_names(&self) -> DockerNames {
        let dockerfile = self.dockerfile_resolver.dockerfile();
        let oj_dockerfile = self.dockerfile_resolver.oj_dockerfile();
        DockerNames {
            image_name: cpflow_util::image_name(&self.language),
            oj_image_name: cpflow_util::oj_image_name(),
            container_name: cpflow_util::container_name(&self.language, dockerfile.as_deref()),
            oj_container_name: cpflow_util::oj_container_name(oj_dockerfile.as_deref()),
        }
    }
}
