//! Top-level workflow orchestration.
//!
//! One [`WorkflowExecutionService`] drives one workflow invocation for a
//! resolved execution context: resolve the step list, build requests
//! through the factory layer, prepare the Docker environment when needed,
//! execute, and fold the per-step results into a
//! [`WorkflowExecutionResult`].
//!
//! Structural faults (missing step list, unwired driver) are raised as
//! errors because no partial result is meaningful for them; execution
//! faults flow through the result's `errors`/`warnings` fields instead.

use anyhow::{Context as _, Result};
use tracing::{debug, info};

use cpflow_types::{EnvKind, OperationResult, Request, WorkflowExecutionResult};

use crate::composite::{DEFAULT_MAX_WORKERS, ExecutionNode, make_optimal_structure};
use crate::config::LayeredConfig;
use crate::context::ExecutionContext;
use crate::drivers::UnifiedDriver;
use crate::factory::{FactoryRegistry, StepEnvironment};
use crate::handlers::{DockerFileHandler, DockerRunHandler, FileHandler, LocalFileHandler, LocalRunHandler, RunHandler};
use crate::preparation::preparation_requests;
use crate::registry::DriverRegistry;
use crate::state::DockerStateManager;

/// Execution mode for one run.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowOptions {
    /// Execute main steps through the bounded worker pool. Only valid
    /// when the steps have no inter-step ordering dependency; the caller
    /// makes that call, not the engine.
    pub parallel: bool,
    pub max_workers: usize,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Orchestrates one workflow invocation.
pub struct WorkflowExecutionService {
    context: ExecutionContext,
    config: LayeredConfig,
    drivers: DriverRegistry,
    state_manager: Option<DockerStateManager>,
    factories: FactoryRegistry,
}

impl WorkflowExecutionService {
    pub fn new(context: ExecutionContext, config: LayeredConfig, drivers: DriverRegistry, state_manager: Option<DockerStateManager>) -> Self {
        Self {
            context,
            config,
            drivers,
            state_manager,
            factories: FactoryRegistry::with_default_factories(),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Runs the workflow configured for the context's
    /// `(language, command)` pair.
    pub fn run_workflow(&self, options: WorkflowOptions) -> Result<WorkflowExecutionResult> {
        let steps = self
            .config
            .steps_for(&self.context.language, &self.context.command_type)
            .with_context(|| format!("cannot run command '{}'", self.context.command_type))?;
        info!(
            language = %self.context.language,
            command = %self.context.command_type,
            env = %self.context.env,
            step_count = steps.len(),
            "resolved workflow steps"
        );

        let requests = self.build_requests(&steps)?;
        let driver = self.select_driver()?;

        let mut warnings = Vec::new();
        let preparation_results = match self.prepare_environment(&driver, &mut warnings)? {
            PreparationOutcome::Ready(results) => results,
            PreparationOutcome::Aborted(results) => {
                let mut errors = Vec::new();
                collect_failures(&results, &mut errors, &mut warnings, "preparation step");
                return Ok(WorkflowExecutionResult {
                    success: false,
                    results: Vec::new(),
                    preparation_results: results,
                    errors,
                    warnings,
                });
            }
        };

        let nodes: Vec<ExecutionNode> = requests.into_iter().map(ExecutionNode::leaf).collect();
        let structure = make_optimal_structure(nodes, Some(self.context.command_type.as_str()));
        debug!(leaf_count = structure.count_leaf_requests(), parallel = options.parallel, "executing workflow structure");

        let results = match (&structure, options.parallel) {
            (ExecutionNode::Composite(composite), true) => composite.execute_parallel(&driver, options.max_workers)?,
            _ => structure.execute(&driver)?,
        };

        let mut errors = Vec::new();
        collect_failures(&results, &mut errors, &mut warnings, "step");
        let success = errors.is_empty();

        Ok(WorkflowExecutionResult {
            success,
            results,
            preparation_results,
            errors,
            warnings,
        })
    }

    fn build_requests(&self, steps: &[cpflow_types::StepDescriptor]) -> Result<Vec<Request>> {
        match self.context.env {
            EnvKind::Local => {
                let files = LocalFileHandler::new(&self.context.workspace_root);
                let runner = LocalRunHandler::new(&self.context.workspace_root);
                self.build_with_handlers(steps, &files, &runner)
            }
            EnvKind::Docker => {
                let names = self.context.docker_names();
                let files = DockerFileHandler::new(&self.context.workspace_root, names.container_name.clone());
                let runner = DockerRunHandler::new(&names, Some("/workspace".to_string()));
                self.build_with_handlers(steps, &files, &runner)
            }
        }
    }

    fn build_with_handlers(
        &self,
        steps: &[cpflow_types::StepDescriptor],
        files: &dyn FileHandler,
        runner: &dyn RunHandler,
    ) -> Result<Vec<Request>> {
        let env = StepEnvironment {
            context: &self.context,
            files,
            runner,
        };
        self.factories.build_requests(steps, &env)
    }

    /// Builds the unified driver for the context's environment. Local runs
    /// need the file and shell drivers; Docker runs additionally require a
    /// Docker backend, and its absence is a wiring fault.
    fn select_driver(&self) -> Result<UnifiedDriver> {
        let file = self.drivers.resolve_file()?;
        let shell = self.drivers.resolve_shell()?;
        let docker = match self.context.env {
            EnvKind::Docker => Some(self.drivers.resolve_docker()?),
            EnvKind::Local => self.drivers.docker_if_registered(),
        };
        Ok(UnifiedDriver::new(file, shell, docker))
    }

    fn prepare_environment(&self, driver: &UnifiedDriver, warnings: &mut Vec<String>) -> Result<PreparationOutcome> {
        if self.context.env != EnvKind::Docker {
            return Ok(PreparationOutcome::Ready(Vec::new()));
        }
        let Some(state_manager) = &self.state_manager else {
            warnings.push("docker state tracking disabled; skipping environment preparation".to_string());
            return Ok(PreparationOutcome::Ready(Vec::new()));
        };

        let mut plan = state_manager.check_rebuild_needed(&self.context);
        self.verify_live_containers(state_manager, &mut plan);
        if !plan.any_work() {
            debug!("docker environment up to date; no preparation needed");
            return Ok(PreparationOutcome::Ready(Vec::new()));
        }
        info!(?plan, "preparing docker environment");

        let requests = preparation_requests(&self.context, &plan);
        let nodes: Vec<ExecutionNode> = requests.into_iter().map(ExecutionNode::leaf).collect();
        let structure = make_optimal_structure(nodes, Some("preparation"));
        let results = structure.execute(driver)?;

        let fatal = results.iter().any(|result| !result.success && !result.allow_failure);
        if fatal {
            return Ok(PreparationOutcome::Aborted(results));
        }

        state_manager.update_state(&self.context);
        Ok(PreparationOutcome::Ready(results))
    }

    /// Secondary check against the live daemon: even when the fingerprint
    /// store says nothing changed, a container replaced outside this tool
    /// (or never started) still forces recreation.
    fn verify_live_containers(&self, state_manager: &DockerStateManager, plan: &mut cpflow_types::RebuildPlan) {
        let Some(docker) = self.drivers.docker_if_registered() else {
            return;
        };
        let names = self.context.docker_names();

        if !plan.container_recreate {
            let expected_image = DockerStateManager::expected_image_name(&self.context, false);
            if !state_manager.inspect_container_compatibility(docker.as_ref(), &names.container_name, &expected_image) {
                debug!(container = %names.container_name, "live container incompatible with expected image; forcing recreation");
                plan.container_recreate = true;
            }
        }
        if !plan.oj_container_recreate && self.context.dockerfile_resolver.oj_dockerfile().is_some() {
            let expected_image = DockerStateManager::expected_image_name(&self.context, true);
            if !state_manager.inspect_container_compatibility(docker.as_ref(), &names.oj_container_name, &expected_image) {
                debug!(container = %names.oj_container_name, "live oj container incompatible with expected image; forcing recreation");
                plan.oj_container_recreate = true;
            }
        }
    }
}

enum PreparationOutcome {
    Ready(Vec<OperationResult>),
    Aborted(Vec<OperationResult>),
}

fn collect_failures(results: &[OperationResult], errors: &mut Vec<String>, warnings: &mut Vec<String>, noun: &str) {
    for (index, result) in results.iter().enumerate() {
        if result.success {
            continue;
        }
        let label = result.label.clone().unwrap_or_else(|| format!("{noun} {index}"));
        if result.allow_failure {
            warnings.push(format!("{noun} {index} ('{label}') failed (allowed): {}", result.error_output()));
        } else {
            errors.push(format!("{noun} {index} ('{label}') failed: {}", result.error_output()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::DockerfileResolver;
    use crate::drivers::DockerBackend;
    use cpflow_types::DockerOptions;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local_context(workspace: &Path, command: &str) -> ExecutionContext {
        ExecutionContext::new("rust", EnvKind::Local, "abc300", "a", command, workspace, DockerfileResolver::empty())
    }

    fn local_config() -> LayeredConfig {
        LayeredConfig::from_value(json!({
            "rust": {
                "commands": {
                    "setup": {
                        "steps": [
                            {"type": "mkdir", "cmd": ["{contest_name}/{problem_name}"]},
                            {"type": "touch", "cmd": ["{contest_name}/{problem_name}/main.rs"]},
                            {"type": "shell", "cmd": ["true"]}
                        ]
                    },
                    "lint": {
                        "steps": [
                            {"type": "shell", "cmd": ["false"], "allow_failure": true},
                            {"type": "shell", "cmd": ["true"]}
                        ]
                    },
                    "broken": {
                        "steps": [
                            {"type": "shell", "cmd": ["false"]},
                            {"type": "shell", "cmd": ["true"]}
                        ]
                    }
                }
            }
        }))
    }

    #[test]
    fn local_workflow_executes_steps_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = WorkflowExecutionService::new(
            local_context(dir.path(), "setup"),
            local_config(),
            DriverRegistry::local_defaults(),
            None,
        );

        let result = service.run_workflow(WorkflowOptions::default()).expect("workflow runs");
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.results.len(), 3);
        assert!(dir.path().join("abc300/a/main.rs").exists());
        assert!(result.preparation_results.is_empty());
    }

    #[test]
    fn allowed_failures_become_warnings_and_execution_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = WorkflowExecutionService::new(
            local_context(dir.path(), "lint"),
            local_config(),
            DriverRegistry::local_defaults(),
            None,
        );

        let result = service.run_workflow(WorkflowOptions::default()).expect("workflow runs");
        assert!(result.success);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.errors.len(), 0);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("(allowed)"), "unexpected warning: {}", result.warnings[0]);
    }

    #[test]
    fn fatal_failure_aborts_and_is_reported_as_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = WorkflowExecutionService::new(
            local_context(dir.path(), "broken"),
            local_config(),
            DriverRegistry::local_defaults(),
            None,
        );

        let result = service.run_workflow(WorkflowOptions::default()).expect("workflow runs");
        assert!(!result.success);
        assert_eq!(result.results.len(), 1, "execution must stop at the fatal step");
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn missing_step_list_is_a_structural_error_naming_the_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = WorkflowExecutionService::new(
            local_context(dir.path(), "submit"),
            local_config(),
            DriverRegistry::local_defaults(),
            None,
        );

        let error = service.run_workflow(WorkflowOptions::default()).expect_err("missing steps");
        assert!(format!("{error:#}").contains("'submit'"), "unexpected error: {error:#}");
    }

    #[test]
    fn docker_env_without_docker_driver_is_a_wiring_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = ExecutionContext::new(
            "rust",
            EnvKind::Docker,
            "abc300",
            "a",
            "setup",
            dir.path(),
            DockerfileResolver::empty(),
        );
        let service = WorkflowExecutionService::new(context, local_config(), DriverRegistry::local_defaults(), None);

        let error = service.run_workflow(WorkflowOptions::default()).expect_err("docker driver missing");
        assert!(error.to_string().contains("DOCKER_DRIVER"), "unexpected error: {error}");
    }

    #[test]
    fn parallel_mode_preserves_result_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LayeredConfig::from_value(json!({
            "rust": {
                "commands": {
                    "fanout": {
                        "steps": [
                            {"type": "touch", "cmd": ["out/one.txt"]},
                            {"type": "touch", "cmd": ["out/two.txt"]},
                            {"type": "touch", "cmd": ["out/three.txt"]},
                            {"type": "touch", "cmd": ["out/four.txt"]}
                        ]
                    }
                }
            }
        }));
        let service = WorkflowExecutionService::new(
            local_context(dir.path(), "fanout"),
            config,
            DriverRegistry::local_defaults(),
            None,
        );
        let result = service
            .run_workflow(WorkflowOptions {
                parallel: true,
                max_workers: 2,
            })
            .expect("workflow runs");
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.results.len(), 4);
        let labels: Vec<_> = result.results.iter().map(|r| r.label.clone().unwrap_or_default()).collect();
        assert!(labels[0].contains("one"), "order not preserved: {labels:?}");
        assert!(labels[3].contains("four"), "order not preserved: {labels:?}");
    }

    /// Recording stub backend for docker preparation tests. `ps` and
    /// `inspect` answer from the scripted fields so the live
    /// compatibility check can pass.
    #[derive(Default)]
    struct RecordingBackend {
        builds: AtomicUsize,
        runs: AtomicUsize,
        removes: AtomicUsize,
        ps_stdout: String,
        inspect_stdout: String,
    }

    impl DockerBackend for RecordingBackend {
        fn run_container(&self, _: &str, _: Option<&str>, _: &DockerOptions, _: &[String]) -> cpflow_types::OperationResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            cpflow_types::OperationResult::ok()
        }
        fn stop_container(&self, _: &str, _: u64) -> cpflow_types::OperationResult {
            cpflow_types::OperationResult::ok()
        }
        fn remove_container(&self, _: &str, _: bool) -> cpflow_types::OperationResult {
            self.removes.fetch_add(1, Ordering::SeqCst);
            cpflow_types::OperationResult::ok()
        }
        fn exec_in_container(&self, _: &str, _: &[String], _: Option<&str>) -> cpflow_types::OperationResult {
            cpflow_types::OperationResult::ok()
        }
        fn build_image(&self, _: &str, _: &str) -> cpflow_types::OperationResult {
            self.builds.fetch_add(1, Ordering::SeqCst);
            cpflow_types::OperationResult::ok()
        }
        fn image_rm(&self, _: &str) -> cpflow_types::OperationResult {
            cpflow_types::OperationResult::ok()
        }
        fn ps(&self, _: bool, _: bool) -> cpflow_types::OperationResult {
            cpflow_types::OperationResult::ok_with_output(self.ps_stdout.clone())
        }
        fn inspect(&self, _: &str) -> cpflow_types::OperationResult {
            cpflow_types::OperationResult::ok_with_output(self.inspect_stdout.clone())
        }
        fn logs(&self, _: &str) -> cpflow_types::OperationResult {
            cpflow_types::OperationResult::ok()
        }
        fn cp(&self, _: &Path, _: &Path, _: &str, _: bool) -> cpflow_types::OperationResult {
            cpflow_types::OperationResult::ok()
        }
    }

    #[test]
    fn docker_preparation_runs_once_then_state_is_current() {
        let dir = tempfile::tempdir().expect("tempdir");

        let make_context = || {
            let resolver = DockerfileResolver::with_loader(
                Some(PathBuf::from("/env/Dockerfile")),
                None,
                Box::new(|_| Ok("FROM rust:1.89\n".to_string())),
            );
            ExecutionContext::new("rust", EnvKind::Docker, "abc300", "a", "check", dir.path(), resolver)
        };

        // Script the daemon responses so the live compatibility check
        // sees the prepared container on the second run.
        let container_name = make_context().docker_names().container_name;
        let backend = Arc::new(RecordingBackend {
            ps_stdout: format!("{container_name}\n"),
            inspect_stdout: r#"[{"Config": {"Image": "cpflow-rust:latest"}}]"#.to_string(),
            ..RecordingBackend::default()
        });

        let config = LayeredConfig::from_value(json!({
            "rust": {"commands": {"check": {"steps": [{"type": "docker", "cmd": ["exec", "true"]}]}}}
        }));
        let drivers = DriverRegistry::local_defaults().with_docker(Arc::clone(&backend) as Arc<dyn DockerBackend>);
        let state_path = dir.path().join("docker_state.json");

        let service = WorkflowExecutionService::new(
            make_context(),
            config.clone(),
            drivers.clone(),
            Some(DockerStateManager::from_file(&state_path)),
        );
        let result = service.run_workflow(WorkflowOptions::default()).expect("workflow runs");
        assert!(result.success, "errors: {:?}", result.errors);
        assert!(!result.preparation_results.is_empty());
        assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
        assert!(backend.runs.load(Ordering::SeqCst) >= 1);

        // A second run with the same Dockerfile needs no preparation.
        let service = WorkflowExecutionService::new(
            make_context(),
            config,
            drivers,
            Some(DockerStateManager::from_file(&state_path)),
        );
        let result = service.run_workflow(WorkflowOptions::default()).expect("workflow runs");
        assert!(result.success);
        assert!(result.preparation_results.is_empty());
        assert_eq!(backend.builds.load(Ordering::SeqCst), 1, "no second build expected");
    }
}
